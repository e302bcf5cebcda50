//! Table administration.
//!
//! [`AdminClient`] manages the tables of a single instance along with everything hanging off them:
//! column families, backups, snapshots, authorized views and schema bundles.

mod authorized_view;
mod backup;
mod schema_bundle;
mod snapshot;

pub use self::authorized_view::{
    AuthorizedViewConf, AuthorizedViewInfo, FamilySubset, SubsetViewConf, SubsetViewInfo,
    UpdateAuthorizedViewConf,
};
pub use self::backup::{
    BackupDestination, BackupInfo, BackupOptions, BackupState, BackupType,
};
pub use self::schema_bundle::{SchemaBundleConf, SchemaBundleInfo, UpdateSchemaBundleConf};
pub use self::snapshot::SnapshotInfo;

use crate::config::ClientConfig;
use crate::conv::{duration_to_proto, nonzero_duration};
use crate::gc::{gc_rule_to_string, GcPolicy};
use crate::iam::{IamHandle, IamService};
use crate::internal_macros::idempotent;
use crate::operation::OperationPoller;
use crate::proto::admin::bigtable_table_admin_client::BigtableTableAdminClient;
use crate::proto::admin::{
    create_table_request, drop_row_range_request, modify_column_families_request,
    table, ChangeStreamConfig, CheckConsistencyRequest, ColumnFamily, CreateTableRequest,
    DeleteTableRequest, DropRowRangeRequest, GenerateConsistencyTokenRequest, GetTableRequest,
    ListTablesRequest, ModifyColumnFamiliesRequest, Table, UpdateTableRequest,
};
use crate::tracing_shim::debug;
use crate::types::{StructType, ValueType};
use crate::{resource, Error, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use tonic::transport::Channel;
use tonic::Code;

/// Whether a resource is protected against deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionProtection {
    /// Leave the setting as it is.
    #[default]
    None,
    /// Deletion is refused.
    Protected,
    /// Deletion is allowed.
    Unprotected,
}

impl DeletionProtection {
    pub(crate) const fn from_flag(protected: bool) -> Self {
        if protected {
            Self::Protected
        } else {
            Self::Unprotected
        }
    }
}

/// The settings of a column family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Family {
    /// Which cells are garbage collected. `None` leaves the server default.
    pub gc_policy: Option<GcPolicy>,
    /// The type of the values stored in the family.
    pub value_type: Option<ValueType>,
}

impl Family {
    fn to_proto(&self) -> ColumnFamily {
        ColumnFamily {
            gc_rule: self.gc_policy.as_ref().map(GcPolicy::to_proto),
            value_type: self.value_type.as_ref().map(ValueType::to_proto),
        }
    }
}

/// Options for [`AdminClient::update_family`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateFamilyOptions {
    /// Proceed even if the server warns that the change is unsafe.
    pub ignore_warnings: bool,
}

/// An automated backup schedule for a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutomatedBackupPolicy {
    /// How long each automated backup is kept.
    pub retention_period: Option<Duration>,
    /// How often automated backups are taken.
    pub frequency: Option<Duration>,
}

impl AutomatedBackupPolicy {
    fn to_proto(self) -> Result<table::AutomatedBackupPolicy> {
        if self.retention_period.is_none() && self.frequency.is_none() {
            return Err(Error::invalid(
                "at least one of retention_period and frequency must be set",
            ));
        }
        Ok(table::AutomatedBackupPolicy {
            retention_period: self.retention_period.map(duration_to_proto),
            frequency: self.frequency.map(duration_to_proto),
        })
    }
}

/// Everything needed to create a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableConf {
    /// The table id, unique within the instance.
    pub table_id: String,
    /// Row keys at which the table is initially split into tablets.
    pub split_keys: Vec<Vec<u8>>,
    /// The initial column families.
    pub column_families: BTreeMap<String, Family>,
    /// Whether the table starts out protected against deletion.
    pub deletion_protection: DeletionProtection,
    /// How long change stream records are kept. Zero or `None` disables the change stream.
    pub change_stream_retention: Option<Duration>,
    /// The automated backup schedule, if any.
    pub automated_backup_policy: Option<AutomatedBackupPolicy>,
    /// The schema of the row key, if any.
    pub row_key_schema: Option<StructType>,
}

impl TableConf {
    /// A configuration with only the table id set.
    #[must_use]
    pub fn new(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            ..Self::default()
        }
    }
}

/// A column family as reported by [`AdminClient::table_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyInfo {
    /// The family name.
    pub name: String,
    /// The garbage-collection policy, rendered for humans.
    pub gc_policy: String,
    /// The garbage-collection policy.
    pub full_gc_policy: GcPolicy,
    /// The value type, if one is set.
    pub value_type: Option<ValueType>,
}

/// The schema and settings of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Family names, sorted.
    pub families: Vec<String>,
    /// Family details, sorted by name.
    pub family_infos: Vec<FamilyInfo>,
    /// Either [`DeletionProtection::Protected`] or [`DeletionProtection::Unprotected`].
    pub deletion_protection: DeletionProtection,
    /// How long change stream records are kept, if the change stream is enabled.
    pub change_stream_retention: Option<Duration>,
    /// The automated backup schedule, if any.
    pub automated_backup_policy: Option<AutomatedBackupPolicy>,
    /// The schema of the row key, if any.
    pub row_key_schema: Option<StructType>,
}

/// How a table or backup is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionType {
    /// The type was not reported.
    #[default]
    Unspecified,
    /// Encrypted with a key managed by the service.
    GoogleDefault,
    /// Encrypted with a customer-managed key.
    CustomerManaged,
}

impl EncryptionType {
    pub(crate) const fn from_proto(value: i32) -> Self {
        match value {
            1 => Self::GoogleDefault,
            2 => Self::CustomerManaged,
            _ => Self::Unspecified,
        }
    }
}

/// The state of a customer-managed key, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionStatus {
    /// The canonical status code.
    pub code: Code,
    /// A description of the status.
    pub message: String,
}

/// The encryption of a table on one cluster, or of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncryptionInfo {
    /// The key status, if the server reported one.
    pub status: Option<EncryptionStatus>,
    /// How the data is encrypted.
    pub encryption_type: EncryptionType,
    /// The key version in use for customer-managed encryption.
    pub kms_key_version: String,
}

impl EncryptionInfo {
    pub(crate) fn from_proto(info: &crate::proto::admin::EncryptionInfo) -> Self {
        Self {
            status: info.encryption_status.as_ref().map(|status| EncryptionStatus {
                code: Code::from(status.code),
                message: status.message.clone(),
            }),
            encryption_type: EncryptionType::from_proto(info.encryption_type),
            kms_key_version: info.kms_key_version.clone(),
        }
    }
}

/// Manages the tables of one instance.
#[derive(Debug, Clone)]
pub struct AdminClient {
    client: BigtableTableAdminClient<Channel>,
    operations: OperationPoller,
    config: ClientConfig,
    prefix: String,
}

impl AdminClient {
    /// Connect to the administrative endpoint named in `config`.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let channel = config.connect(&config.admin_endpoint).await?;
        Ok(Self::with_channel(channel, config))
    }

    /// Use an existing channel.
    #[must_use]
    pub fn with_channel(channel: Channel, config: ClientConfig) -> Self {
        let prefix = config.instance_name();
        Self {
            client: BigtableTableAdminClient::new(channel.clone()),
            operations: OperationPoller::new(
                channel,
                prefix.clone(),
                config.operation_poll_interval,
                config.retry,
            ),
            config,
            prefix,
        }
    }

    /// The configuration this client was created with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        resource::request(message, &self.prefix)
    }

    fn table_path(&self, table: &str) -> String {
        resource::table_path(&self.prefix, table)
    }

    fn cluster_path(&self, cluster: &str) -> String {
        resource::cluster_path(&self.prefix, cluster)
    }

    /// The ids of every table in the instance.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn tables(&self) -> Result<Vec<String>> {
        let mut tables = Vec::new();
        let mut page_token = String::new();
        loop {
            let response = idempotent!(self.list_tables(ListTablesRequest {
                parent: self.prefix.clone(),
                view: table::View::NameOnly as i32,
                page_size: 0,
                page_token: page_token.clone(),
            }))
            .await?;
            tables.extend(
                response
                    .tables
                    .iter()
                    .map(|table| resource::last_segment(&table.name).to_owned()),
            );
            if response.next_page_token.is_empty() {
                return Ok(tables);
            }
            page_token = response.next_page_token;
        }
    }

    /// Create an empty table with no column families.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn create_table(&self, table: &str) -> Result<()> {
        self.create_table_from_conf(TableConf::new(table)).await
    }

    /// Create an empty table that is initially split at the given keys.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, split_keys)))]
    pub async fn create_presplit_table(&self, table: &str, split_keys: Vec<Vec<u8>>) -> Result<()> {
        self.create_table_from_conf(TableConf {
            split_keys,
            ..TableConf::new(table)
        })
        .await
    }

    /// Create a table from a full configuration.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(table = %conf.table_id)))]
    pub async fn create_table_from_conf(&self, conf: TableConf) -> Result<()> {
        if conf.table_id.is_empty() {
            return Err(Error::invalid("table id is required"));
        }
        let mut table = Table {
            column_families: conf
                .column_families
                .iter()
                .map(|(name, family)| (name.clone(), family.to_proto()))
                .collect(),
            row_key_schema: conf.row_key_schema.as_ref().map(StructType::to_proto),
            ..Table::default()
        };
        match conf.deletion_protection {
            DeletionProtection::Protected => table.deletion_protection = true,
            DeletionProtection::Unprotected => table.deletion_protection = false,
            DeletionProtection::None => {}
        }
        if let Some(retention) = conf.change_stream_retention.filter(|r| !r.is_zero()) {
            table.change_stream_config = Some(ChangeStreamConfig {
                retention_period: Some(duration_to_proto(retention)),
            });
        }
        if let Some(policy) = conf.automated_backup_policy {
            table.automated_backup_config = Some(table::AutomatedBackupConfig::AutomatedBackupPolicy(
                policy.to_proto()?,
            ));
        }

        let request = CreateTableRequest {
            parent: self.prefix.clone(),
            table_id: conf.table_id,
            table: Some(table),
            initial_splits: conf
                .split_keys
                .into_iter()
                .map(|key| create_table_request::Split { key })
                .collect(),
        };
        let _table = self.client.clone().create_table(self.request(request)).await?;
        Ok(())
    }

    /// Delete a table and all of its data.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_table(&self, table: &str) -> Result<()> {
        let request = DeleteTableRequest {
            name: self.table_path(table),
        };
        let _response = self.client.clone().delete_table(self.request(request)).await?;
        Ok(())
    }

    async fn get_table(&self, table: &str, view: table::View) -> Result<Table> {
        let name = self.table_path(table);
        Ok(idempotent!(self.get_table(GetTableRequest {
            name: name.clone(),
            view: view as i32,
        }))
        .await?)
    }

    /// The schema and settings of a table.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn table_info(&self, table: &str) -> Result<TableInfo> {
        let table = self.get_table(table, table::View::SchemaView).await?;

        let mut family_infos: Vec<FamilyInfo> = table
            .column_families
            .iter()
            .map(|(name, family)| FamilyInfo {
                name: name.clone(),
                gc_policy: gc_rule_to_string(family.gc_rule.as_ref()),
                full_gc_policy: GcPolicy::from_proto(family.gc_rule.as_ref()),
                value_type: family.value_type.as_ref().and_then(ValueType::from_proto),
            })
            .collect();
        family_infos.sort_by(|a, b| a.name.cmp(&b.name));

        let automated_backup_policy = match table.automated_backup_config {
            Some(table::AutomatedBackupConfig::AutomatedBackupPolicy(policy)) => {
                Some(AutomatedBackupPolicy {
                    retention_period: policy.retention_period.as_ref().map(crate::conv::duration_from_proto),
                    frequency: policy.frequency.as_ref().map(crate::conv::duration_from_proto),
                })
            }
            None => None,
        };

        Ok(TableInfo {
            families: family_infos.iter().map(|f| f.name.clone()).collect(),
            family_infos,
            deletion_protection: DeletionProtection::from_flag(table.deletion_protection),
            change_stream_retention: table
                .change_stream_config
                .as_ref()
                .and_then(|config| nonzero_duration(config.retention_period.as_ref())),
            automated_backup_policy,
            row_key_schema: table.row_key_schema.as_ref().map(StructType::from_proto),
        })
    }

    /// The encryption of a table on each of its clusters, keyed by cluster id.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn encryption_info(
        &self,
        table: &str,
    ) -> Result<BTreeMap<String, Vec<EncryptionInfo>>> {
        let table = self.get_table(table, table::View::EncryptionView).await?;
        Ok(table
            .cluster_states
            .iter()
            .map(|(cluster, state)| {
                (
                    resource::last_segment(cluster).to_owned(),
                    state.encryption_info.iter().map(EncryptionInfo::from_proto).collect(),
                )
            })
            .collect())
    }

    async fn modify_column_family(
        &self,
        table: &str,
        modification: modify_column_families_request::Modification,
        ignore_warnings: bool,
    ) -> Result<()> {
        let request = ModifyColumnFamiliesRequest {
            name: self.table_path(table),
            modifications: vec![modification],
            ignore_warnings,
        };
        let _table = self
            .client
            .clone()
            .modify_column_families(self.request(request))
            .await?;
        Ok(())
    }

    /// Create a column family with the server's default settings.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn create_column_family(&self, table: &str, family: &str) -> Result<()> {
        self.create_column_family_with_config(table, family, Family::default())
            .await
    }

    /// Create a column family with the given settings.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn create_column_family_with_config(
        &self,
        table: &str,
        family: &str,
        config: Family,
    ) -> Result<()> {
        let modification = modify_column_families_request::Modification {
            id: family.to_owned(),
            r#mod: Some(modify_column_families_request::modification::Mod::Create(
                config.to_proto(),
            )),
            update_mask: None,
        };
        self.modify_column_family(table, modification, false).await
    }

    /// Delete a column family and every cell in it.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_column_family(&self, table: &str, family: &str) -> Result<()> {
        let modification = modify_column_families_request::Modification {
            id: family.to_owned(),
            r#mod: Some(modify_column_families_request::modification::Mod::Drop(true)),
            update_mask: None,
        };
        self.modify_column_family(table, modification, false).await
    }

    /// Change the settings of a column family. Only the settings present in `config` change; if
    /// none are present, nothing is sent.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_family(
        &self,
        table: &str,
        family: &str,
        config: Family,
        options: UpdateFamilyOptions,
    ) -> Result<()> {
        let mut paths = Vec::new();
        if config.gc_policy.is_some() {
            paths.push("gc_rule".to_owned());
        }
        if config.value_type.is_some() {
            paths.push("value_type".to_owned());
        }
        if paths.is_empty() {
            debug!("nothing to update");
            return Ok(());
        }
        let modification = modify_column_families_request::Modification {
            id: family.to_owned(),
            r#mod: Some(modify_column_families_request::modification::Mod::Update(
                config.to_proto(),
            )),
            update_mask: Some(prost_types::FieldMask { paths }),
        };
        self.modify_column_family(table, modification, options.ignore_warnings)
            .await
    }

    /// Replace the garbage-collection policy of a column family.
    pub async fn set_gc_policy(&self, table: &str, family: &str, policy: GcPolicy) -> Result<()> {
        self.set_gc_policy_with_options(table, family, policy, UpdateFamilyOptions::default())
            .await
    }

    /// Replace the garbage-collection policy of a column family, with options.
    pub async fn set_gc_policy_with_options(
        &self,
        table: &str,
        family: &str,
        policy: GcPolicy,
        options: UpdateFamilyOptions,
    ) -> Result<()> {
        let config = Family {
            gc_policy: Some(policy),
            value_type: None,
        };
        self.update_family(table, family, config, options).await
    }

    async fn update_table(
        &self,
        mut table: Table,
        table_id: &str,
        paths: &[&str],
        ignore_warnings: bool,
    ) -> Result<()> {
        if table_id.is_empty() {
            return Err(Error::invalid("table id is required"));
        }
        table.name = self.table_path(table_id);
        let request = UpdateTableRequest {
            table: Some(table),
            update_mask: Some(prost_types::FieldMask {
                paths: paths.iter().map(|&p| p.to_owned()).collect(),
            }),
            ignore_warnings,
        };
        let operation = self
            .client
            .clone()
            .update_table(self.request(request))
            .await?
            .into_inner();
        let _table: Table = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Turn off the change stream of a table.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_table_disable_change_stream(&self, table: &str) -> Result<()> {
        self.update_table(Table::default(), table, &["change_stream_config"], false)
            .await
    }

    /// Turn on the change stream of a table, or change its retention.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_table_with_change_stream(
        &self,
        table: &str,
        retention: Duration,
    ) -> Result<()> {
        let update = Table {
            change_stream_config: Some(ChangeStreamConfig {
                retention_period: Some(duration_to_proto(retention)),
            }),
            ..Table::default()
        };
        self.update_table(update, table, &["change_stream_config.retention_period"], false)
            .await
    }

    /// Protect or unprotect a table against deletion.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_table_with_deletion_protection(
        &self,
        table: &str,
        deletion_protection: DeletionProtection,
    ) -> Result<()> {
        let update = Table {
            deletion_protection: deletion_protection != DeletionProtection::Unprotected,
            ..Table::default()
        };
        self.update_table(update, table, &["deletion_protection"], false)
            .await
    }

    /// Remove the automated backup schedule of a table.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_table_disable_automated_backup_policy(&self, table: &str) -> Result<()> {
        self.update_table(Table::default(), table, &["automated_backup_policy"], false)
            .await
    }

    /// Change the automated backup schedule of a table. Only the non-zero fields of `policy` are
    /// updated.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_table_with_automated_backup_policy(
        &self,
        table: &str,
        policy: AutomatedBackupPolicy,
    ) -> Result<()> {
        let retention_period = policy.retention_period.filter(|d| !d.is_zero());
        let frequency = policy.frequency.filter(|d| !d.is_zero());
        let mut paths = Vec::new();
        if retention_period.is_some() {
            paths.push("automated_backup_policy.retention_period");
        }
        if frequency.is_some() {
            paths.push("automated_backup_policy.frequency");
        }
        if paths.is_empty() {
            return Err(Error::invalid(
                "at least one of retention_period and frequency must be non-zero; \
                 use update_table_disable_automated_backup_policy to remove the policy",
            ));
        }
        let update = Table {
            automated_backup_config: Some(table::AutomatedBackupConfig::AutomatedBackupPolicy(
                table::AutomatedBackupPolicy {
                    retention_period: retention_period.map(duration_to_proto),
                    frequency: frequency.map(duration_to_proto),
                },
            )),
            ..Table::default()
        };
        self.update_table(update, table, &paths, false).await
    }

    /// Set the schema of the row key.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, schema)))]
    pub async fn update_table_with_row_key_schema(
        &self,
        table: &str,
        schema: &StructType,
    ) -> Result<()> {
        let update = Table {
            row_key_schema: Some(schema.to_proto()),
            ..Table::default()
        };
        self.update_table(update, table, &["row_key_schema"], false)
            .await
    }

    /// Remove the schema of the row key.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_table_remove_row_key_schema(&self, table: &str) -> Result<()> {
        self.update_table(Table::default(), table, &["row_key_schema"], true)
            .await
    }

    /// Delete every row whose key starts with `prefix`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn drop_row_range(&self, table: &str, prefix: &[u8]) -> Result<()> {
        self.drop_rows(
            table,
            drop_row_range_request::Target::RowKeyPrefix(prefix.to_vec()),
        )
        .await
    }

    /// Delete every row of a table, keeping its schema.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn drop_all_rows(&self, table: &str) -> Result<()> {
        self.drop_rows(table, drop_row_range_request::Target::DeleteAllDataFromTable(true))
            .await
    }

    async fn drop_rows(&self, table: &str, target: drop_row_range_request::Target) -> Result<()> {
        let request = DropRowRangeRequest {
            name: self.table_path(table),
            target: Some(target),
        };
        let _response = self.client.clone().drop_row_range(self.request(request)).await?;
        Ok(())
    }

    /// Block until every write made to `table` before this call is visible on all clusters.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn wait_for_replication(&self, table: &str) -> Result<()> {
        let name = self.table_path(table);
        let token = idempotent!(self.generate_consistency_token(GenerateConsistencyTokenRequest {
            name: name.clone(),
        }))
        .await?
        .consistency_token;
        loop {
            let response = idempotent!(self.check_consistency(CheckConsistencyRequest {
                name: name.clone(),
                consistency_token: token.clone(),
            }))
            .await?;
            if response.consistent {
                return Ok(());
            }
            debug!("replication not yet consistent");
            tokio::time::sleep(self.config.replication_poll_interval).await;
        }
    }

    fn iam(&self, resource: String) -> IamHandle {
        IamHandle::new(
            IamService::Table(self.client.clone()),
            resource,
            self.prefix.clone(),
            self.config.retry,
        )
    }

    /// The access control policy of a table.
    #[must_use]
    pub fn table_iam(&self, table: &str) -> IamHandle {
        self.iam(self.table_path(table))
    }

    /// The access control policy of a backup.
    #[must_use]
    pub fn backup_iam(&self, cluster: &str, backup: &str) -> IamHandle {
        self.iam(resource::backup_path(&self.prefix, cluster, backup))
    }

    /// The access control policy of an authorized view.
    #[must_use]
    pub fn authorized_view_iam(&self, table: &str, view: &str) -> IamHandle {
        self.iam(resource::authorized_view_path(&self.prefix, table, view))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::proto::admin::encryption_info;

    #[test]
    fn test_automated_backup_policy_requires_a_field() {
        assert!(AutomatedBackupPolicy::default().to_proto().is_err());
        let policy = AutomatedBackupPolicy {
            retention_period: Some(Duration::from_secs(3_600)),
            frequency: None,
        };
        let proto = policy.to_proto().map_err(|e| e.to_string());
        assert!(matches!(proto, Ok(ref p) if p.retention_period.is_some() && p.frequency.is_none()));
    }

    #[test]
    fn test_encryption_info_conversion() {
        let proto = crate::proto::admin::EncryptionInfo {
            encryption_type: encryption_info::EncryptionType::CustomerManagedEncryption as i32,
            encryption_status: Some(crate::proto::rpc::Status {
                code: Code::FailedPrecondition as i32,
                message: "key disabled".to_owned(),
                details: Vec::new(),
            }),
            kms_key_version: "projects/p/locations/l/keyRings/r/cryptoKeys/k/cryptoKeyVersions/1"
                .to_owned(),
        };
        let info = EncryptionInfo::from_proto(&proto);
        assert_eq!(info.encryption_type, EncryptionType::CustomerManaged);
        assert_eq!(
            info.status,
            Some(EncryptionStatus {
                code: Code::FailedPrecondition,
                message: "key disabled".to_owned(),
            })
        );
        assert_eq!(info.kms_key_version, proto.kms_key_version);
        assert_eq!(
            EncryptionInfo::from_proto(&crate::proto::admin::EncryptionInfo::default()),
            EncryptionInfo::default()
        );
    }
}
