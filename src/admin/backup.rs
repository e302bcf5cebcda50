use super::{AdminClient, EncryptionInfo};
use crate::conv::{optional_timestamp, required_timestamp, timestamp_to_proto};
use crate::internal_macros::idempotent;
use crate::pager::paginate;
use crate::proto::admin::{
    backup, restore_table_request, Backup, CopyBackupRequest, CreateBackupRequest,
    DeleteBackupRequest, GetBackupRequest, ListBackupsRequest, RestoreTableRequest, Table,
    UpdateBackupRequest,
};
use crate::{resource, Error, Result};
use futures::stream::BoxStream;
use std::time::SystemTime;

/// The storage tier of a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupType {
    /// Let the server decide.
    #[default]
    Unspecified,
    /// A standard backup, cheapest to keep.
    Standard,
    /// A backup that can be restored quickly.
    Hot,
}

impl BackupType {
    const fn to_proto(self) -> i32 {
        match self {
            Self::Unspecified => backup::BackupType::Unspecified as i32,
            Self::Standard => backup::BackupType::Standard as i32,
            Self::Hot => backup::BackupType::Hot as i32,
        }
    }

    const fn from_proto(value: i32) -> Self {
        match value {
            1 => Self::Standard,
            2 => Self::Hot,
            _ => Self::Unspecified,
        }
    }
}

/// Whether a backup can be used yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupState {
    /// The state was not reported.
    #[default]
    Unspecified,
    /// The backup is still being taken.
    Creating,
    /// The backup is complete.
    Ready,
}

impl BackupState {
    const fn from_proto(value: i32) -> Self {
        match value {
            1 => Self::Creating,
            2 => Self::Ready,
            _ => Self::Unspecified,
        }
    }
}

/// Settings for a new backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackupOptions {
    /// When the backup is deleted. Required.
    pub expire_time: Option<SystemTime>,
    /// The storage tier.
    pub backup_type: BackupType,
    /// When a hot backup is converted to a standard one.
    pub hot_to_standard_time: Option<SystemTime>,
}

impl BackupOptions {
    /// A standard backup that expires at `expire_time`.
    #[must_use]
    pub fn new(expire_time: SystemTime) -> Self {
        Self {
            expire_time: Some(expire_time),
            ..Self::default()
        }
    }

    /// Take a hot backup.
    #[must_use]
    pub const fn hot(mut self) -> Self {
        self.backup_type = BackupType::Hot;
        self
    }

    /// Take a hot backup that becomes a standard one at `time`.
    #[must_use]
    pub const fn hot_to_standard_at(mut self, time: SystemTime) -> Self {
        self.backup_type = BackupType::Hot;
        self.hot_to_standard_time = Some(time);
        self
    }
}

/// Where a backup copy goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDestination {
    /// The project of the destination instance.
    pub project: String,
    /// The destination instance.
    pub instance: String,
    /// The destination cluster.
    pub cluster: String,
    /// The id of the new backup.
    pub backup: String,
}

/// A backup as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    /// The backup id.
    pub name: String,
    /// The id of the table the backup was taken from.
    pub source_table: String,
    /// The full name of the backup this one was copied from, if any.
    pub source_backup: String,
    /// The size of the backup.
    pub size_bytes: i64,
    /// When the backup started.
    pub start_time: SystemTime,
    /// When the backup finished.
    pub end_time: SystemTime,
    /// When the backup is deleted.
    pub expire_time: SystemTime,
    /// Whether the backup is ready.
    pub state: BackupState,
    /// How the backup is encrypted.
    pub encryption_info: Option<EncryptionInfo>,
    /// The storage tier.
    pub backup_type: BackupType,
    /// When a hot backup becomes a standard one.
    pub hot_to_standard_time: Option<SystemTime>,
}

impl BackupInfo {
    fn from_proto(backup: &Backup) -> Result<Self> {
        Ok(Self {
            name: resource::last_segment(&backup.name).to_owned(),
            source_table: resource::last_segment(&backup.source_table).to_owned(),
            source_backup: backup.source_backup.clone(),
            size_bytes: backup.size_bytes,
            start_time: required_timestamp(backup.start_time.as_ref(), "start_time")?,
            end_time: required_timestamp(backup.end_time.as_ref(), "end_time")?,
            expire_time: required_timestamp(backup.expire_time.as_ref(), "expire_time")?,
            state: BackupState::from_proto(backup.state),
            encryption_info: backup.encryption_info.as_ref().map(EncryptionInfo::from_proto),
            backup_type: BackupType::from_proto(backup.backup_type),
            hot_to_standard_time: optional_timestamp(
                backup.hot_to_standard_time.as_ref(),
                "hot_to_standard_time",
            )?,
        })
    }
}

impl AdminClient {
    fn backup_path(&self, cluster: &str, backup: &str) -> String {
        resource::backup_path(&self.prefix, cluster, backup)
    }

    /// Back up a table to a cluster. The backup is deleted at `expire_time`.
    pub async fn create_backup(
        &self,
        table: &str,
        cluster: &str,
        backup: &str,
        expire_time: SystemTime,
    ) -> Result<()> {
        self.create_backup_with_options(table, cluster, backup, BackupOptions::new(expire_time))
            .await
    }

    /// Back up a table to a cluster with explicit options.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn create_backup_with_options(
        &self,
        table: &str,
        cluster: &str,
        backup: &str,
        options: BackupOptions,
    ) -> Result<()> {
        let expire_time = options
            .expire_time
            .ok_or_else(|| Error::invalid("expire_time is a required option"))?;
        let mut backup_type = options.backup_type;
        if options.hot_to_standard_time.is_some() {
            backup_type = BackupType::Hot;
        }
        let request = CreateBackupRequest {
            parent: self.cluster_path(cluster),
            backup_id: backup.to_owned(),
            backup: Some(Backup {
                source_table: self.table_path(table),
                expire_time: Some(timestamp_to_proto(expire_time)),
                backup_type: backup_type.to_proto(),
                hot_to_standard_time: options.hot_to_standard_time.map(timestamp_to_proto),
                ..Backup::default()
            }),
        };
        let operation = self
            .client
            .clone()
            .create_backup(self.request(request))
            .await?
            .into_inner();
        let _backup: Backup = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Copy a backup of this instance to another cluster, possibly in another project.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn copy_backup(
        &self,
        source_cluster: &str,
        source_backup: &str,
        destination: &BackupDestination,
        expire_time: SystemTime,
    ) -> Result<()> {
        let destination_instance =
            resource::instance_path(&destination.project, &destination.instance);
        let request = CopyBackupRequest {
            parent: resource::cluster_path(&destination_instance, &destination.cluster),
            backup_id: destination.backup.clone(),
            source_backup: self.backup_path(source_cluster, source_backup),
            expire_time: Some(timestamp_to_proto(expire_time)),
        };
        let operation = self
            .client
            .clone()
            .copy_backup(self.request(request))
            .await?
            .into_inner();
        let _backup: Backup = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Every backup in a cluster. Pass `-` to list the backups of all clusters.
    #[must_use]
    pub fn backups(&self, cluster: &str) -> BoxStream<'static, Result<BackupInfo>> {
        let this = self.clone();
        let parent = self.cluster_path(cluster);
        paginate(move |page_token| {
            let this = this.clone();
            let parent = parent.clone();
            async move {
                let response = idempotent!(this.list_backups(ListBackupsRequest {
                    parent: parent.clone(),
                    page_token: page_token.clone(),
                    ..ListBackupsRequest::default()
                }))
                .await?;
                let backups = response
                    .backups
                    .iter()
                    .map(BackupInfo::from_proto)
                    .collect::<Result<Vec<_>>>()?;
                Ok((backups, response.next_page_token))
            }
        })
    }

    /// Details of a single backup.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn backup_info(&self, cluster: &str, backup: &str) -> Result<BackupInfo> {
        let name = self.backup_path(cluster, backup);
        let backup = idempotent!(self.get_backup(GetBackupRequest { name: name.clone() })).await?;
        BackupInfo::from_proto(&backup)
    }

    /// Delete a backup.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_backup(&self, cluster: &str, backup: &str) -> Result<()> {
        let request = DeleteBackupRequest {
            name: self.backup_path(cluster, backup),
        };
        let _response = self.client.clone().delete_backup(self.request(request)).await?;
        Ok(())
    }

    async fn patch_backup(&self, backup: Backup, path: &str) -> Result<()> {
        let request = UpdateBackupRequest {
            backup: Some(backup),
            update_mask: Some(prost_types::FieldMask {
                paths: vec![path.to_owned()],
            }),
        };
        let _backup = self.client.clone().update_backup(self.request(request)).await?;
        Ok(())
    }

    /// Change when a backup expires.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_backup(
        &self,
        cluster: &str,
        backup: &str,
        expire_time: SystemTime,
    ) -> Result<()> {
        let update = Backup {
            name: self.backup_path(cluster, backup),
            expire_time: Some(timestamp_to_proto(expire_time)),
            ..Backup::default()
        };
        self.patch_backup(update, "expire_time").await
    }

    /// Change when a hot backup becomes a standard one.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_backup_hot_to_standard_time(
        &self,
        cluster: &str,
        backup: &str,
        hot_to_standard_time: SystemTime,
    ) -> Result<()> {
        let update = Backup {
            name: self.backup_path(cluster, backup),
            hot_to_standard_time: Some(timestamp_to_proto(hot_to_standard_time)),
            ..Backup::default()
        };
        self.patch_backup(update, "hot_to_standard_time").await
    }

    /// Keep a hot backup hot until it expires.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_backup_remove_hot_to_standard_time(
        &self,
        cluster: &str,
        backup: &str,
    ) -> Result<()> {
        let update = Backup {
            name: self.backup_path(cluster, backup),
            ..Backup::default()
        };
        self.patch_backup(update, "hot_to_standard_time").await
    }

    /// Create a table from a backup in this instance.
    pub async fn restore_table(&self, table: &str, cluster: &str, backup: &str) -> Result<()> {
        let instance = self.config.instance.clone();
        self.restore_table_from(&instance, table, cluster, backup)
            .await
    }

    /// Create a table in this instance from a backup in another instance of the same project.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn restore_table_from(
        &self,
        source_instance: &str,
        table: &str,
        source_cluster: &str,
        backup: &str,
    ) -> Result<()> {
        let source_prefix = resource::instance_path(&self.config.project, source_instance);
        let request = RestoreTableRequest {
            parent: self.prefix.clone(),
            table_id: table.to_owned(),
            source: Some(restore_table_request::Source::Backup(resource::backup_path(
                &source_prefix,
                source_cluster,
                backup,
            ))),
        };
        let operation = self
            .client
            .clone()
            .restore_table(self.request(request))
            .await?
            .into_inner();
        let _table: Table = self.operations.wait(operation).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_backup_info_requires_times() {
        let backup = Backup {
            name: "projects/p/instances/i/clusters/c/backups/b".to_owned(),
            source_table: "projects/p/instances/i/tables/t".to_owned(),
            ..Backup::default()
        };
        assert!(matches!(BackupInfo::from_proto(&backup), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_backup_info_from_proto() -> Result<(), Box<dyn std::error::Error>> {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let backup = Backup {
            name: "projects/p/instances/i/clusters/c/backups/b".to_owned(),
            source_table: "projects/p/instances/i/tables/t".to_owned(),
            start_time: Some(timestamp_to_proto(start)),
            end_time: Some(timestamp_to_proto(start + Duration::from_secs(5))),
            expire_time: Some(timestamp_to_proto(start + Duration::from_secs(86_400))),
            state: backup::State::Ready as i32,
            backup_type: backup::BackupType::Hot as i32,
            size_bytes: 42,
            ..Backup::default()
        };
        let info = BackupInfo::from_proto(&backup)?;
        assert_eq!(info.name, "b");
        assert_eq!(info.source_table, "t");
        assert_eq!(info.state, BackupState::Ready);
        assert_eq!(info.backup_type, BackupType::Hot);
        assert_eq!(info.size_bytes, 42);
        assert_eq!(info.hot_to_standard_time, None);
        Ok(())
    }

    #[test]
    fn test_options() {
        let expire = SystemTime::UNIX_EPOCH;
        assert_eq!(BackupOptions::new(expire).backup_type, BackupType::Unspecified);
        assert_eq!(BackupOptions::new(expire).hot().backup_type, BackupType::Hot);
        let options = BackupOptions::new(expire).hot_to_standard_at(expire);
        assert_eq!(options.hot_to_standard_time, Some(expire));
        assert_eq!(BackupOptions::default().expire_time, None);
    }
}
