//! Table administration: tables, column families, backups, snapshots, authorized views and schema
//! bundles.

use super::operations::grant_all;
use super::{
    already_exists, check_etag, etag, in_cluster, is_child, mask_paths, not_found, page,
    rows_size, unknown_path, validate_id, BackupState, Emulator, SnapshotState, State, TableState,
};
use crate::conv::{duration_from_proto, timestamp_to_proto};
use crate::proto::admin::bigtable_table_admin_server::BigtableTableAdmin;
use crate::proto::admin::{
    authorized_view, backup, drop_row_range_request, encryption_info,
    modify_column_families_request::modification::Mod, restore_table_request, snapshot, table,
    AuthorizedView, Backup, BackupInfo, CheckConsistencyRequest, CheckConsistencyResponse,
    CopyBackupRequest, CreateAuthorizedViewRequest, CreateBackupRequest,
    CreateSchemaBundleRequest, CreateTableFromSnapshotRequest, CreateTableRequest,
    DeleteAuthorizedViewRequest, DeleteBackupRequest, DeleteSchemaBundleRequest,
    DeleteSnapshotRequest, DeleteTableRequest, DropRowRangeRequest, EncryptionInfo,
    GenerateConsistencyTokenRequest, GenerateConsistencyTokenResponse, GetAuthorizedViewRequest,
    GetBackupRequest, GetSchemaBundleRequest, GetSnapshotRequest, GetTableRequest,
    ListAuthorizedViewsRequest, ListAuthorizedViewsResponse, ListBackupsRequest,
    ListBackupsResponse, ListSchemaBundlesRequest, ListSchemaBundlesResponse,
    ListSnapshotsRequest, ListSnapshotsResponse, ListTablesRequest, ListTablesResponse,
    ModifyColumnFamiliesRequest, RestoreInfo, RestoreTableRequest, SchemaBundle, Snapshot,
    SnapshotTableRequest, Table, UpdateAuthorizedViewRequest, UpdateBackupRequest,
    UpdateSchemaBundleRequest, UpdateTableRequest,
};
use crate::proto::iam::{
    GetIamPolicyRequest, Policy, SetIamPolicyRequest, TestIamPermissionsRequest,
    TestIamPermissionsResponse,
};
use crate::proto::longrunning::Operation;
use crate::tracing_shim::debug;
use crate::RpcResponse;
use std::collections::HashMap;
use std::time::SystemTime;
use tonic::{Request, Response, Status};

/// The token every consistency check accepts.
const CONSISTENCY_TOKEN: &str = "emulator-consistency-token";

/// The instance part of a name under an instance, e.g. of `{instance}/tables/{table}`.
fn instance_of<'a>(name: &'a str, collection: &str) -> Result<&'a str, Status> {
    name.split_once(&format!("/{collection}/"))
        .map(|(instance, _)| instance)
        .ok_or_else(|| Status::invalid_argument(format!("malformed resource name {name:?}")))
}

impl State {
    /// What a table looks like through `view`.
    fn table_view(&self, meta: &Table, view: i32) -> Table {
        let name_only = Table {
            name: meta.name.clone(),
            ..Table::default()
        };
        if view == table::View::NameOnly as i32 {
            return name_only;
        }
        let cluster_states = || -> HashMap<String, table::ClusterState> {
            let Ok(instance) = instance_of(&meta.name, "tables") else {
                return HashMap::new();
            };
            self.clusters
                .keys()
                .filter(|cluster| is_child(cluster, instance, "clusters"))
                .map(|cluster| {
                    (
                        crate::resource::last_segment(cluster).to_owned(),
                        table::ClusterState {
                            replication_state: table::cluster_state::ReplicationState::Ready as i32,
                            encryption_info: vec![EncryptionInfo {
                                encryption_type:
                                    encryption_info::EncryptionType::GoogleDefaultEncryption as i32,
                                encryption_status: None,
                                kms_key_version: String::new(),
                            }],
                        },
                    )
                })
                .collect()
        };
        let schema = Table {
            cluster_states: HashMap::new(),
            ..meta.clone()
        };
        match table::View::try_from(view) {
            Ok(table::View::ReplicationView | table::View::EncryptionView) => Table {
                cluster_states: cluster_states(),
                ..name_only
            },
            Ok(table::View::Full) => Table {
                cluster_states: cluster_states(),
                ..schema
            },
            _ => schema,
        }
    }

    fn create_table(&mut self, name: String, mut meta: Table, rows: super::Rows) -> Result<Table, Status> {
        if self.tables.contains_key(&name) {
            return Err(already_exists("table", &name));
        }
        meta.name.clone_from(&name);
        meta.granularity = table::TimestampGranularity::Millis as i32;
        let _previous = self.tables.insert(name, TableState { meta: meta.clone(), rows });
        Ok(meta)
    }
}

/// Apply the masked fields of `update` to `table`.
fn update_table_fields(
    table: &mut Table,
    update: Table,
    paths: &[String],
    ignore_warnings: bool,
) -> Result<(), Status> {
    for path in paths {
        match path.as_str() {
            "deletion_protection" => table.deletion_protection = update.deletion_protection,
            "change_stream_config" => {
                table.change_stream_config.clone_from(&update.change_stream_config);
            }
            "change_stream_config.retention_period" => {
                let retention = update
                    .change_stream_config
                    .as_ref()
                    .and_then(|config| config.retention_period);
                table.change_stream_config = Some(crate::proto::admin::ChangeStreamConfig {
                    retention_period: retention,
                });
            }
            "automated_backup_policy" => {
                table.automated_backup_config.clone_from(&update.automated_backup_config);
            }
            "automated_backup_policy.retention_period" | "automated_backup_policy.frequency" => {
                let Some(table::AutomatedBackupConfig::AutomatedBackupPolicy(source)) =
                    &update.automated_backup_config
                else {
                    return Err(Status::invalid_argument("automated backup policy is missing"));
                };
                let mut policy = match &table.automated_backup_config {
                    Some(table::AutomatedBackupConfig::AutomatedBackupPolicy(policy)) => policy.clone(),
                    None => table::AutomatedBackupPolicy::default(),
                };
                if path.ends_with("retention_period") {
                    policy.retention_period = source.retention_period;
                } else {
                    policy.frequency = source.frequency;
                }
                table.automated_backup_config =
                    Some(table::AutomatedBackupConfig::AutomatedBackupPolicy(policy));
            }
            "row_key_schema" => {
                if update.row_key_schema.is_none() && !ignore_warnings {
                    return Err(Status::failed_precondition(
                        "removing the row key schema requires ignore_warnings",
                    ));
                }
                table.row_key_schema.clone_from(&update.row_key_schema);
            }
            other => return Err(unknown_path(other)),
        }
    }
    Ok(())
}

/// An expiry time must be given and lie in the future.
fn validate_expire_time(expire_time: Option<&prost_types::Timestamp>) -> Result<(), Status> {
    let Some(expire_time) = expire_time else {
        return Err(Status::invalid_argument("expire_time is required"));
    };
    let now = timestamp_to_proto(SystemTime::now());
    if (expire_time.seconds, expire_time.nanos) <= (now.seconds, now.nanos) {
        return Err(Status::invalid_argument("expire_time must be in the future"));
    }
    Ok(())
}

/// A timestamp `ttl` after now.
fn after(ttl: Option<&prost_types::Duration>) -> Option<prost_types::Timestamp> {
    let ttl = duration_from_proto(ttl?);
    SystemTime::now().checked_add(ttl).map(timestamp_to_proto)
}

#[tonic::async_trait]
impl BigtableTableAdmin for Emulator {
    async fn create_table(&self, request: Request<CreateTableRequest>) -> RpcResponse<Table> {
        let CreateTableRequest {
            parent,
            table_id,
            table,
            initial_splits: _,
        } = request.into_inner();
        validate_id("table", &table_id)?;
        debug!(%parent, %table_id, "create table");
        let name = format!("{parent}/tables/{table_id}");
        let mut state = self.state()?;
        let table = state.create_table(name, table.unwrap_or_default(), super::Rows::new())?;
        Ok(Response::new(table))
    }

    async fn create_table_from_snapshot(
        &self,
        request: Request<CreateTableFromSnapshotRequest>,
    ) -> RpcResponse<Operation> {
        let CreateTableFromSnapshotRequest {
            parent,
            table_id,
            source_snapshot,
        } = request.into_inner();
        validate_id("table", &table_id)?;
        let mut state = self.state()?;
        let snapshot = state
            .snapshots
            .get(&source_snapshot)
            .cloned()
            .ok_or_else(|| not_found("snapshot", &source_snapshot))?;
        let meta = Table {
            column_families: snapshot
                .meta
                .source_table
                .map(|source| source.column_families)
                .unwrap_or_default(),
            ..Table::default()
        };
        let table = state.create_table(format!("{parent}/tables/{table_id}"), meta, snapshot.rows)?;
        Ok(Response::new(state.record("Table", &table)))
    }

    async fn list_tables(&self, request: Request<ListTablesRequest>) -> RpcResponse<ListTablesResponse> {
        let ListTablesRequest {
            parent,
            view,
            page_size,
            page_token,
        } = request.into_inner();
        let state = self.state()?;
        let view = if view == table::View::Unspecified as i32 {
            table::View::NameOnly as i32
        } else {
            view
        };
        let tables = state
            .tables
            .iter()
            .filter(|(name, _)| is_child(name, &parent, "tables"))
            .map(|(_, table)| state.table_view(&table.meta, view))
            .collect();
        let (tables, next_page_token) = page(tables, page_size, &page_token)?;
        Ok(Response::new(ListTablesResponse {
            tables,
            next_page_token,
        }))
    }

    async fn get_table(&self, request: Request<GetTableRequest>) -> RpcResponse<Table> {
        let GetTableRequest { name, view } = request.into_inner();
        let state = self.state()?;
        let table = state.table(&name)?;
        Ok(Response::new(state.table_view(&table.meta, view)))
    }

    async fn update_table(&self, request: Request<UpdateTableRequest>) -> RpcResponse<Operation> {
        let UpdateTableRequest {
            table,
            update_mask,
            ignore_warnings,
        } = request.into_inner();
        let update = table.ok_or_else(|| Status::invalid_argument("table is required"))?;
        let paths = mask_paths(update_mask)?;
        let mut state = self.state()?;
        let name = update.name.clone();
        let table = state.table_mut(&name)?;
        let mut meta = table.meta.clone();
        update_table_fields(&mut meta, update, &paths, ignore_warnings)?;
        table.meta = meta.clone();
        Ok(Response::new(state.record("Table", &meta)))
    }

    async fn delete_table(&self, request: Request<DeleteTableRequest>) -> RpcResponse<()> {
        let DeleteTableRequest { name } = request.into_inner();
        let mut state = self.state()?;
        if state.table(&name)?.meta.deletion_protection {
            return Err(Status::failed_precondition(format!(
                "table {name} is protected against deletion"
            )));
        }
        let _table = state.tables.remove(&name);
        state.remove_under(&name);
        Ok(Response::new(()))
    }

    async fn create_authorized_view(
        &self,
        request: Request<CreateAuthorizedViewRequest>,
    ) -> RpcResponse<Operation> {
        let CreateAuthorizedViewRequest {
            parent,
            authorized_view_id,
            authorized_view,
        } = request.into_inner();
        validate_id("authorized view", &authorized_view_id)?;
        let mut state = self.state()?;
        let _table = state.table(&parent)?;
        let name = format!("{parent}/authorizedViews/{authorized_view_id}");
        if state.authorized_views.contains_key(&name) {
            return Err(already_exists("authorized view", &name));
        }
        let mut view = AuthorizedView {
            name: name.clone(),
            etag: String::new(),
            ..authorized_view.unwrap_or_default()
        };
        view.etag = etag(&view);
        let _previous = state.authorized_views.insert(name, view.clone());
        Ok(Response::new(state.record("AuthorizedView", &view)))
    }

    async fn list_authorized_views(
        &self,
        request: Request<ListAuthorizedViewsRequest>,
    ) -> RpcResponse<ListAuthorizedViewsResponse> {
        let ListAuthorizedViewsRequest {
            parent,
            page_size,
            page_token,
            view,
        } = request.into_inner();
        let state = self.state()?;
        let _table = state.table(&parent)?;
        let name_only = view == authorized_view::ResponseView::NameOnly as i32;
        let views = state
            .authorized_views
            .iter()
            .filter(|(name, _)| is_child(name, &parent, "authorizedViews"))
            .map(|(name, view)| {
                if name_only {
                    AuthorizedView {
                        name: name.clone(),
                        ..AuthorizedView::default()
                    }
                } else {
                    view.clone()
                }
            })
            .collect();
        let (authorized_views, next_page_token) = page(views, page_size, &page_token)?;
        Ok(Response::new(ListAuthorizedViewsResponse {
            authorized_views,
            next_page_token,
        }))
    }

    async fn get_authorized_view(
        &self,
        request: Request<GetAuthorizedViewRequest>,
    ) -> RpcResponse<AuthorizedView> {
        let GetAuthorizedViewRequest { name, view } = request.into_inner();
        let state = self.state()?;
        let stored = state
            .authorized_views
            .get(&name)
            .ok_or_else(|| not_found("authorized view", &name))?;
        if view == authorized_view::ResponseView::NameOnly as i32 {
            return Ok(Response::new(AuthorizedView {
                name,
                ..AuthorizedView::default()
            }));
        }
        Ok(Response::new(stored.clone()))
    }

    async fn update_authorized_view(
        &self,
        request: Request<UpdateAuthorizedViewRequest>,
    ) -> RpcResponse<Operation> {
        let UpdateAuthorizedViewRequest {
            authorized_view,
            update_mask,
            ignore_warnings: _,
        } = request.into_inner();
        let update =
            authorized_view.ok_or_else(|| Status::invalid_argument("authorized view is required"))?;
        let paths = mask_paths(update_mask)?;
        let mut state = self.state()?;
        let stored = state
            .authorized_views
            .get_mut(&update.name)
            .ok_or_else(|| not_found("authorized view", &update.name))?;
        check_etag(&update.etag, &stored.etag)?;
        let mut view = stored.clone();
        for path in &paths {
            match path.as_str() {
                "subset_view" => view.authorized_view.clone_from(&update.authorized_view),
                "deletion_protection" => view.deletion_protection = update.deletion_protection,
                other => return Err(unknown_path(other)),
            }
        }
        view.etag = String::new();
        view.etag = etag(&view);
        stored.clone_from(&view);
        Ok(Response::new(state.record("AuthorizedView", &view)))
    }

    async fn delete_authorized_view(
        &self,
        request: Request<DeleteAuthorizedViewRequest>,
    ) -> RpcResponse<()> {
        let DeleteAuthorizedViewRequest { name, etag } = request.into_inner();
        let mut state = self.state()?;
        let view = state
            .authorized_views
            .get(&name)
            .ok_or_else(|| not_found("authorized view", &name))?;
        check_etag(&etag, &view.etag)?;
        if view.deletion_protection {
            return Err(Status::failed_precondition(format!(
                "authorized view {name} is protected against deletion"
            )));
        }
        let _view = state.authorized_views.remove(&name);
        Ok(Response::new(()))
    }

    async fn modify_column_families(
        &self,
        request: Request<ModifyColumnFamiliesRequest>,
    ) -> RpcResponse<Table> {
        let ModifyColumnFamiliesRequest {
            name,
            modifications,
            ignore_warnings: _,
        } = request.into_inner();
        let mut state = self.state()?;
        let table = state.table_mut(&name)?;
        let mut meta = table.meta.clone();
        let mut dropped = Vec::new();
        for modification in modifications {
            let id = modification.id;
            match modification.r#mod {
                Some(Mod::Create(family)) => {
                    if meta.column_families.contains_key(&id) {
                        return Err(already_exists("column family", &id));
                    }
                    let _previous = meta.column_families.insert(id, family);
                }
                Some(Mod::Update(family)) => {
                    let existing = meta
                        .column_families
                        .get_mut(&id)
                        .ok_or_else(|| not_found("column family", &id))?;
                    match modification.update_mask {
                        Some(mask) if !mask.paths.is_empty() => {
                            for path in &mask.paths {
                                match path.as_str() {
                                    "gc_rule" => existing.gc_rule.clone_from(&family.gc_rule),
                                    "value_type" => existing.value_type.clone_from(&family.value_type),
                                    other => return Err(unknown_path(other)),
                                }
                            }
                        }
                        _ => existing.gc_rule.clone_from(&family.gc_rule),
                    }
                }
                Some(Mod::Drop(_)) => {
                    if meta.column_families.remove(&id).is_none() {
                        return Err(not_found("column family", &id));
                    }
                    dropped.push(id);
                }
                None => return Err(Status::invalid_argument("modification has no change")),
            }
        }
        for family in &dropped {
            for row in table.rows.values_mut() {
                let _cells = row.remove(family);
            }
        }
        table.rows.retain(|_, row| !row.is_empty());
        table.meta.clone_from(&meta);
        Ok(Response::new(state.table_view(&meta, table::View::SchemaView as i32)))
    }

    async fn drop_row_range(&self, request: Request<DropRowRangeRequest>) -> RpcResponse<()> {
        let DropRowRangeRequest { name, target } = request.into_inner();
        let mut state = self.state()?;
        let table = state.table_mut(&name)?;
        match target {
            Some(drop_row_range_request::Target::RowKeyPrefix(prefix)) => {
                table.rows.retain(|key, _| !key.starts_with(&prefix));
            }
            Some(drop_row_range_request::Target::DeleteAllDataFromTable(true)) => table.rows.clear(),
            _ => return Err(Status::invalid_argument("no rows to drop were given")),
        }
        Ok(Response::new(()))
    }

    async fn generate_consistency_token(
        &self,
        request: Request<GenerateConsistencyTokenRequest>,
    ) -> RpcResponse<GenerateConsistencyTokenResponse> {
        let GenerateConsistencyTokenRequest { name } = request.into_inner();
        let _table = self.state()?.table(&name)?;
        Ok(Response::new(GenerateConsistencyTokenResponse {
            consistency_token: CONSISTENCY_TOKEN.to_owned(),
        }))
    }

    async fn check_consistency(
        &self,
        request: Request<CheckConsistencyRequest>,
    ) -> RpcResponse<CheckConsistencyResponse> {
        let CheckConsistencyRequest {
            name,
            consistency_token,
        } = request.into_inner();
        let _table = self.state()?.table(&name)?;
        if consistency_token != CONSISTENCY_TOKEN {
            return Err(Status::invalid_argument("unknown consistency token"));
        }
        Ok(Response::new(CheckConsistencyResponse { consistent: true }))
    }

    async fn snapshot_table(&self, request: Request<SnapshotTableRequest>) -> RpcResponse<Operation> {
        let SnapshotTableRequest {
            name,
            cluster,
            snapshot_id,
            ttl,
            description,
        } = request.into_inner();
        validate_id("snapshot", &snapshot_id)?;
        let mut state = self.state()?;
        let table = state.table(&name)?.clone();
        let snapshot_name = format!("{cluster}/snapshots/{snapshot_id}");
        if state.snapshots.contains_key(&snapshot_name) {
            return Err(already_exists("snapshot", &snapshot_name));
        }
        let meta = Snapshot {
            name: snapshot_name.clone(),
            source_table: Some(state.table_view(&table.meta, table::View::SchemaView as i32)),
            data_size_bytes: rows_size(&table.rows),
            create_time: Some(timestamp_to_proto(SystemTime::now())),
            delete_time: after(ttl.as_ref()),
            state: snapshot::State::Ready as i32,
            description,
        };
        let _previous = state.snapshots.insert(
            snapshot_name,
            SnapshotState {
                meta: meta.clone(),
                rows: table.rows,
            },
        );
        Ok(Response::new(state.record("Snapshot", &meta)))
    }

    async fn get_snapshot(&self, request: Request<GetSnapshotRequest>) -> RpcResponse<Snapshot> {
        let GetSnapshotRequest { name } = request.into_inner();
        let state = self.state()?;
        let snapshot = state
            .snapshots
            .get(&name)
            .ok_or_else(|| not_found("snapshot", &name))?;
        Ok(Response::new(snapshot.meta.clone()))
    }

    async fn list_snapshots(
        &self,
        request: Request<ListSnapshotsRequest>,
    ) -> RpcResponse<ListSnapshotsResponse> {
        let ListSnapshotsRequest {
            parent,
            page_size,
            page_token,
        } = request.into_inner();
        let state = self.state()?;
        let snapshots = state
            .snapshots
            .iter()
            .filter(|(name, _)| in_cluster(name, &parent, "snapshots"))
            .map(|(_, snapshot)| snapshot.meta.clone())
            .collect();
        let (snapshots, next_page_token) = page(snapshots, page_size, &page_token)?;
        Ok(Response::new(ListSnapshotsResponse {
            snapshots,
            next_page_token,
        }))
    }

    async fn delete_snapshot(&self, request: Request<DeleteSnapshotRequest>) -> RpcResponse<()> {
        let DeleteSnapshotRequest { name } = request.into_inner();
        let mut state = self.state()?;
        if state.snapshots.remove(&name).is_none() {
            return Err(not_found("snapshot", &name));
        }
        Ok(Response::new(()))
    }

    async fn create_backup(&self, request: Request<CreateBackupRequest>) -> RpcResponse<Operation> {
        let CreateBackupRequest {
            parent,
            backup_id,
            backup,
        } = request.into_inner();
        validate_id("backup", &backup_id)?;
        let backup = backup.ok_or_else(|| Status::invalid_argument("backup is required"))?;
        validate_expire_time(backup.expire_time.as_ref())?;
        let mut state = self.state()?;
        let table = state.table(&backup.source_table)?.clone();
        let name = format!("{parent}/backups/{backup_id}");
        if state.backups.contains_key(&name) {
            return Err(already_exists("backup", &name));
        }
        let now = timestamp_to_proto(SystemTime::now());
        let backup_type = if backup.backup_type == backup::BackupType::Unspecified as i32 {
            backup::BackupType::Standard as i32
        } else {
            backup.backup_type
        };
        let meta = Backup {
            name: name.clone(),
            start_time: Some(now),
            end_time: Some(now),
            size_bytes: rows_size(&table.rows),
            state: backup::State::Ready as i32,
            encryption_info: Some(EncryptionInfo {
                encryption_type: encryption_info::EncryptionType::GoogleDefaultEncryption as i32,
                encryption_status: None,
                kms_key_version: String::new(),
            }),
            backup_type,
            ..backup
        };
        let schema = state.table_view(&table.meta, table::View::SchemaView as i32);
        let _previous = state.backups.insert(
            name,
            BackupState {
                meta: meta.clone(),
                table: schema,
                rows: table.rows,
            },
        );
        Ok(Response::new(state.record("Backup", &meta)))
    }

    async fn get_backup(&self, request: Request<GetBackupRequest>) -> RpcResponse<Backup> {
        let GetBackupRequest { name } = request.into_inner();
        let state = self.state()?;
        let backup = state.backups.get(&name).ok_or_else(|| not_found("backup", &name))?;
        Ok(Response::new(backup.meta.clone()))
    }

    async fn update_backup(&self, request: Request<UpdateBackupRequest>) -> RpcResponse<Backup> {
        let UpdateBackupRequest {
            backup,
            update_mask,
        } = request.into_inner();
        let update = backup.ok_or_else(|| Status::invalid_argument("backup is required"))?;
        let paths = mask_paths(update_mask)?;
        let mut state = self.state()?;
        let stored = state
            .backups
            .get_mut(&update.name)
            .ok_or_else(|| not_found("backup", &update.name))?;
        let mut meta = stored.meta.clone();
        for path in &paths {
            match path.as_str() {
                "expire_time" => {
                    validate_expire_time(update.expire_time.as_ref())?;
                    meta.expire_time.clone_from(&update.expire_time);
                }
                "hot_to_standard_time" => meta.hot_to_standard_time.clone_from(&update.hot_to_standard_time),
                other => return Err(unknown_path(other)),
            }
        }
        stored.meta = meta.clone();
        Ok(Response::new(meta))
    }

    async fn delete_backup(&self, request: Request<DeleteBackupRequest>) -> RpcResponse<()> {
        let DeleteBackupRequest { name } = request.into_inner();
        let mut state = self.state()?;
        if state.backups.remove(&name).is_none() {
            return Err(not_found("backup", &name));
        }
        Ok(Response::new(()))
    }

    async fn list_backups(&self, request: Request<ListBackupsRequest>) -> RpcResponse<ListBackupsResponse> {
        let ListBackupsRequest {
            parent,
            page_size,
            page_token,
            ..
        } = request.into_inner();
        let state = self.state()?;
        let backups = state
            .backups
            .iter()
            .filter(|(name, _)| in_cluster(name, &parent, "backups"))
            .map(|(_, backup)| backup.meta.clone())
            .collect();
        let (backups, next_page_token) = page(backups, page_size, &page_token)?;
        Ok(Response::new(ListBackupsResponse {
            backups,
            next_page_token,
        }))
    }

    async fn restore_table(&self, request: Request<RestoreTableRequest>) -> RpcResponse<Operation> {
        let RestoreTableRequest {
            parent,
            table_id,
            source,
        } = request.into_inner();
        validate_id("table", &table_id)?;
        let Some(restore_table_request::Source::Backup(source)) = source else {
            return Err(Status::invalid_argument("a source backup is required"));
        };
        let mut state = self.state()?;
        let backup = state
            .backups
            .get(&source)
            .cloned()
            .ok_or_else(|| not_found("backup", &source))?;
        let meta = Table {
            column_families: backup.table.column_families,
            row_key_schema: backup.table.row_key_schema,
            restore_info: Some(RestoreInfo {
                source_type: crate::proto::admin::RestoreSourceType::Backup as i32,
                source_info: Some(crate::proto::admin::restore_info::SourceInfo::BackupInfo(
                    BackupInfo {
                        backup: source,
                        start_time: backup.meta.start_time,
                        end_time: backup.meta.end_time,
                        source_table: backup.meta.source_table,
                        source_backup: backup.meta.source_backup,
                    },
                )),
            }),
            ..Table::default()
        };
        let table = state.create_table(format!("{parent}/tables/{table_id}"), meta, backup.rows)?;
        Ok(Response::new(state.record("Table", &table)))
    }

    async fn copy_backup(&self, request: Request<CopyBackupRequest>) -> RpcResponse<Operation> {
        let CopyBackupRequest {
            parent,
            backup_id,
            source_backup,
            expire_time,
        } = request.into_inner();
        validate_id("backup", &backup_id)?;
        validate_expire_time(expire_time.as_ref())?;
        let mut state = self.state()?;
        let source = state
            .backups
            .get(&source_backup)
            .cloned()
            .ok_or_else(|| not_found("backup", &source_backup))?;
        let name = format!("{parent}/backups/{backup_id}");
        if state.backups.contains_key(&name) {
            return Err(already_exists("backup", &name));
        }
        let meta = Backup {
            name: name.clone(),
            source_backup,
            expire_time,
            ..source.meta
        };
        let _previous = state.backups.insert(
            name,
            BackupState {
                meta: meta.clone(),
                ..source
            },
        );
        Ok(Response::new(state.record("Backup", &meta)))
    }

    async fn get_iam_policy(&self, request: Request<GetIamPolicyRequest>) -> RpcResponse<Policy> {
        let GetIamPolicyRequest { resource } = request.into_inner();
        Ok(Response::new(self.state()?.policy(&resource)))
    }

    async fn set_iam_policy(&self, request: Request<SetIamPolicyRequest>) -> RpcResponse<Policy> {
        let SetIamPolicyRequest { resource, policy } = request.into_inner();
        let policy = policy.ok_or_else(|| Status::invalid_argument("policy is required"))?;
        Ok(Response::new(self.state()?.set_policy(&resource, policy)?))
    }

    async fn test_iam_permissions(
        &self,
        request: Request<TestIamPermissionsRequest>,
    ) -> RpcResponse<TestIamPermissionsResponse> {
        Ok(Response::new(grant_all(request.into_inner().permissions)))
    }

    async fn create_schema_bundle(
        &self,
        request: Request<CreateSchemaBundleRequest>,
    ) -> RpcResponse<Operation> {
        let CreateSchemaBundleRequest {
            parent,
            schema_bundle_id,
            schema_bundle,
        } = request.into_inner();
        validate_id("schema bundle", &schema_bundle_id)?;
        let mut state = self.state()?;
        let _table = state.table(&parent)?;
        let name = format!("{parent}/schemaBundles/{schema_bundle_id}");
        if state.schema_bundles.contains_key(&name) {
            return Err(already_exists("schema bundle", &name));
        }
        let mut bundle = SchemaBundle {
            name: name.clone(),
            etag: String::new(),
            ..schema_bundle.unwrap_or_default()
        };
        bundle.etag = etag(&bundle);
        let _previous = state.schema_bundles.insert(name, bundle.clone());
        Ok(Response::new(state.record("SchemaBundle", &bundle)))
    }

    async fn update_schema_bundle(
        &self,
        request: Request<UpdateSchemaBundleRequest>,
    ) -> RpcResponse<Operation> {
        let UpdateSchemaBundleRequest {
            schema_bundle,
            update_mask,
            ignore_warnings: _,
        } = request.into_inner();
        let update =
            schema_bundle.ok_or_else(|| Status::invalid_argument("schema bundle is required"))?;
        let paths = mask_paths(update_mask)?;
        let mut state = self.state()?;
        let stored = state
            .schema_bundles
            .get_mut(&update.name)
            .ok_or_else(|| not_found("schema bundle", &update.name))?;
        check_etag(&update.etag, &stored.etag)?;
        let mut bundle = stored.clone();
        for path in &paths {
            match path.as_str() {
                "proto_schema" => bundle.r#type.clone_from(&update.r#type),
                other => return Err(unknown_path(other)),
            }
        }
        bundle.etag = String::new();
        bundle.etag = etag(&bundle);
        stored.clone_from(&bundle);
        Ok(Response::new(state.record("SchemaBundle", &bundle)))
    }

    async fn get_schema_bundle(
        &self,
        request: Request<GetSchemaBundleRequest>,
    ) -> RpcResponse<SchemaBundle> {
        let GetSchemaBundleRequest { name } = request.into_inner();
        let state = self.state()?;
        let bundle = state
            .schema_bundles
            .get(&name)
            .ok_or_else(|| not_found("schema bundle", &name))?;
        Ok(Response::new(bundle.clone()))
    }

    async fn list_schema_bundles(
        &self,
        request: Request<ListSchemaBundlesRequest>,
    ) -> RpcResponse<ListSchemaBundlesResponse> {
        let ListSchemaBundlesRequest {
            parent,
            page_size,
            page_token,
        } = request.into_inner();
        let state = self.state()?;
        let _table = state.table(&parent)?;
        let bundles = state
            .schema_bundles
            .iter()
            .filter(|(name, _)| is_child(name, &parent, "schemaBundles"))
            .map(|(_, bundle)| bundle.clone())
            .collect();
        let (schema_bundles, next_page_token) = page(bundles, page_size, &page_token)?;
        Ok(Response::new(ListSchemaBundlesResponse {
            schema_bundles,
            next_page_token,
        }))
    }

    async fn delete_schema_bundle(
        &self,
        request: Request<DeleteSchemaBundleRequest>,
    ) -> RpcResponse<()> {
        let DeleteSchemaBundleRequest { name, etag } = request.into_inner();
        let mut state = self.state()?;
        let bundle = state
            .schema_bundles
            .get(&name)
            .ok_or_else(|| not_found("schema bundle", &name))?;
        check_etag(&etag, &bundle.etag)?;
        let _bundle = state.schema_bundles.remove(&name);
        Ok(Response::new(()))
    }
}
