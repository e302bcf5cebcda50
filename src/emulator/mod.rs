//! An in-memory implementation of the service.
//!
//! [`Emulator`] serves table administration, instance administration, row reads and writes, and
//! operation lookups over one shared state. Nothing is persisted. Long-running operations are
//! finished before the call that starts them returns, and stay available to `GetOperation`.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! bigtable::emulator::Emulator::new()
//!     .serve("127.0.0.1:8086".parse()?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod data;
mod filter;
mod instance_admin;
mod operations;
mod table_admin;

use crate::operation::completed;
use crate::proto::admin::bigtable_instance_admin_server::BigtableInstanceAdminServer;
use crate::proto::admin::bigtable_table_admin_server::BigtableTableAdminServer;
use crate::proto::admin::{
    AppProfile, AuthorizedView, Backup, Cluster, Instance, LogicalView, MaterializedView,
    SchemaBundle, Snapshot, Table,
};
use crate::proto::data::bigtable_server::BigtableServer;
use crate::proto::iam::Policy;
use crate::proto::longrunning::operations_server::OperationsServer;
use crate::proto::longrunning::Operation;
use crate::tracing_shim::{info, trace};
use prost::Message;
use regex::Regex;
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use tonic::transport::server::Router;
use tonic::transport::Server;
use tonic::Status;

/// Prefix of the type URLs of operation results.
const TYPE_URL_PREFIX: &str = "type.googleapis.com/google.bigtable.admin.v2.";

/// Ids of tables, clusters, backups and the like.
static RESOURCE_ID: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // the pattern is a literal
    Regex::new(r"^[_a-zA-Z0-9][-_.a-zA-Z0-9]{0,49}$").unwrap()
});

/// One version of a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Cell {
    timestamp: i64,
    value: Vec<u8>,
}

/// Qualifier to cell versions, newest first.
type Columns = BTreeMap<Vec<u8>, Vec<Cell>>;
/// Family name to columns.
type RowData = BTreeMap<String, Columns>;
/// Row key to row.
type Rows = BTreeMap<Vec<u8>, RowData>;

/// A table together with its rows.
#[derive(Debug, Clone, Default)]
struct TableState {
    meta: Table,
    rows: Rows,
}

/// A backup together with the schema and rows it captured.
#[derive(Debug, Clone)]
struct BackupState {
    meta: Backup,
    table: Table,
    rows: Rows,
}

/// A snapshot together with the rows it captured. The schema lives in `meta.source_table`.
#[derive(Debug, Clone)]
struct SnapshotState {
    meta: Snapshot,
    rows: Rows,
}

/// Everything the emulator knows, keyed by fully qualified resource name.
#[derive(Debug, Default)]
struct State {
    instances: BTreeMap<String, Instance>,
    clusters: BTreeMap<String, Cluster>,
    app_profiles: BTreeMap<String, AppProfile>,
    logical_views: BTreeMap<String, LogicalView>,
    materialized_views: BTreeMap<String, MaterializedView>,
    tables: BTreeMap<String, TableState>,
    authorized_views: BTreeMap<String, AuthorizedView>,
    backups: BTreeMap<String, BackupState>,
    snapshots: BTreeMap<String, SnapshotState>,
    schema_bundles: BTreeMap<String, SchemaBundle>,
    operations: BTreeMap<String, Operation>,
    policies: BTreeMap<String, Policy>,
    next_operation: u64,
}

impl State {
    /// Record a finished operation whose response is `response`, a message of type `kind`.
    fn record<M: Message>(&mut self, kind: &str, response: &M) -> Operation {
        self.next_operation += 1;
        let name = format!("operations/emulator/{}", self.next_operation);
        let operation = completed(name.clone(), &format!("{TYPE_URL_PREFIX}{kind}"), response);
        trace!(%name, kind, "operation finished");
        let _previous = self.operations.insert(name, operation.clone());
        operation
    }

    fn table(&self, name: &str) -> Result<&TableState, Status> {
        self.tables.get(name).ok_or_else(|| not_found("table", name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableState, Status> {
        self.tables.get_mut(name).ok_or_else(|| not_found("table", name))
    }

    /// Remove every resource whose name lies under `prefix`.
    fn remove_under(&mut self, prefix: &str) {
        let under = |name: &String| {
            name.strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
        };
        self.clusters.retain(|name, _| !under(name));
        self.app_profiles.retain(|name, _| !under(name));
        self.logical_views.retain(|name, _| !under(name));
        self.materialized_views.retain(|name, _| !under(name));
        self.tables.retain(|name, _| !under(name));
        self.authorized_views.retain(|name, _| !under(name));
        self.backups.retain(|name, _| !under(name));
        self.snapshots.retain(|name, _| !under(name));
        self.schema_bundles.retain(|name, _| !under(name));
        self.policies.retain(|name, _| !under(name));
    }
}

/// The in-memory service. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Emulator {
    state: Arc<Mutex<State>>,
}

impl Emulator {
    /// An emulator with no instances or tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, Status> {
        self.state
            .lock()
            .map_err(|_| Status::internal("emulator state is poisoned"))
    }

    /// A server router exposing every service of the emulator.
    #[must_use]
    pub fn into_router(self) -> Router {
        Server::builder()
            .add_service(BigtableTableAdminServer::new(self.clone()))
            .add_service(BigtableInstanceAdminServer::new(self.clone()))
            .add_service(BigtableServer::new(self.clone()))
            .add_service(OperationsServer::new(self))
    }

    /// Serve the emulator on `addr` until the process exits.
    pub async fn serve(self, addr: SocketAddr) -> crate::Result<()> {
        info!(%addr, "emulator listening");
        self.into_router().serve(addr).await?;
        Ok(())
    }
}

/// The hex SHA-256 digest of an encoded resource.
fn etag<M: Message>(message: &M) -> String {
    format!("{:x}", Sha256::digest(message.encode_to_vec()))
}

fn not_found(kind: &str, name: &str) -> Status {
    Status::not_found(format!("{kind} {name} not found"))
}

fn already_exists(kind: &str, name: &str) -> Status {
    Status::already_exists(format!("{kind} {name} already exists"))
}

fn validate_id(kind: &str, id: &str) -> Result<(), Status> {
    if RESOURCE_ID.is_match(id) {
        Ok(())
    } else {
        Err(Status::invalid_argument(format!("invalid {kind} id {id:?}")))
    }
}

/// Check a caller-supplied etag against the current one. An empty etag always matches.
fn check_etag(supplied: &str, current: &str) -> Result<(), Status> {
    if supplied.is_empty() || supplied == current {
        Ok(())
    } else {
        Err(Status::aborted("etag mismatch"))
    }
}

/// The paths of a required update mask.
fn mask_paths(mask: Option<prost_types::FieldMask>) -> Result<Vec<String>, Status> {
    match mask {
        Some(mask) if !mask.paths.is_empty() => Ok(mask.paths),
        _ => Err(Status::invalid_argument("an update mask is required")),
    }
}

fn unknown_path(path: &str) -> Status {
    Status::invalid_argument(format!("unsupported update mask path {path:?}"))
}

/// Whether `path` is `{collection}/{id}`.
fn is_member(path: &str, collection: &str) -> bool {
    path.strip_prefix(collection)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|id| !id.is_empty() && !id.contains('/'))
}

/// Whether `name` is a direct child of `parent` in the `collection`, e.g. `{parent}/tables/{id}`.
fn is_child(name: &str, parent: &str, collection: &str) -> bool {
    name.strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| is_member(rest, collection))
}

/// Whether a resource under a cluster belongs to `parent`, where a cluster id of `-` matches every
/// cluster of the instance.
fn in_cluster(name: &str, parent: &str, collection: &str) -> bool {
    match parent.strip_suffix("/clusters/-") {
        Some(instance) => name
            .strip_prefix(instance)
            .and_then(|rest| rest.strip_prefix("/clusters/"))
            .and_then(|rest| rest.split_once('/'))
            .is_some_and(|(cluster, rest)| !cluster.is_empty() && is_member(rest, collection)),
        None => is_child(name, parent, collection),
    }
}

/// Split `items` into the page starting at `page_token` and the token of the next page.
///
/// Tokens are offsets. A page size of zero returns everything that is left.
fn page<T>(items: Vec<T>, page_size: i32, page_token: &str) -> Result<(Vec<T>, String), Status> {
    let start = if page_token.is_empty() {
        0
    } else {
        page_token
            .parse::<usize>()
            .map_err(|_| Status::invalid_argument("invalid page token"))?
    };
    let size = usize::try_from(page_size).unwrap_or(0);
    let mut items: Vec<T> = items.into_iter().skip(start).collect();
    if size == 0 || items.len() <= size {
        return Ok((items, String::new()));
    }
    let _rest = items.split_off(size);
    Ok((items, (start + size).to_string()))
}

/// The approximate size of one row, in bytes.
fn row_size(key: &[u8], row: &RowData) -> i64 {
    let cells: usize = row
        .iter()
        .flat_map(|(family, columns)| {
            columns.iter().map(move |(qualifier, cells)| {
                family.len()
                    + qualifier.len()
                    + cells.iter().map(|cell| cell.value.len() + 8).sum::<usize>()
            })
        })
        .sum();
    i64::try_from(key.len() + cells).unwrap_or(i64::MAX)
}

/// The approximate size of a set of rows, in bytes.
fn rows_size(rows: &Rows) -> i64 {
    rows.iter()
        .map(|(key, row)| row_size(key, row))
        .fold(0, i64::saturating_add)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_page() -> Result<(), Box<dyn std::error::Error>> {
        let (first, token) = page(vec![1, 2, 3, 4, 5], 2, "")?;
        assert_eq!((first, token.as_str()), (vec![1, 2], "2"));
        let (second, token) = page(vec![1, 2, 3, 4, 5], 2, &token)?;
        assert_eq!((second, token.as_str()), (vec![3, 4], "4"));
        let (last, token) = page(vec![1, 2, 3, 4, 5], 2, &token)?;
        assert_eq!((last, token.as_str()), (vec![5], ""));
        assert!(page(vec![1], 0, "x").is_err());
        Ok(())
    }

    #[test]
    fn test_children() {
        let instance = "projects/p/instances/i";
        assert!(is_child("projects/p/instances/i/tables/t", instance, "tables"));
        assert!(!is_child("projects/p/instances/i/tables/t/authorizedViews/v", instance, "tables"));
        assert!(!is_child("projects/p/instances/ij/tables/t", instance, "tables"));

        let backup = "projects/p/instances/i/clusters/c1/backups/b";
        assert!(in_cluster(backup, "projects/p/instances/i/clusters/c1", "backups"));
        assert!(in_cluster(backup, "projects/p/instances/i/clusters/-", "backups"));
        assert!(!in_cluster(backup, "projects/p/instances/i/clusters/c2", "backups"));
        assert!(!in_cluster(backup, "projects/p/instances/j/clusters/-", "backups"));
    }

    #[test]
    fn test_ids() {
        assert!(validate_id("table", "my-table_1.x").is_ok());
        assert!(validate_id("table", "").is_err());
        assert!(validate_id("table", "-leading").is_err());
        assert!(validate_id("table", &"x".repeat(51)).is_err());
    }

    #[test]
    fn test_etag_tracks_content() {
        let a = Table {
            name: "a".to_owned(),
            ..Table::default()
        };
        let b = Table {
            name: "b".to_owned(),
            ..Table::default()
        };
        assert_eq!(etag(&a), etag(&a.clone()));
        assert_ne!(etag(&a), etag(&b));
        assert_eq!(etag(&a).len(), 64);
    }
}
