use super::AdminClient;
use crate::conv::{duration_to_proto, required_timestamp};
use crate::internal_macros::idempotent;
use crate::pager::paginate;
use crate::proto::admin::{
    CreateTableFromSnapshotRequest, DeleteSnapshotRequest, GetSnapshotRequest,
    ListSnapshotsRequest, Snapshot, SnapshotTableRequest, Table,
};
use crate::{resource, Result};
use futures::stream::BoxStream;
use std::time::{Duration, SystemTime};

/// A point-in-time snapshot of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// The snapshot id.
    pub name: String,
    /// The id of the table the snapshot was taken from.
    pub source_table: String,
    /// The size of the snapshot.
    pub data_size: i64,
    /// When the snapshot was taken.
    pub create_time: SystemTime,
    /// When the snapshot is deleted.
    pub delete_time: SystemTime,
}

impl SnapshotInfo {
    fn from_proto(snapshot: &Snapshot) -> Result<Self> {
        Ok(Self {
            name: resource::last_segment(&snapshot.name).to_owned(),
            source_table: snapshot
                .source_table
                .as_ref()
                .map(|table| resource::last_segment(&table.name).to_owned())
                .unwrap_or_default(),
            data_size: snapshot.data_size_bytes,
            create_time: required_timestamp(snapshot.create_time.as_ref(), "create_time")?,
            delete_time: required_timestamp(snapshot.delete_time.as_ref(), "delete_time")?,
        })
    }
}

impl AdminClient {
    fn snapshot_path(&self, cluster: &str, snapshot: &str) -> String {
        resource::snapshot_path(&self.prefix, cluster, snapshot)
    }

    /// Snapshot a table into a cluster. A zero `ttl` uses the server's default lifetime.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn snapshot_table(
        &self,
        table: &str,
        cluster: &str,
        snapshot: &str,
        ttl: Duration,
    ) -> Result<()> {
        let request = SnapshotTableRequest {
            name: self.table_path(table),
            cluster: self.cluster_path(cluster),
            snapshot_id: snapshot.to_owned(),
            ttl: (!ttl.is_zero()).then(|| duration_to_proto(ttl)),
            description: String::new(),
        };
        let operation = self
            .client
            .clone()
            .snapshot_table(self.request(request))
            .await?
            .into_inner();
        let _snapshot: Snapshot = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Create a table from a snapshot.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn create_table_from_snapshot(
        &self,
        table: &str,
        cluster: &str,
        snapshot: &str,
    ) -> Result<()> {
        let request = CreateTableFromSnapshotRequest {
            parent: self.prefix.clone(),
            table_id: table.to_owned(),
            source_snapshot: self.snapshot_path(cluster, snapshot),
        };
        let operation = self
            .client
            .clone()
            .create_table_from_snapshot(self.request(request))
            .await?
            .into_inner();
        let _table: Table = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Every snapshot in a cluster. Pass `-` to list the snapshots of all clusters.
    #[must_use]
    pub fn snapshots(&self, cluster: &str) -> BoxStream<'static, Result<SnapshotInfo>> {
        let this = self.clone();
        let parent = self.cluster_path(cluster);
        paginate(move |page_token| {
            let this = this.clone();
            let parent = parent.clone();
            async move {
                let response = idempotent!(this.list_snapshots(ListSnapshotsRequest {
                    parent: parent.clone(),
                    page_size: 0,
                    page_token: page_token.clone(),
                }))
                .await?;
                let snapshots = response
                    .snapshots
                    .iter()
                    .map(SnapshotInfo::from_proto)
                    .collect::<Result<Vec<_>>>()?;
                Ok((snapshots, response.next_page_token))
            }
        })
    }

    /// Details of a single snapshot.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn snapshot_info(&self, cluster: &str, snapshot: &str) -> Result<SnapshotInfo> {
        let name = self.snapshot_path(cluster, snapshot);
        let snapshot =
            idempotent!(self.get_snapshot(GetSnapshotRequest { name: name.clone() })).await?;
        SnapshotInfo::from_proto(&snapshot)
    }

    /// Delete a snapshot.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_snapshot(&self, cluster: &str, snapshot: &str) -> Result<()> {
        let request = DeleteSnapshotRequest {
            name: self.snapshot_path(cluster, snapshot),
        };
        let _response = self
            .client
            .clone()
            .delete_snapshot(self.request(request))
            .await?;
        Ok(())
    }
}
