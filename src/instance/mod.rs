//! Instance administration.
//!
//! [`InstanceAdminClient`] manages the instances of a project and the clusters, app profiles,
//! logical views and materialized views inside them.

mod app_profile;
mod cluster;
mod sync;
mod view;

pub use self::app_profile::{
    AppProfileInfo, ComputeBillingOwner, Isolation, Priority, ProfileAttrsToUpdate, ProfileConf,
    RoutingPolicy,
};
pub use self::cluster::{
    AutoscalingConfig, ClusterConfig, ClusterInfo, ClusterState, NodeScalingFactor, StorageType,
};
pub use self::sync::{plan_cluster_sync, ClusterSyncPlan, SyncStep};
pub use self::view::{LogicalViewInfo, MaterializedViewInfo};

use crate::config::ClientConfig;
use crate::iam::{IamHandle, IamService};
use crate::internal_macros::idempotent;
use crate::operation::OperationPoller;
use crate::proto::admin::bigtable_instance_admin_client::BigtableInstanceAdminClient;
use crate::proto::admin::{
    CreateInstanceRequest, DeleteInstanceRequest, GetInstanceRequest, Instance,
    ListInstancesRequest, PartialUpdateInstanceRequest,
};
use crate::tracing_shim::{debug, info};
use crate::{resource, Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use tonic::transport::Channel;

/// Whether an instance is ready to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceState {
    /// The state could not be determined.
    #[default]
    NotKnown,
    /// The instance has been created.
    Ready,
    /// The instance is still being created.
    Creating,
}

impl InstanceState {
    const fn from_proto(value: i32) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::Creating,
            _ => Self::NotKnown,
        }
    }
}

/// The kind of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceType {
    /// Left to the server, which treats it as [`InstanceType::Production`].
    #[default]
    Unspecified,
    /// A production instance.
    Production,
    /// A low-cost instance for development.
    Development,
}

impl InstanceType {
    const fn from_proto(value: i32) -> Self {
        match value {
            1 => Self::Production,
            2 => Self::Development,
            _ => Self::Unspecified,
        }
    }

    const fn to_proto(self) -> i32 {
        match self {
            Self::Unspecified => 0,
            Self::Production => 1,
            Self::Development => 2,
        }
    }
}

/// An instance as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// The instance id.
    pub name: String,
    /// The name shown in user interfaces.
    pub display_name: String,
    /// Whether the instance is serving.
    pub state: InstanceState,
    /// Production or development.
    pub instance_type: InstanceType,
    /// User-defined labels.
    pub labels: BTreeMap<String, String>,
}

impl InstanceInfo {
    fn from_proto(instance: Instance) -> Result<Self> {
        let (_project, id) = resource::parse_instance_name(&instance.name)?;
        Ok(Self {
            name: id.to_owned(),
            display_name: instance.display_name,
            state: InstanceState::from_proto(instance.state),
            instance_type: InstanceType::from_proto(instance.r#type),
            labels: instance.labels.into_iter().collect(),
        })
    }
}

/// Everything needed to create an instance with a single cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceConf {
    /// The instance id.
    pub instance_id: String,
    /// The name shown in user interfaces.
    pub display_name: String,
    /// The id of the single cluster.
    pub cluster_id: String,
    /// The zone of the cluster.
    pub zone: String,
    /// Must be zero for development instances.
    pub num_nodes: i32,
    /// The storage type of the cluster.
    pub storage_type: StorageType,
    /// Production or development.
    pub instance_type: InstanceType,
    /// User-defined labels.
    pub labels: BTreeMap<String, String>,
    /// Autoscaling for the cluster. Takes precedence over `num_nodes`.
    pub autoscaling: Option<AutoscalingConfig>,
    /// How much capacity each node provides.
    pub node_scaling_factor: NodeScalingFactor,
}

/// An instance together with all of its clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceWithClustersConfig {
    /// The instance to create or update.
    pub instance_id: String,
    /// Left unchanged on update when empty.
    pub display_name: String,
    /// Every cluster of the instance.
    pub clusters: Vec<ClusterConfig>,
    /// Left unchanged on update when unspecified.
    pub instance_type: InstanceType,
    /// Left unchanged on update when `None`.
    pub labels: Option<BTreeMap<String, String>>,
}

/// Resources returned by a listing that may have skipped unreachable locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T> {
    /// The resources that were returned.
    pub items: Vec<T>,
    /// Locations that did not respond. Their resources are missing from `items`.
    pub unavailable_locations: Vec<String>,
}

impl<T> Listing<T> {
    /// The items, or [`Error::PartiallyUnavailable`] if any location did not respond.
    pub fn complete(self) -> Result<Vec<T>> {
        if self.unavailable_locations.is_empty() {
            Ok(self.items)
        } else {
            Err(Error::PartiallyUnavailable {
                locations: self.unavailable_locations,
            })
        }
    }
}

/// What [`InstanceAdminClient::update_instance_and_sync_clusters`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateInstanceResults {
    /// Whether the instance itself changed.
    pub instance_updated: bool,
    /// Ids of the clusters created.
    pub created: Vec<String>,
    /// Ids of the clusters deleted.
    pub deleted: Vec<String>,
    /// Ids of the clusters resized.
    pub updated: Vec<String>,
}

impl fmt::Display for UpdateInstanceResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "instance updated: {}, clusters created: {:?}, deleted: {:?}, updated: {:?}",
            self.instance_updated, self.created, self.deleted, self.updated
        )
    }
}

/// Manages the instances of one project.
#[derive(Debug, Clone)]
pub struct InstanceAdminClient {
    client: BigtableInstanceAdminClient<Channel>,
    operations: OperationPoller,
    config: ClientConfig,
    prefix: String,
}

impl InstanceAdminClient {
    /// Connect to the administrative endpoint named in `config`.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let channel = config.connect(&config.admin_endpoint).await?;
        Ok(Self::with_channel(channel, config))
    }

    /// Use an existing channel.
    #[must_use]
    pub fn with_channel(channel: Channel, config: ClientConfig) -> Self {
        let prefix = config.project_name();
        Self {
            client: BigtableInstanceAdminClient::new(channel.clone()),
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

    fn instance_path(&self, instance: &str) -> String {
        resource::instance_path(&self.config.project, instance)
    }

    /// Create an instance with a single cluster.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(instance = %conf.instance_id)))]
    pub async fn create_instance(&self, conf: &InstanceConf) -> Result<()> {
        let conf = InstanceWithClustersConfig {
            instance_id: conf.instance_id.clone(),
            display_name: conf.display_name.clone(),
            instance_type: conf.instance_type,
            labels: Some(conf.labels.clone()),
            clusters: vec![ClusterConfig {
                instance_id: conf.instance_id.clone(),
                cluster_id: conf.cluster_id.clone(),
                zone: conf.zone.clone(),
                num_nodes: conf.num_nodes,
                storage_type: conf.storage_type,
                kms_key_name: String::new(),
                autoscaling: conf.autoscaling,
                node_scaling_factor: conf.node_scaling_factor,
            }],
        };
        self.create_instance_with_clusters(&conf).await
    }

    /// Create an instance with any number of clusters.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(instance = %conf.instance_id)))]
    pub async fn create_instance_with_clusters(
        &self,
        conf: &InstanceWithClustersConfig,
    ) -> Result<()> {
        let request = CreateInstanceRequest {
            parent: self.prefix.clone(),
            instance_id: conf.instance_id.clone(),
            instance: Some(Instance {
                display_name: conf.display_name.clone(),
                r#type: conf.instance_type.to_proto(),
                labels: conf
                    .labels
                    .iter()
                    .flatten()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                ..Instance::default()
            }),
            clusters: conf
                .clusters
                .iter()
                .map(|cluster| (cluster.cluster_id.clone(), cluster.to_proto(&self.config.project)))
                .collect(),
        };
        let operation = self
            .client
            .clone()
            .create_instance(self.request(request))
            .await?
            .into_inner();
        let _instance: Instance = self.operations.wait(operation).await?;
        info!("instance created");
        Ok(())
    }

    /// Apply the instance-level settings of `conf`. Returns whether anything was sent.
    async fn update_instance(&self, conf: &InstanceWithClustersConfig) -> Result<bool> {
        if conf.instance_id.is_empty() {
            return Err(Error::invalid("instance id is required"));
        }
        let mut instance = Instance {
            name: self.instance_path(&conf.instance_id),
            ..Instance::default()
        };
        let mut paths = Vec::new();
        if !conf.display_name.is_empty() {
            instance.display_name = conf.display_name.clone();
            paths.push("display_name".to_owned());
        }
        if conf.instance_type != InstanceType::Unspecified {
            instance.r#type = conf.instance_type.to_proto();
            paths.push("type".to_owned());
        }
        if let Some(labels) = &conf.labels {
            instance.labels = labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            paths.push("labels".to_owned());
        }
        if paths.is_empty() {
            return Ok(false);
        }

        let request = PartialUpdateInstanceRequest {
            instance: Some(instance),
            update_mask: Some(prost_types::FieldMask { paths }),
        };
        let operation = self
            .client
            .clone()
            .partial_update_instance(self.request(request))
            .await?
            .into_inner();
        let _instance: Instance = self.operations.wait(operation).await?;
        Ok(true)
    }

    /// Update the cluster described by `cluster`, if it asks for a change.
    async fn resize_cluster(&self, instance: &str, cluster: &ClusterConfig) -> Result<bool> {
        if let Some(autoscaling) = cluster.autoscaling {
            self.set_autoscaling(instance, &cluster.cluster_id, autoscaling)
                .await?;
        } else if cluster.num_nodes > 0 {
            self.update_cluster(instance, &cluster.cluster_id, cluster.num_nodes)
                .await?;
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Update an instance and the size of its clusters.
    ///
    /// The display name, type and labels change only when set. Each cluster is switched to its
    /// autoscaling configuration if it has one, or resized to `num_nodes` if that is positive.
    /// Other cluster fields are ignored. The call can fail after the instance itself was updated;
    /// the error says so.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(instance = %conf.instance_id)))]
    pub async fn update_instance_with_clusters(
        &self,
        conf: &InstanceWithClustersConfig,
    ) -> Result<()> {
        if conf.clusters.iter().any(|cluster| cluster.cluster_id.is_empty()) {
            return Err(Error::invalid("cluster id is required for every cluster"));
        }
        let instance_updated = self.update_instance(conf).await?;
        for cluster in &conf.clusters {
            if let Err(err) = self.resize_cluster(&conf.instance_id, cluster).await {
                return Err(if instance_updated {
                    err.context(format!(
                        "updating cluster {:?} failed after the instance update succeeded",
                        cluster.cluster_id
                    ))
                } else {
                    err
                });
            }
        }
        Ok(())
    }

    /// Update an instance and make its clusters match `conf.clusters`.
    ///
    /// Clusters present in both are updated as in
    /// [`update_instance_with_clusters`](Self::update_instance_with_clusters). Missing clusters
    /// are created and extra ones deleted, in the order given by [`plan_cluster_sync`]. On
    /// failure the error describes the changes already made.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(instance = %conf.instance_id)))]
    pub async fn update_instance_and_sync_clusters(
        &self,
        conf: &InstanceWithClustersConfig,
    ) -> Result<UpdateInstanceResults> {
        if conf.clusters.is_empty() {
            return Err(Error::invalid("an instance needs at least one cluster"));
        }
        if conf.clusters.iter().any(|cluster| cluster.cluster_id.is_empty()) {
            return Err(Error::invalid("cluster id is required for every cluster"));
        }
        let existing = self.clusters(&conf.instance_id).await?.complete()?;
        let mut results = UpdateInstanceResults {
            instance_updated: self.update_instance(conf).await?,
            ..UpdateInstanceResults::default()
        };

        let existing: Vec<&str> = existing.iter().map(|c| c.name.as_str()).collect();
        let desired: Vec<&str> = conf.clusters.iter().map(|c| c.cluster_id.as_str()).collect();
        let plan = plan_cluster_sync(&existing, &desired);
        debug!(?plan, "synchronizing clusters");

        for id in &plan.update {
            let Some(cluster) = conf.clusters.iter().find(|c| &c.cluster_id == id) else {
                continue;
            };
            match self.resize_cluster(&conf.instance_id, cluster).await {
                Ok(true) => results.updated.push(id.clone()),
                Ok(false) => {}
                Err(err) => {
                    return Err(err.context(format!(
                        "updating cluster {id:?} failed; progress: {results}"
                    )))
                }
            }
        }

        for step in plan.steps {
            match step {
                SyncStep::Delete(id) => {
                    if let Err(err) = self.delete_cluster(&conf.instance_id, &id).await {
                        return Err(err.context(format!(
                            "deleting cluster {id:?} failed; progress: {results}"
                        )));
                    }
                    results.deleted.push(id);
                }
                SyncStep::Create(id) => {
                    let Some(cluster) = conf.clusters.iter().find(|c| c.cluster_id == id) else {
                        continue;
                    };
                    let cluster = ClusterConfig {
                        instance_id: conf.instance_id.clone(),
                        ..cluster.clone()
                    };
                    if let Err(err) = self.create_cluster(&cluster).await {
                        return Err(err.context(format!(
                            "creating cluster {id:?} failed; progress: {results}"
                        )));
                    }
                    results.created.push(id);
                }
            }
        }
        Ok(results)
    }

    /// Delete an instance and everything in it.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_instance(&self, instance: &str) -> Result<()> {
        let request = DeleteInstanceRequest {
            name: self.instance_path(instance),
        };
        let _response = self
            .client
            .clone()
            .delete_instance(self.request(request))
            .await?;
        Ok(())
    }

    /// Every instance in the project.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn instances(&self) -> Result<Listing<InstanceInfo>> {
        let mut listing = Listing {
            items: Vec::new(),
            unavailable_locations: Vec::new(),
        };
        let mut page_token = String::new();
        loop {
            let response = idempotent!(self.list_instances(ListInstancesRequest {
                parent: self.prefix.clone(),
                page_token: page_token.clone(),
            }))
            .await?;
            for instance in response.instances {
                listing.items.push(InstanceInfo::from_proto(instance)?);
            }
            listing
                .unavailable_locations
                .extend(response.failed_locations);
            if response.next_page_token.is_empty() {
                return Ok(listing);
            }
            page_token = response.next_page_token;
        }
    }

    /// Details of a single instance.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn instance_info(&self, instance: &str) -> Result<InstanceInfo> {
        let name = self.instance_path(instance);
        let instance =
            idempotent!(self.get_instance(GetInstanceRequest { name: name.clone() })).await?;
        InstanceInfo::from_proto(instance)
    }

    /// The access control policy of an instance.
    #[must_use]
    pub fn instance_iam(&self, instance: &str) -> IamHandle {
        IamHandle::new(
            IamService::Instance(self.client.clone()),
            self.instance_path(instance),
            self.prefix.clone(),
            self.config.retry,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_listing_complete() {
        let listing = Listing {
            items: vec![1, 2],
            unavailable_locations: Vec::new(),
        };
        assert_eq!(listing.complete().ok(), Some(vec![1, 2]));

        let partial = Listing {
            items: vec![1],
            unavailable_locations: vec!["us-east1-b".to_owned()],
        };
        assert!(matches!(
            partial.complete(),
            Err(Error::PartiallyUnavailable { locations }) if locations == ["us-east1-b"]
        ));
    }

    #[test]
    fn test_instance_info_parses_name() -> Result<(), Box<dyn std::error::Error>> {
        let info = InstanceInfo::from_proto(Instance {
            name: "projects/p/instances/my-instance".to_owned(),
            display_name: "My instance".to_owned(),
            state: 1,
            r#type: 2,
            ..Instance::default()
        })?;
        assert_eq!(info.name, "my-instance");
        assert_eq!(info.state, InstanceState::Ready);
        assert_eq!(info.instance_type, InstanceType::Development);

        let malformed = InstanceInfo::from_proto(Instance {
            name: "instances/my-instance".to_owned(),
            ..Instance::default()
        });
        assert!(matches!(malformed, Err(Error::Malformed(_))));
        Ok(())
    }

    #[test]
    fn test_results_display() {
        let results = UpdateInstanceResults {
            instance_updated: true,
            created: vec!["c2".to_owned()],
            ..UpdateInstanceResults::default()
        };
        assert_eq!(
            results.to_string(),
            "instance updated: true, clusters created: [\"c2\"], deleted: [], updated: []"
        );
    }
}
