use super::{InstanceAdminClient, Listing};
use crate::internal_macros::idempotent;
use crate::proto::admin::{
    cluster, AutoscalingLimits, AutoscalingTargets, Cluster, CreateClusterRequest,
    DeleteClusterRequest, GetClusterRequest, ListClustersRequest, PartialUpdateClusterRequest,
};
use crate::{resource, Result};
use std::fmt;

/// The storage medium of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageType {
    /// Solid-state drives.
    #[default]
    Ssd,
    /// Hard disk drives.
    Hdd,
}

impl StorageType {
    pub(crate) const fn to_proto(self) -> i32 {
        match self {
            Self::Ssd => 1,
            Self::Hdd => 2,
        }
    }

    pub(crate) const fn from_proto(value: i32) -> Self {
        if value == 2 {
            Self::Hdd
        } else {
            Self::Ssd
        }
    }
}

/// The increment in which the node count of a cluster can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeScalingFactor {
    /// Left to the server, which uses 1X.
    #[default]
    Unspecified,
    /// One unit of capacity per node.
    OneX,
    /// Node counts must be even.
    TwoX,
}

impl NodeScalingFactor {
    const fn to_proto(self) -> i32 {
        match self {
            Self::Unspecified => 0,
            Self::OneX => 1,
            Self::TwoX => 2,
        }
    }

    const fn from_proto(value: i32) -> Self {
        match value {
            1 => Self::OneX,
            2 => Self::TwoX,
            _ => Self::Unspecified,
        }
    }
}

/// Autoscaling limits and targets of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutoscalingConfig {
    /// At least 1.
    pub min_nodes: i32,
    /// At least `min_nodes`.
    pub max_nodes: i32,
    /// The CPU utilization the autoscaler aims for.
    pub cpu_target_percent: i32,
    /// The storage the autoscaler aims for per node, in GiB. Zero uses the server default.
    pub storage_utilization_per_node: i32,
}

impl AutoscalingConfig {
    pub(crate) const fn to_proto(self) -> cluster::ClusterAutoscalingConfig {
        cluster::ClusterAutoscalingConfig {
            autoscaling_limits: Some(AutoscalingLimits {
                min_serve_nodes: self.min_nodes,
                max_serve_nodes: self.max_nodes,
            }),
            autoscaling_targets: Some(AutoscalingTargets {
                cpu_utilization_percent: self.cpu_target_percent,
                storage_utilization_gib_per_node: self.storage_utilization_per_node,
            }),
        }
    }

    /// Read the autoscaling settings of a cluster. Both limits and targets must be present.
    pub(crate) fn from_proto(config: Option<&cluster::Config>) -> Option<Self> {
        let cluster::Config::ClusterConfig(config) = config?;
        let autoscaling = config.cluster_autoscaling_config.as_ref()?;
        let limits = autoscaling.autoscaling_limits.as_ref()?;
        let targets = autoscaling.autoscaling_targets.as_ref()?;
        Some(Self {
            min_nodes: limits.min_serve_nodes,
            max_nodes: limits.max_serve_nodes,
            cpu_target_percent: targets.cpu_utilization_percent,
            storage_utilization_per_node: targets.storage_utilization_gib_per_node,
        })
    }
}

/// Everything needed to create a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    /// The instance the cluster belongs to.
    pub instance_id: String,
    /// The cluster id.
    pub cluster_id: String,
    /// The zone holding the cluster's nodes and storage, e.g. `us-central1-b`.
    pub zone: String,
    /// One of `num_nodes` and `autoscaling` is required.
    pub num_nodes: i32,
    /// The storage type of the cluster.
    pub storage_type: StorageType,
    /// A customer-managed key for encryption at rest. Empty uses the default encryption.
    pub kms_key_name: String,
    /// Takes precedence over `num_nodes`.
    pub autoscaling: Option<AutoscalingConfig>,
    /// How much capacity each node provides.
    pub node_scaling_factor: NodeScalingFactor,
}

impl ClusterConfig {
    pub(crate) fn to_proto(&self, project: &str) -> Cluster {
        Cluster {
            serve_nodes: self.num_nodes,
            default_storage_type: self.storage_type.to_proto(),
            location: resource::location_path(project, &self.zone),
            encryption_config: Some(cluster::EncryptionConfig {
                kms_key_name: self.kms_key_name.clone(),
            }),
            node_scaling_factor: self.node_scaling_factor.to_proto(),
            config: self.autoscaling.map(|autoscaling| {
                cluster::Config::ClusterConfig(cluster::ClusterConfig {
                    cluster_autoscaling_config: Some(autoscaling.to_proto()),
                })
            }),
            ..Cluster::default()
        }
    }
}

/// Whether a cluster is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterState {
    /// The state was not reported.
    #[default]
    NotKnown,
    /// Serving.
    Ready,
    /// Being created.
    Creating,
    /// Changing size.
    Resizing,
    /// Not serving.
    Disabled,
}

impl ClusterState {
    const fn from_proto(value: i32) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::Creating,
            3 => Self::Resizing,
            4 => Self::Disabled,
            _ => Self::NotKnown,
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotKnown => "STATE_NOT_KNOWN",
            Self::Ready => "READY",
            Self::Creating => "CREATING",
            Self::Resizing => "RESIZING",
            Self::Disabled => "DISABLED",
        })
    }
}

/// A cluster as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    /// The cluster id.
    pub name: String,
    /// The zone the cluster runs in.
    pub zone: String,
    /// The number of nodes.
    pub serve_nodes: i32,
    /// Whether the cluster is serving.
    pub state: ClusterState,
    /// The storage type.
    pub storage_type: StorageType,
    /// The customer-managed encryption key, if any.
    pub kms_key_name: String,
    /// Autoscaling limits and targets, if enabled.
    pub autoscaling: Option<AutoscalingConfig>,
    /// How much capacity each node provides.
    pub node_scaling_factor: NodeScalingFactor,
}

impl ClusterInfo {
    pub(crate) fn from_proto(cluster: &Cluster) -> Self {
        Self {
            name: resource::last_segment(&cluster.name).to_owned(),
            zone: resource::last_segment(&cluster.location).to_owned(),
            serve_nodes: cluster.serve_nodes,
            state: ClusterState::from_proto(cluster.state),
            storage_type: StorageType::from_proto(cluster.default_storage_type),
            kms_key_name: cluster
                .encryption_config
                .as_ref()
                .map(|config| config.kms_key_name.clone())
                .unwrap_or_default(),
            autoscaling: AutoscalingConfig::from_proto(cluster.config.as_ref()),
            node_scaling_factor: NodeScalingFactor::from_proto(cluster.node_scaling_factor),
        }
    }
}

impl InstanceAdminClient {
    fn cluster_path(&self, instance: &str, cluster: &str) -> String {
        resource::cluster_path(&self.instance_path(instance), cluster)
    }

    /// Create a cluster in an existing instance.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(cluster = %conf.cluster_id)))]
    pub async fn create_cluster(&self, conf: &ClusterConfig) -> Result<()> {
        let request = CreateClusterRequest {
            parent: self.instance_path(&conf.instance_id),
            cluster_id: conf.cluster_id.clone(),
            cluster: Some(conf.to_proto(&self.config.project)),
        };
        let operation = self
            .client
            .clone()
            .create_cluster(self.request(request))
            .await?
            .into_inner();
        let _cluster: Cluster = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Delete a cluster. The last cluster of an instance cannot be deleted.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_cluster(&self, instance: &str, cluster: &str) -> Result<()> {
        let request = DeleteClusterRequest {
            name: self.cluster_path(instance, cluster),
        };
        let _response = self
            .client
            .clone()
            .delete_cluster(self.request(request))
            .await?;
        Ok(())
    }

    async fn patch_cluster(&self, cluster: Cluster, paths: &[&str]) -> Result<()> {
        let request = PartialUpdateClusterRequest {
            cluster: Some(cluster),
            update_mask: Some(prost_types::FieldMask {
                paths: paths.iter().map(|&p| p.to_owned()).collect(),
            }),
        };
        let operation = self
            .client
            .clone()
            .partial_update_cluster(self.request(request))
            .await?
            .into_inner();
        let _cluster: Cluster = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Turn on autoscaling for a cluster, or change its settings.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn set_autoscaling(
        &self,
        instance: &str,
        cluster: &str,
        autoscaling: AutoscalingConfig,
    ) -> Result<()> {
        let update = Cluster {
            name: self.cluster_path(instance, cluster),
            config: Some(cluster::Config::ClusterConfig(cluster::ClusterConfig {
                cluster_autoscaling_config: Some(autoscaling.to_proto()),
            })),
            ..Cluster::default()
        };
        self.patch_cluster(update, &["cluster_config.cluster_autoscaling_config"])
            .await
    }

    /// Give a cluster a fixed number of nodes. Autoscaling is turned off.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn update_cluster(
        &self,
        instance: &str,
        cluster: &str,
        serve_nodes: i32,
    ) -> Result<()> {
        let update = Cluster {
            name: self.cluster_path(instance, cluster),
            serve_nodes,
            config: None,
            ..Cluster::default()
        };
        self.patch_cluster(
            update,
            &["serve_nodes", "cluster_config.cluster_autoscaling_config"],
        )
        .await
    }

    /// Every cluster of an instance. Pass `-` to list the clusters of all instances.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn clusters(&self, instance: &str) -> Result<Listing<ClusterInfo>> {
        let parent = self.instance_path(instance);
        let mut listing = Listing {
            items: Vec::new(),
            unavailable_locations: Vec::new(),
        };
        let mut page_token = String::new();
        loop {
            let response = idempotent!(self.list_clusters(ListClustersRequest {
                parent: parent.clone(),
                page_token: page_token.clone(),
            }))
            .await?;
            listing
                .items
                .extend(response.clusters.iter().map(ClusterInfo::from_proto));
            listing
                .unavailable_locations
                .extend(response.failed_locations);
            if response.next_page_token.is_empty() {
                return Ok(listing);
            }
            page_token = response.next_page_token;
        }
    }

    /// Details of a single cluster.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn get_cluster(&self, instance: &str, cluster: &str) -> Result<ClusterInfo> {
        let name = self.cluster_path(instance, cluster);
        let cluster =
            idempotent!(self.get_cluster(GetClusterRequest { name: name.clone() })).await?;
        Ok(ClusterInfo::from_proto(&cluster))
    }
}
