use super::InstanceAdminClient;
use crate::internal_macros::idempotent;
use crate::pager::paginate;
use crate::proto::admin::{
    app_profile, AppProfile, CreateAppProfileRequest, DeleteAppProfileRequest,
    GetAppProfileRequest, ListAppProfilesRequest, UpdateAppProfileRequest,
};
use crate::{resource, Error, Result};
use futures::stream::BoxStream;

/// How requests made through a profile are routed to clusters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Route to the nearest available cluster, failing over on errors.
    MultiClusterUseAny {
        /// The eligible clusters. Empty means all of them.
        cluster_ids: Vec<String>,
        /// Pin each row key to one cluster instead of choosing randomly.
        row_affinity: bool,
    },
    /// Route every request to one cluster.
    SingleCluster {
        /// The cluster that serves the traffic.
        cluster_id: String,
        /// Allow check-and-mutate and read-modify-write requests.
        allow_transactional_writes: bool,
    },
}

impl RoutingPolicy {
    const fn mask_path(&self) -> &'static str {
        match self {
            Self::MultiClusterUseAny { .. } => "multi_cluster_routing_use_any",
            Self::SingleCluster { .. } => "single_cluster_routing",
        }
    }

    fn to_proto(&self) -> app_profile::RoutingPolicy {
        match self {
            Self::MultiClusterUseAny {
                cluster_ids,
                row_affinity,
            } => app_profile::RoutingPolicy::MultiClusterRoutingUseAny(
                app_profile::MultiClusterRoutingUseAny {
                    cluster_ids: cluster_ids.clone(),
                    affinity: row_affinity.then(|| {
                        app_profile::multi_cluster_routing_use_any::Affinity::RowAffinity(
                            app_profile::multi_cluster_routing_use_any::RowAffinity {},
                        )
                    }),
                },
            ),
            Self::SingleCluster {
                cluster_id,
                allow_transactional_writes,
            } => app_profile::RoutingPolicy::SingleClusterRouting(
                app_profile::SingleClusterRouting {
                    cluster_id: cluster_id.clone(),
                    allow_transactional_writes: *allow_transactional_writes,
                },
            ),
        }
    }

    fn from_proto(policy: &app_profile::RoutingPolicy) -> Self {
        match policy {
            app_profile::RoutingPolicy::MultiClusterRoutingUseAny(any) => Self::MultiClusterUseAny {
                cluster_ids: any.cluster_ids.clone(),
                row_affinity: any.affinity.is_some(),
            },
            app_profile::RoutingPolicy::SingleClusterRouting(single) => Self::SingleCluster {
                cluster_id: single.cluster_id.clone(),
                allow_transactional_writes: single.allow_transactional_writes,
            },
        }
    }
}

/// The priority of standard-isolation traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Treated as [`Priority::High`] on creation.
    #[default]
    Unspecified,
    /// Lowest priority.
    Low,
    /// Medium priority.
    Medium,
    /// Highest priority.
    High,
}

/// Who pays for Data Boost compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComputeBillingOwner {
    /// No owner specified.
    #[default]
    Unspecified,
    /// The project holding the instance pays.
    HostPays,
}

/// How traffic from a profile is isolated from other traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// Served by the clusters, at the given priority.
    Standard {
        /// The priority of requests made through the profile.
        priority: Priority,
    },
    /// Served by serverless compute. Read-only, single-cluster routing.
    DataBoostReadOnly {
        /// Who pays for the compute.
        compute_billing_owner: ComputeBillingOwner,
    },
}

impl Isolation {
    const fn mask_path(self) -> &'static str {
        match self {
            Self::Standard { .. } => "standard_isolation",
            Self::DataBoostReadOnly { .. } => "data_boost_isolation_read_only",
        }
    }

    const fn to_proto(self) -> app_profile::Isolation {
        match self {
            Self::Standard { priority } => {
                app_profile::Isolation::StandardIsolation(app_profile::StandardIsolation {
                    priority: match priority {
                        Priority::Unspecified => 0,
                        Priority::Low => 1,
                        Priority::Medium => 2,
                        Priority::High => 3,
                    },
                })
            }
            Self::DataBoostReadOnly {
                compute_billing_owner,
            } => app_profile::Isolation::DataBoostIsolationReadOnly(
                app_profile::DataBoostIsolationReadOnly {
                    compute_billing_owner: Some(match compute_billing_owner {
                        ComputeBillingOwner::Unspecified => 0,
                        ComputeBillingOwner::HostPays => 1,
                    }),
                },
            ),
        }
    }

    const fn from_proto(isolation: &app_profile::Isolation) -> Self {
        match isolation {
            app_profile::Isolation::StandardIsolation(standard) => Self::Standard {
                priority: match standard.priority {
                    1 => Priority::Low,
                    2 => Priority::Medium,
                    3 => Priority::High,
                    _ => Priority::Unspecified,
                },
            },
            app_profile::Isolation::DataBoostIsolationReadOnly(boost) => Self::DataBoostReadOnly {
                compute_billing_owner: match boost.compute_billing_owner {
                    Some(1) => ComputeBillingOwner::HostPays,
                    _ => ComputeBillingOwner::Unspecified,
                },
            },
        }
    }
}

/// Everything needed to create an app profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileConf {
    /// The profile id.
    pub profile_id: String,
    /// The instance the profile belongs to.
    pub instance_id: String,
    /// Pass back on update to detect concurrent changes.
    pub etag: String,
    /// A free-form description.
    pub description: String,
    /// Required.
    pub routing_policy: Option<RoutingPolicy>,
    /// How the profile's traffic is isolated.
    pub isolation: Option<Isolation>,
    /// Proceed even if the server warns about the profile.
    pub ignore_warnings: bool,
}

/// The settings of an app profile to change. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileAttrsToUpdate {
    /// The new description.
    pub description: Option<String>,
    /// The new routing policy.
    pub routing_policy: Option<RoutingPolicy>,
    /// The new isolation.
    pub isolation: Option<Isolation>,
    /// Proceed even if the server warns about the change.
    pub ignore_warnings: bool,
}

impl ProfileAttrsToUpdate {
    /// The update mask for the set fields.
    #[must_use]
    pub fn field_mask_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        if self.description.is_some() {
            paths.push("description".to_owned());
        }
        if let Some(policy) = &self.routing_policy {
            paths.push(policy.mask_path().to_owned());
        }
        if let Some(isolation) = self.isolation {
            paths.push(isolation.mask_path().to_owned());
        }
        paths
    }
}

/// An app profile as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppProfileInfo {
    /// The profile id.
    pub name: String,
    /// Changes whenever the profile does.
    pub etag: String,
    /// A free-form description.
    pub description: String,
    /// How requests are routed.
    pub routing_policy: Option<RoutingPolicy>,
    /// How the profile's traffic is isolated.
    pub isolation: Option<Isolation>,
}

impl AppProfileInfo {
    fn from_proto(profile: &AppProfile) -> Self {
        Self {
            name: resource::last_segment(&profile.name).to_owned(),
            etag: profile.etag.clone(),
            description: profile.description.clone(),
            routing_policy: profile.routing_policy.as_ref().map(RoutingPolicy::from_proto),
            isolation: profile.isolation.as_ref().map(Isolation::from_proto),
        }
    }
}

impl InstanceAdminClient {
    fn app_profile_path(&self, instance: &str, profile: &str) -> String {
        resource::app_profile_path(&self.instance_path(instance), profile)
    }

    /// Create an app profile and return it as stored.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(profile = %conf.profile_id)))]
    pub async fn create_app_profile(&self, conf: &ProfileConf) -> Result<AppProfileInfo> {
        let Some(routing_policy) = &conf.routing_policy else {
            return Err(Error::invalid("a routing policy is required"));
        };
        let request = CreateAppProfileRequest {
            parent: self.instance_path(&conf.instance_id),
            app_profile_id: conf.profile_id.clone(),
            app_profile: Some(AppProfile {
                etag: conf.etag.clone(),
                description: conf.description.clone(),
                routing_policy: Some(routing_policy.to_proto()),
                isolation: conf.isolation.map(Isolation::to_proto),
                ..AppProfile::default()
            }),
            ignore_warnings: conf.ignore_warnings,
        };
        let profile = self
            .client
            .clone()
            .create_app_profile(self.request(request))
            .await?
            .into_inner();
        Ok(AppProfileInfo::from_proto(&profile))
    }

    /// Details of an app profile.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn get_app_profile(&self, instance: &str, profile: &str) -> Result<AppProfileInfo> {
        let name = self.app_profile_path(instance, profile);
        let profile =
            idempotent!(self.get_app_profile(GetAppProfileRequest { name: name.clone() })).await?;
        Ok(AppProfileInfo::from_proto(&profile))
    }

    /// Every app profile of an instance.
    #[must_use]
    pub fn list_app_profiles(&self, instance: &str) -> BoxStream<'static, Result<AppProfileInfo>> {
        let this = self.clone();
        let parent = self.instance_path(instance);
        paginate(move |page_token| {
            let this = this.clone();
            let parent = parent.clone();
            async move {
                let response = idempotent!(this.list_app_profiles(ListAppProfilesRequest {
                    parent: parent.clone(),
                    page_size: 0,
                    page_token: page_token.clone(),
                }))
                .await?;
                let profiles = response
                    .app_profiles
                    .iter()
                    .map(AppProfileInfo::from_proto)
                    .collect();
                Ok((profiles, response.next_page_token))
            }
        })
    }

    /// Change the settings of an app profile.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, attrs)))]
    pub async fn update_app_profile(
        &self,
        instance: &str,
        profile: &str,
        attrs: &ProfileAttrsToUpdate,
    ) -> Result<()> {
        let update = AppProfile {
            name: self.app_profile_path(instance, profile),
            description: attrs.description.clone().unwrap_or_default(),
            routing_policy: attrs.routing_policy.as_ref().map(RoutingPolicy::to_proto),
            isolation: attrs.isolation.map(Isolation::to_proto),
            ..AppProfile::default()
        };
        let request = UpdateAppProfileRequest {
            app_profile: Some(update),
            update_mask: Some(prost_types::FieldMask {
                paths: attrs.field_mask_paths(),
            }),
            ignore_warnings: attrs.ignore_warnings,
        };
        let operation = self
            .client
            .clone()
            .update_app_profile(self.request(request))
            .await?
            .into_inner();
        let _profile: AppProfile = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Delete an app profile, ignoring warnings.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_app_profile(&self, instance: &str, profile: &str) -> Result<()> {
        let request = DeleteAppProfileRequest {
            name: self.app_profile_path(instance, profile),
            ignore_warnings: true,
        };
        let _response = self
            .client
            .clone()
            .delete_app_profile(self.request(request))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_update_mask_order() {
        let attrs = ProfileAttrsToUpdate {
            description: Some("batch jobs".to_owned()),
            routing_policy: Some(RoutingPolicy::SingleCluster {
                cluster_id: "c1".to_owned(),
                allow_transactional_writes: false,
            }),
            isolation: Some(Isolation::DataBoostReadOnly {
                compute_billing_owner: ComputeBillingOwner::HostPays,
            }),
            ignore_warnings: true,
        };
        assert_eq!(
            attrs.field_mask_paths(),
            [
                "description",
                "single_cluster_routing",
                "data_boost_isolation_read_only"
            ]
        );
        assert!(ProfileAttrsToUpdate::default().field_mask_paths().is_empty());
    }

    #[test]
    fn test_policies_survive_conversion() {
        let policy = RoutingPolicy::MultiClusterUseAny {
            cluster_ids: vec!["a".to_owned(), "b".to_owned()],
            row_affinity: true,
        };
        assert_eq!(RoutingPolicy::from_proto(&policy.to_proto()), policy);

        let isolation = Isolation::Standard {
            priority: Priority::Medium,
        };
        assert_eq!(Isolation::from_proto(&isolation.to_proto()), isolation);
    }
}
