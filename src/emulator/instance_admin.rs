//! Instance administration: instances, clusters, app profiles and SQL views.

use super::operations::grant_all;
use super::{
    already_exists, check_etag, etag, is_child, is_member, mask_paths, not_found, page,
    unknown_path, validate_id, Emulator, State,
};
use crate::conv::timestamp_to_proto;
use crate::proto::admin::bigtable_instance_admin_server::BigtableInstanceAdmin;
use crate::proto::admin::{
    app_profile, cluster, instance, AppProfile, Cluster, CreateAppProfileRequest,
    CreateClusterRequest, CreateInstanceRequest, CreateLogicalViewRequest,
    CreateMaterializedViewRequest, DeleteAppProfileRequest, DeleteClusterRequest,
    DeleteInstanceRequest, DeleteLogicalViewRequest, DeleteMaterializedViewRequest,
    GetAppProfileRequest, GetClusterRequest, GetInstanceRequest, GetLogicalViewRequest,
    GetMaterializedViewRequest, Instance, ListAppProfilesRequest, ListAppProfilesResponse,
    ListClustersRequest, ListClustersResponse, ListInstancesRequest, ListInstancesResponse,
    ListLogicalViewsRequest, ListLogicalViewsResponse, ListMaterializedViewsRequest,
    ListMaterializedViewsResponse, LogicalView, MaterializedView, PartialUpdateClusterRequest,
    PartialUpdateInstanceRequest, UpdateAppProfileRequest, UpdateLogicalViewRequest,
    UpdateMaterializedViewRequest,
};
use crate::proto::iam::{
    GetIamPolicyRequest, Policy, SetIamPolicyRequest, TestIamPermissionsRequest,
    TestIamPermissionsResponse,
};
use crate::proto::longrunning::Operation;
use crate::tracing_shim::debug;
use crate::RpcResponse;
use prost::Message;
use std::collections::BTreeMap;
use std::time::SystemTime;
use tonic::{Request, Response, Status};

/// Whether `name` is a cluster of `parent`, where an instance id of `-` matches every instance of
/// the project.
fn cluster_in(name: &str, parent: &str) -> bool {
    match parent.strip_suffix("/instances/-") {
        Some(project) => name
            .strip_prefix(project)
            .and_then(|rest| rest.strip_prefix("/instances/"))
            .and_then(|rest| rest.split_once('/'))
            .is_some_and(|(instance, rest)| !instance.is_empty() && is_member(rest, "clusters")),
        None => is_child(name, parent, "clusters"),
    }
}

impl State {
    fn instance(&self, name: &str) -> Result<&Instance, Status> {
        self.instances
            .get(name)
            .ok_or_else(|| not_found("instance", name))
    }

    fn add_cluster(&mut self, instance: &str, id: &str, cluster: Cluster) -> Result<Cluster, Status> {
        validate_id("cluster", id)?;
        if cluster.serve_nodes < 0 {
            return Err(Status::invalid_argument("serve_nodes must not be negative"));
        }
        let name = format!("{instance}/clusters/{id}");
        if self.clusters.contains_key(&name) {
            return Err(already_exists("cluster", &name));
        }
        let cluster = Cluster {
            name: name.clone(),
            state: cluster::State::Ready as i32,
            ..cluster
        };
        let _previous = self.clusters.insert(name, cluster.clone());
        Ok(cluster)
    }
}

/// The parts of a SQL view the emulator manages. Views are stored, never evaluated.
trait QueryView: Message + Clone {
    /// The full resource name.
    fn name(&self) -> &str;
    /// The etag of the stored version.
    fn current_etag(&self) -> &str;
    /// Whether deletion is refused.
    fn deletion_protected(&self) -> bool;
    /// Name the view and recompute its etag.
    fn seal(&mut self, name: String);
    /// Copy the field at `path` from `update`.
    fn copy_field(&mut self, update: &Self, path: &str) -> Result<(), Status>;
}

macro_rules! query_view {
    ($($view:ty),+) => {$(
        impl QueryView for $view {
            fn name(&self) -> &str {
                &self.name
            }

            fn current_etag(&self) -> &str {
                &self.etag
            }

            fn deletion_protected(&self) -> bool {
                self.deletion_protection
            }

            fn seal(&mut self, name: String) {
                self.name = name;
                self.etag = String::new();
                self.etag = etag(&*self);
            }

            fn copy_field(&mut self, update: &Self, path: &str) -> Result<(), Status> {
                match path {
                    "query" => self.query.clone_from(&update.query),
                    "deletion_protection" => self.deletion_protection = update.deletion_protection,
                    other => return Err(unknown_path(other)),
                }
                Ok(())
            }
        }
    )+};
}

query_view!(LogicalView, MaterializedView);

fn create_view<V: QueryView>(
    views: &mut BTreeMap<String, V>,
    kind: &str,
    name: String,
    mut view: V,
) -> Result<V, Status> {
    if views.contains_key(&name) {
        return Err(already_exists(kind, &name));
    }
    view.seal(name.clone());
    let _previous = views.insert(name, view.clone());
    Ok(view)
}

fn update_view<V: QueryView>(
    views: &mut BTreeMap<String, V>,
    kind: &str,
    update: &V,
    paths: &[String],
) -> Result<V, Status> {
    let stored = views
        .get_mut(update.name())
        .ok_or_else(|| not_found(kind, update.name()))?;
    check_etag(update.current_etag(), stored.current_etag())?;
    let mut view = stored.clone();
    for path in paths {
        view.copy_field(update, path)?;
    }
    view.seal(update.name().to_owned());
    stored.clone_from(&view);
    Ok(view)
}

fn delete_view<V: QueryView>(
    views: &mut BTreeMap<String, V>,
    kind: &str,
    name: &str,
    supplied_etag: &str,
) -> Result<(), Status> {
    let view = views.get(name).ok_or_else(|| not_found(kind, name))?;
    check_etag(supplied_etag, view.current_etag())?;
    if view.deletion_protected() {
        return Err(Status::failed_precondition(format!(
            "{kind} {name} is protected against deletion"
        )));
    }
    let _view = views.remove(name);
    Ok(())
}

fn list_views<V: QueryView>(
    views: &BTreeMap<String, V>,
    parent: &str,
    collection: &str,
    page_size: i32,
    page_token: &str,
) -> Result<(Vec<V>, String), Status> {
    let matching = views
        .iter()
        .filter(|(name, _)| is_child(name, parent, collection))
        .map(|(_, view)| view.clone())
        .collect();
    page(matching, page_size, page_token)
}

/// Copy the masked fields of `update` to `profile`.
fn update_profile_fields(profile: &mut AppProfile, update: &AppProfile, paths: &[String]) -> Result<(), Status> {
    for path in paths {
        match path.as_str() {
            "description" => profile.description.clone_from(&update.description),
            "multi_cluster_routing_use_any" | "single_cluster_routing" => {
                profile.routing_policy.clone_from(&update.routing_policy);
            }
            "standard_isolation" | "data_boost_isolation_read_only" => {
                profile.isolation.clone_from(&update.isolation);
            }
            other => return Err(unknown_path(other)),
        }
    }
    Ok(())
}

#[tonic::async_trait]
impl BigtableInstanceAdmin for Emulator {
    async fn create_instance(&self, request: Request<CreateInstanceRequest>) -> RpcResponse<Operation> {
        let CreateInstanceRequest {
            parent,
            instance_id,
            instance,
            clusters,
        } = request.into_inner();
        validate_id("instance", &instance_id)?;
        if clusters.is_empty() {
            return Err(Status::invalid_argument("an instance needs at least one cluster"));
        }
        debug!(%parent, %instance_id, clusters = clusters.len(), "create instance");
        let name = format!("{parent}/instances/{instance_id}");
        let mut state = self.state()?;
        if state.instances.contains_key(&name) {
            return Err(already_exists("instance", &name));
        }
        let instance = instance.unwrap_or_default();
        let instance = Instance {
            name: name.clone(),
            state: instance::State::Ready as i32,
            r#type: if instance.r#type == instance::Type::Unspecified as i32 {
                instance::Type::Production as i32
            } else {
                instance.r#type
            },
            create_time: Some(timestamp_to_proto(SystemTime::now())),
            ..instance
        };
        for (id, cluster) in clusters {
            if let Err(status) = state.add_cluster(&name, &id, cluster) {
                state.remove_under(&name);
                return Err(status);
            }
        }
        let _previous = state.instances.insert(name, instance.clone());
        Ok(Response::new(state.record("Instance", &instance)))
    }

    async fn get_instance(&self, request: Request<GetInstanceRequest>) -> RpcResponse<Instance> {
        let GetInstanceRequest { name } = request.into_inner();
        Ok(Response::new(self.state()?.instance(&name)?.clone()))
    }

    async fn list_instances(
        &self,
        request: Request<ListInstancesRequest>,
    ) -> RpcResponse<ListInstancesResponse> {
        let ListInstancesRequest { parent, .. } = request.into_inner();
        let state = self.state()?;
        let instances = state
            .instances
            .iter()
            .filter(|(name, _)| is_child(name, &parent, "instances"))
            .map(|(_, instance)| instance.clone())
            .collect();
        Ok(Response::new(ListInstancesResponse {
            instances,
            failed_locations: Vec::new(),
            next_page_token: String::new(),
        }))
    }

    async fn partial_update_instance(
        &self,
        request: Request<PartialUpdateInstanceRequest>,
    ) -> RpcResponse<Operation> {
        let PartialUpdateInstanceRequest {
            instance,
            update_mask,
        } = request.into_inner();
        let update = instance.ok_or_else(|| Status::invalid_argument("instance is required"))?;
        let paths = mask_paths(update_mask)?;
        let mut state = self.state()?;
        let mut instance = state.instance(&update.name)?.clone();
        for path in &paths {
            match path.as_str() {
                "display_name" => instance.display_name.clone_from(&update.display_name),
                "type" => instance.r#type = update.r#type,
                "labels" => instance.labels.clone_from(&update.labels),
                other => return Err(unknown_path(other)),
            }
        }
        let _previous = state.instances.insert(update.name, instance.clone());
        Ok(Response::new(state.record("Instance", &instance)))
    }

    async fn delete_instance(&self, request: Request<DeleteInstanceRequest>) -> RpcResponse<()> {
        let DeleteInstanceRequest { name } = request.into_inner();
        let mut state = self.state()?;
        if state.instances.remove(&name).is_none() {
            return Err(not_found("instance", &name));
        }
        state.remove_under(&name);
        let _policy = state.policies.remove(&name);
        Ok(Response::new(()))
    }

    async fn create_cluster(&self, request: Request<CreateClusterRequest>) -> RpcResponse<Operation> {
        let CreateClusterRequest {
            parent,
            cluster_id,
            cluster,
        } = request.into_inner();
        let mut state = self.state()?;
        let _instance = state.instance(&parent)?;
        let cluster = state.add_cluster(&parent, &cluster_id, cluster.unwrap_or_default())?;
        Ok(Response::new(state.record("Cluster", &cluster)))
    }

    async fn get_cluster(&self, request: Request<GetClusterRequest>) -> RpcResponse<Cluster> {
        let GetClusterRequest { name } = request.into_inner();
        let state = self.state()?;
        let cluster = state
            .clusters
            .get(&name)
            .ok_or_else(|| not_found("cluster", &name))?;
        Ok(Response::new(cluster.clone()))
    }

    async fn list_clusters(&self, request: Request<ListClustersRequest>) -> RpcResponse<ListClustersResponse> {
        let ListClustersRequest { parent, .. } = request.into_inner();
        let state = self.state()?;
        let clusters = state
            .clusters
            .iter()
            .filter(|(name, _)| cluster_in(name, &parent))
            .map(|(_, cluster)| cluster.clone())
            .collect();
        Ok(Response::new(ListClustersResponse {
            clusters,
            failed_locations: Vec::new(),
            next_page_token: String::new(),
        }))
    }

    async fn partial_update_cluster(
        &self,
        request: Request<PartialUpdateClusterRequest>,
    ) -> RpcResponse<Operation> {
        let PartialUpdateClusterRequest {
            cluster,
            update_mask,
        } = request.into_inner();
        let update = cluster.ok_or_else(|| Status::invalid_argument("cluster is required"))?;
        let paths = mask_paths(update_mask)?;
        let mut state = self.state()?;
        let stored = state
            .clusters
            .get_mut(&update.name)
            .ok_or_else(|| not_found("cluster", &update.name))?;
        let mut cluster = stored.clone();
        for path in &paths {
            match path.as_str() {
                "serve_nodes" => {
                    if update.serve_nodes < 0 {
                        return Err(Status::invalid_argument("serve_nodes must not be negative"));
                    }
                    cluster.serve_nodes = update.serve_nodes;
                }
                "cluster_config.cluster_autoscaling_config" => cluster.config.clone_from(&update.config),
                other => return Err(unknown_path(other)),
            }
        }
        stored.clone_from(&cluster);
        Ok(Response::new(state.record("Cluster", &cluster)))
    }

    async fn delete_cluster(&self, request: Request<DeleteClusterRequest>) -> RpcResponse<()> {
        let DeleteClusterRequest { name } = request.into_inner();
        let mut state = self.state()?;
        let Some((instance, _)) = name.split_once("/clusters/") else {
            return Err(Status::invalid_argument(format!("malformed cluster name {name:?}")));
        };
        if !state.clusters.contains_key(&name) {
            return Err(not_found("cluster", &name));
        }
        let siblings = state
            .clusters
            .keys()
            .filter(|cluster| is_child(cluster, instance, "clusters"))
            .count();
        if siblings <= 1 {
            return Err(Status::failed_precondition(format!(
                "cluster {name} is the last cluster of its instance"
            )));
        }
        let _cluster = state.clusters.remove(&name);
        state.remove_under(&name);
        Ok(Response::new(()))
    }

    async fn create_app_profile(
        &self,
        request: Request<CreateAppProfileRequest>,
    ) -> RpcResponse<AppProfile> {
        let CreateAppProfileRequest {
            parent,
            app_profile_id,
            app_profile,
            ignore_warnings,
        } = request.into_inner();
        validate_id("app profile", &app_profile_id)?;
        let mut state = self.state()?;
        let _instance = state.instance(&parent)?;
        let name = format!("{parent}/appProfiles/{app_profile_id}");
        if state.app_profiles.contains_key(&name) {
            return Err(already_exists("app profile", &name));
        }
        let mut profile = app_profile.unwrap_or_default();
        if let Some(app_profile::RoutingPolicy::SingleClusterRouting(routing)) = &profile.routing_policy {
            let cluster = format!("{parent}/clusters/{}", routing.cluster_id);
            if !ignore_warnings && !state.clusters.contains_key(&cluster) {
                return Err(Status::failed_precondition(format!(
                    "app profile routes to unknown cluster {cluster}"
                )));
            }
        }
        if profile.routing_policy.is_none() {
            profile.routing_policy = Some(app_profile::RoutingPolicy::MultiClusterRoutingUseAny(
                app_profile::MultiClusterRoutingUseAny::default(),
            ));
        }
        profile.name.clone_from(&name);
        profile.etag = String::new();
        profile.etag = etag(&profile);
        let _previous = state.app_profiles.insert(name, profile.clone());
        Ok(Response::new(profile))
    }

    async fn get_app_profile(&self, request: Request<GetAppProfileRequest>) -> RpcResponse<AppProfile> {
        let GetAppProfileRequest { name } = request.into_inner();
        let state = self.state()?;
        let profile = state
            .app_profiles
            .get(&name)
            .ok_or_else(|| not_found("app profile", &name))?;
        Ok(Response::new(profile.clone()))
    }

    async fn list_app_profiles(
        &self,
        request: Request<ListAppProfilesRequest>,
    ) -> RpcResponse<ListAppProfilesResponse> {
        let ListAppProfilesRequest {
            parent,
            page_size,
            page_token,
        } = request.into_inner();
        let state = self.state()?;
        let profiles = state
            .app_profiles
            .iter()
            .filter(|(name, _)| is_child(name, &parent, "appProfiles"))
            .map(|(_, profile)| profile.clone())
            .collect();
        let (app_profiles, next_page_token) = page(profiles, page_size, &page_token)?;
        Ok(Response::new(ListAppProfilesResponse {
            app_profiles,
            next_page_token,
            failed_locations: Vec::new(),
        }))
    }

    async fn update_app_profile(
        &self,
        request: Request<UpdateAppProfileRequest>,
    ) -> RpcResponse<Operation> {
        let UpdateAppProfileRequest {
            app_profile,
            update_mask,
            ignore_warnings: _,
        } = request.into_inner();
        let update = app_profile.ok_or_else(|| Status::invalid_argument("app profile is required"))?;
        let paths = mask_paths(update_mask)?;
        let mut state = self.state()?;
        let stored = state
            .app_profiles
            .get_mut(&update.name)
            .ok_or_else(|| not_found("app profile", &update.name))?;
        check_etag(&update.etag, &stored.etag)?;
        let mut profile = stored.clone();
        update_profile_fields(&mut profile, &update, &paths)?;
        profile.etag = String::new();
        profile.etag = etag(&profile);
        stored.clone_from(&profile);
        Ok(Response::new(state.record("AppProfile", &profile)))
    }

    async fn delete_app_profile(&self, request: Request<DeleteAppProfileRequest>) -> RpcResponse<()> {
        let DeleteAppProfileRequest { name, .. } = request.into_inner();
        let mut state = self.state()?;
        if state.app_profiles.remove(&name).is_none() {
            return Err(not_found("app profile", &name));
        }
        Ok(Response::new(()))
    }

    async fn get_iam_policy(&self, request: Request<GetIamPolicyRequest>) -> RpcResponse<Policy> {
        let GetIamPolicyRequest { resource } = request.into_inner();
        let state = self.state()?;
        let _instance = state.instance(&resource)?;
        Ok(Response::new(state.policy(&resource)))
    }

    async fn set_iam_policy(&self, request: Request<SetIamPolicyRequest>) -> RpcResponse<Policy> {
        let SetIamPolicyRequest { resource, policy } = request.into_inner();
        let policy = policy.ok_or_else(|| Status::invalid_argument("policy is required"))?;
        let mut state = self.state()?;
        let _instance = state.instance(&resource)?;
        Ok(Response::new(state.set_policy(&resource, policy)?))
    }

    async fn test_iam_permissions(
        &self,
        request: Request<TestIamPermissionsRequest>,
    ) -> RpcResponse<TestIamPermissionsResponse> {
        Ok(Response::new(grant_all(request.into_inner().permissions)))
    }

    async fn create_logical_view(
        &self,
        request: Request<CreateLogicalViewRequest>,
    ) -> RpcResponse<Operation> {
        let CreateLogicalViewRequest {
            parent,
            logical_view_id,
            logical_view,
        } = request.into_inner();
        validate_id("logical view", &logical_view_id)?;
        let mut state = self.state()?;
        let _instance = state.instance(&parent)?;
        let view = create_view(
            &mut state.logical_views,
            "logical view",
            format!("{parent}/logicalViews/{logical_view_id}"),
            logical_view.unwrap_or_default(),
        )?;
        Ok(Response::new(state.record("LogicalView", &view)))
    }

    async fn get_logical_view(&self, request: Request<GetLogicalViewRequest>) -> RpcResponse<LogicalView> {
        let GetLogicalViewRequest { name } = request.into_inner();
        let state = self.state()?;
        let view = state
            .logical_views
            .get(&name)
            .ok_or_else(|| not_found("logical view", &name))?;
        Ok(Response::new(view.clone()))
    }

    async fn list_logical_views(
        &self,
        request: Request<ListLogicalViewsRequest>,
    ) -> RpcResponse<ListLogicalViewsResponse> {
        let ListLogicalViewsRequest {
            parent,
            page_size,
            page_token,
        } = request.into_inner();
        let state = self.state()?;
        let (logical_views, next_page_token) =
            list_views(&state.logical_views, &parent, "logicalViews", page_size, &page_token)?;
        Ok(Response::new(ListLogicalViewsResponse {
            logical_views,
            next_page_token,
        }))
    }

    async fn update_logical_view(
        &self,
        request: Request<UpdateLogicalViewRequest>,
    ) -> RpcResponse<Operation> {
        let UpdateLogicalViewRequest {
            logical_view,
            update_mask,
        } = request.into_inner();
        let update = logical_view.ok_or_else(|| Status::invalid_argument("logical view is required"))?;
        let paths = mask_paths(update_mask)?;
        let mut state = self.state()?;
        let view = update_view(&mut state.logical_views, "logical view", &update, &paths)?;
        Ok(Response::new(state.record("LogicalView", &view)))
    }

    async fn delete_logical_view(&self, request: Request<DeleteLogicalViewRequest>) -> RpcResponse<()> {
        let DeleteLogicalViewRequest { name, etag } = request.into_inner();
        let mut state = self.state()?;
        delete_view(&mut state.logical_views, "logical view", &name, &etag)?;
        Ok(Response::new(()))
    }

    async fn create_materialized_view(
        &self,
        request: Request<CreateMaterializedViewRequest>,
    ) -> RpcResponse<Operation> {
        let CreateMaterializedViewRequest {
            parent,
            materialized_view_id,
            materialized_view,
        } = request.into_inner();
        validate_id("materialized view", &materialized_view_id)?;
        let mut state = self.state()?;
        let _instance = state.instance(&parent)?;
        let view = create_view(
            &mut state.materialized_views,
            "materialized view",
            format!("{parent}/materializedViews/{materialized_view_id}"),
            materialized_view.unwrap_or_default(),
        )?;
        Ok(Response::new(state.record("MaterializedView", &view)))
    }

    async fn get_materialized_view(
        &self,
        request: Request<GetMaterializedViewRequest>,
    ) -> RpcResponse<MaterializedView> {
        let GetMaterializedViewRequest { name } = request.into_inner();
        let state = self.state()?;
        let view = state
            .materialized_views
            .get(&name)
            .ok_or_else(|| not_found("materialized view", &name))?;
        Ok(Response::new(view.clone()))
    }

    async fn list_materialized_views(
        &self,
        request: Request<ListMaterializedViewsRequest>,
    ) -> RpcResponse<ListMaterializedViewsResponse> {
        let ListMaterializedViewsRequest {
            parent,
            page_size,
            page_token,
        } = request.into_inner();
        let state = self.state()?;
        let (materialized_views, next_page_token) = list_views(
            &state.materialized_views,
            &parent,
            "materializedViews",
            page_size,
            &page_token,
        )?;
        Ok(Response::new(ListMaterializedViewsResponse {
            materialized_views,
            next_page_token,
        }))
    }

    async fn update_materialized_view(
        &self,
        request: Request<UpdateMaterializedViewRequest>,
    ) -> RpcResponse<Operation> {
        let UpdateMaterializedViewRequest {
            materialized_view,
            update_mask,
        } = request.into_inner();
        let update = materialized_view
            .ok_or_else(|| Status::invalid_argument("materialized view is required"))?;
        let paths = mask_paths(update_mask)?;
        let mut state = self.state()?;
        let view = update_view(&mut state.materialized_views, "materialized view", &update, &paths)?;
        Ok(Response::new(state.record("MaterializedView", &view)))
    }

    async fn delete_materialized_view(
        &self,
        request: Request<DeleteMaterializedViewRequest>,
    ) -> RpcResponse<()> {
        let DeleteMaterializedViewRequest { name, etag } = request.into_inner();
        let mut state = self.state()?;
        delete_view(&mut state.materialized_views, "materialized view", &name, &etag)?;
        Ok(Response::new(()))
    }
}
