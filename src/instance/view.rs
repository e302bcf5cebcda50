use super::InstanceAdminClient;
use crate::admin::DeletionProtection;
use crate::internal_macros::idempotent;
use crate::proto::admin::{
    CreateLogicalViewRequest, CreateMaterializedViewRequest, DeleteLogicalViewRequest,
    DeleteMaterializedViewRequest, GetLogicalViewRequest, GetMaterializedViewRequest,
    ListLogicalViewsRequest, ListMaterializedViewsRequest, LogicalView, MaterializedView,
    UpdateLogicalViewRequest, UpdateMaterializedViewRequest,
};
use crate::{resource, Error, Result};

/// A named SQL query over the tables of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalViewInfo {
    /// The view id.
    pub logical_view_id: String,
    /// The SQL query defining the view.
    pub query: String,
    /// Whether the view is protected against deletion.
    pub deletion_protection: DeletionProtection,
}

/// A SQL query whose results are maintained as a read-only table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializedViewInfo {
    /// The view id.
    pub materialized_view_id: String,
    /// The SQL query whose results are maintained.
    pub query: String,
    /// Whether the view is protected against deletion.
    pub deletion_protection: DeletionProtection,
}

/// The update mask for a view change: `query` when set, `deletion_protection` unless `None`.
fn view_mask(query: &str, deletion_protection: DeletionProtection) -> Vec<String> {
    let mut paths = Vec::new();
    if !query.is_empty() {
        paths.push("query".to_owned());
    }
    if deletion_protection != DeletionProtection::None {
        paths.push("deletion_protection".to_owned());
    }
    paths
}

impl InstanceAdminClient {
    /// Create a logical view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(view = %conf.logical_view_id)))]
    pub async fn create_logical_view(&self, instance: &str, conf: &LogicalViewInfo) -> Result<()> {
        if conf.logical_view_id.is_empty() {
            return Err(Error::invalid("logical view id is required"));
        }
        let request = CreateLogicalViewRequest {
            parent: self.instance_path(instance),
            logical_view_id: conf.logical_view_id.clone(),
            logical_view: Some(LogicalView {
                query: conf.query.clone(),
                deletion_protection: conf.deletion_protection == DeletionProtection::Protected,
                ..LogicalView::default()
            }),
        };
        let operation = self
            .client
            .clone()
            .create_logical_view(self.request(request))
            .await?
            .into_inner();
        let _view: LogicalView = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Details of a logical view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn logical_view_info(&self, instance: &str, view: &str) -> Result<LogicalViewInfo> {
        let name = resource::logical_view_path(&self.instance_path(instance), view);
        let view =
            idempotent!(self.get_logical_view(GetLogicalViewRequest { name: name.clone() }))
                .await?;
        Ok(LogicalViewInfo {
            logical_view_id: resource::last_segment(&view.name).to_owned(),
            query: view.query,
            deletion_protection: DeletionProtection::from_flag(view.deletion_protection),
        })
    }

    /// Every logical view of an instance.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn logical_views(&self, instance: &str) -> Result<Vec<LogicalViewInfo>> {
        let parent = self.instance_path(instance);
        let mut views = Vec::new();
        let mut page_token = String::new();
        loop {
            let response = idempotent!(self.list_logical_views(ListLogicalViewsRequest {
                parent: parent.clone(),
                page_size: 0,
                page_token: page_token.clone(),
            }))
            .await?;
            views.extend(response.logical_views.into_iter().map(|view| LogicalViewInfo {
                logical_view_id: resource::last_segment(&view.name).to_owned(),
                query: view.query,
                deletion_protection: DeletionProtection::from_flag(view.deletion_protection),
            }));
            if response.next_page_token.is_empty() {
                return Ok(views);
            }
            page_token = response.next_page_token;
        }
    }

    /// Change the query or deletion protection of a logical view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(view = %conf.logical_view_id)))]
    pub async fn update_logical_view(&self, instance: &str, conf: &LogicalViewInfo) -> Result<()> {
        if conf.logical_view_id.is_empty() {
            return Err(Error::invalid("logical view id is required"));
        }
        let request = UpdateLogicalViewRequest {
            logical_view: Some(LogicalView {
                name: resource::logical_view_path(
                    &self.instance_path(instance),
                    &conf.logical_view_id,
                ),
                query: conf.query.clone(),
                deletion_protection: conf.deletion_protection == DeletionProtection::Protected,
                etag: String::new(),
            }),
            update_mask: Some(prost_types::FieldMask {
                paths: view_mask(&conf.query, conf.deletion_protection),
            }),
        };
        let operation = self
            .client
            .clone()
            .update_logical_view(self.request(request))
            .await?
            .into_inner();
        let _view: LogicalView = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Delete a logical view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_logical_view(&self, instance: &str, view: &str) -> Result<()> {
        let request = DeleteLogicalViewRequest {
            name: resource::logical_view_path(&self.instance_path(instance), view),
            etag: String::new(),
        };
        let _response = self
            .client
            .clone()
            .delete_logical_view(self.request(request))
            .await?;
        Ok(())
    }

    /// Create a materialized view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(view = %conf.materialized_view_id)))]
    pub async fn create_materialized_view(
        &self,
        instance: &str,
        conf: &MaterializedViewInfo,
    ) -> Result<()> {
        if conf.materialized_view_id.is_empty() {
            return Err(Error::invalid("materialized view id is required"));
        }
        let request = CreateMaterializedViewRequest {
            parent: self.instance_path(instance),
            materialized_view_id: conf.materialized_view_id.clone(),
            materialized_view: Some(MaterializedView {
                query: conf.query.clone(),
                deletion_protection: conf.deletion_protection == DeletionProtection::Protected,
                ..MaterializedView::default()
            }),
        };
        let operation = self
            .client
            .clone()
            .create_materialized_view(self.request(request))
            .await?
            .into_inner();
        let _view: MaterializedView = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Details of a materialized view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn materialized_view_info(
        &self,
        instance: &str,
        view: &str,
    ) -> Result<MaterializedViewInfo> {
        let name = resource::materialized_view_path(&self.instance_path(instance), view);
        let view = idempotent!(self.get_materialized_view(GetMaterializedViewRequest {
            name: name.clone()
        }))
        .await?;
        Ok(MaterializedViewInfo {
            materialized_view_id: resource::last_segment(&view.name).to_owned(),
            query: view.query,
            deletion_protection: DeletionProtection::from_flag(view.deletion_protection),
        })
    }

    /// Every materialized view of an instance.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn materialized_views(&self, instance: &str) -> Result<Vec<MaterializedViewInfo>> {
        let parent = self.instance_path(instance);
        let mut views = Vec::new();
        let mut page_token = String::new();
        loop {
            let response = idempotent!(self.list_materialized_views(ListMaterializedViewsRequest {
                parent: parent.clone(),
                page_size: 0,
                page_token: page_token.clone(),
            }))
            .await?;
            views.extend(
                response
                    .materialized_views
                    .into_iter()
                    .map(|view| MaterializedViewInfo {
                        materialized_view_id: resource::last_segment(&view.name).to_owned(),
                        query: view.query,
                        deletion_protection: DeletionProtection::from_flag(
                            view.deletion_protection,
                        ),
                    }),
            );
            if response.next_page_token.is_empty() {
                return Ok(views);
            }
            page_token = response.next_page_token;
        }
    }

    /// Change the query or deletion protection of a materialized view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(view = %conf.materialized_view_id)))]
    pub async fn update_materialized_view(
        &self,
        instance: &str,
        conf: &MaterializedViewInfo,
    ) -> Result<()> {
        if conf.materialized_view_id.is_empty() {
            return Err(Error::invalid("materialized view id is required"));
        }
        let request = UpdateMaterializedViewRequest {
            materialized_view: Some(MaterializedView {
                name: resource::materialized_view_path(
                    &self.instance_path(instance),
                    &conf.materialized_view_id,
                ),
                query: conf.query.clone(),
                deletion_protection: conf.deletion_protection == DeletionProtection::Protected,
                etag: String::new(),
            }),
            update_mask: Some(prost_types::FieldMask {
                paths: view_mask(&conf.query, conf.deletion_protection),
            }),
        };
        let operation = self
            .client
            .clone()
            .update_materialized_view(self.request(request))
            .await?
            .into_inner();
        let _view: MaterializedView = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Delete a materialized view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_materialized_view(&self, instance: &str, view: &str) -> Result<()> {
        let request = DeleteMaterializedViewRequest {
            name: resource::materialized_view_path(&self.instance_path(instance), view),
            etag: String::new(),
        };
        let _response = self
            .client
            .clone()
            .delete_materialized_view(self.request(request))
            .await?;
        Ok(())
    }
}
