use super::{AdminClient, DeletionProtection};
use crate::internal_macros::idempotent;
use crate::proto::admin::{
    authorized_view, AuthorizedView, CreateAuthorizedViewRequest, DeleteAuthorizedViewRequest,
    GetAuthorizedViewRequest, ListAuthorizedViewsRequest, UpdateAuthorizedViewRequest,
};
use crate::{resource, Error, Result};
use std::collections::BTreeMap;

/// The qualifiers of one family that a subset view exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilySubset {
    /// Exact qualifiers.
    pub qualifiers: Vec<Vec<u8>>,
    /// Qualifier prefixes. An empty prefix exposes the whole family.
    pub qualifier_prefixes: Vec<Vec<u8>>,
}

/// A view exposing a subset of the rows and columns of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubsetViewConf {
    /// Row key prefixes. An empty prefix exposes every row.
    pub row_prefixes: Vec<Vec<u8>>,
    /// Exposed columns, keyed by family.
    pub family_subsets: BTreeMap<String, FamilySubset>,
}

/// The subset reported for an existing view.
pub type SubsetViewInfo = SubsetViewConf;

impl SubsetViewConf {
    /// Expose rows whose key starts with `prefix`.
    pub fn add_row_prefix(&mut self, prefix: impl Into<Vec<u8>>) {
        self.row_prefixes.push(prefix.into());
    }

    /// Expose one column of `family`.
    pub fn add_family_subset_qualifier(&mut self, family: &str, qualifier: impl Into<Vec<u8>>) {
        self.family_subsets
            .entry(family.to_owned())
            .or_default()
            .qualifiers
            .push(qualifier.into());
    }

    /// Expose the columns of `family` whose qualifier starts with `prefix`.
    pub fn add_family_subset_qualifier_prefix(
        &mut self,
        family: &str,
        prefix: impl Into<Vec<u8>>,
    ) {
        self.family_subsets
            .entry(family.to_owned())
            .or_default()
            .qualifier_prefixes
            .push(prefix.into());
    }

    fn to_proto(&self) -> authorized_view::SubsetView {
        authorized_view::SubsetView {
            row_prefixes: self.row_prefixes.clone(),
            family_subsets: self
                .family_subsets
                .iter()
                .map(|(family, subset)| {
                    (
                        family.clone(),
                        authorized_view::FamilySubsets {
                            qualifiers: subset.qualifiers.clone(),
                            qualifier_prefixes: subset.qualifier_prefixes.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn from_proto(view: &authorized_view::SubsetView) -> Self {
        Self {
            row_prefixes: view.row_prefixes.clone(),
            family_subsets: view
                .family_subsets
                .iter()
                .map(|(family, subset)| {
                    (
                        family.clone(),
                        FamilySubset {
                            qualifiers: subset.qualifiers.clone(),
                            qualifier_prefixes: subset.qualifier_prefixes.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Everything needed to create an authorized view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedViewConf {
    /// The table the view exposes.
    pub table_id: String,
    /// The view id, unique within the table.
    pub authorized_view_id: String,
    /// What the view exposes.
    pub subset_view: Option<SubsetViewConf>,
    /// Whether the view is protected against deletion.
    pub deletion_protection: DeletionProtection,
}

impl AuthorizedViewConf {
    fn to_proto(&self) -> AuthorizedView {
        AuthorizedView {
            authorized_view: self
                .subset_view
                .as_ref()
                .map(|view| authorized_view::AuthorizedView::SubsetView(view.to_proto())),
            deletion_protection: self.deletion_protection == DeletionProtection::Protected,
            ..AuthorizedView::default()
        }
    }

    fn require_ids(&self) -> Result<()> {
        if self.table_id.is_empty() || self.authorized_view_id.is_empty() {
            return Err(Error::invalid(
                "both authorized_view_id and table_id are required",
            ));
        }
        Ok(())
    }
}

/// A change to an existing authorized view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateAuthorizedViewConf {
    /// The new settings. Unset fields are left unchanged.
    pub conf: AuthorizedViewConf,
    /// Proceed even if the server warns that the change is unsafe.
    pub ignore_warnings: bool,
}

/// An authorized view as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedViewInfo {
    /// The table the view exposes.
    pub table_id: String,
    /// The view id.
    pub authorized_view_id: String,
    /// What the view exposes.
    pub subset_view: Option<SubsetViewInfo>,
    /// Either [`DeletionProtection::Protected`] or [`DeletionProtection::Unprotected`].
    pub deletion_protection: DeletionProtection,
}

impl AdminClient {
    /// Create an authorized view on a table.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(view = %conf.authorized_view_id)))]
    pub async fn create_authorized_view(&self, conf: &AuthorizedViewConf) -> Result<()> {
        conf.require_ids()?;
        if conf.subset_view.is_none() {
            return Err(Error::invalid("a subset view must be specified"));
        }
        let request = CreateAuthorizedViewRequest {
            parent: self.table_path(&conf.table_id),
            authorized_view_id: conf.authorized_view_id.clone(),
            authorized_view: Some(conf.to_proto()),
        };
        let operation = self
            .client
            .clone()
            .create_authorized_view(self.request(request))
            .await?
            .into_inner();
        let _view: AuthorizedView = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Details of an authorized view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn authorized_view_info(
        &self,
        table: &str,
        authorized_view: &str,
    ) -> Result<AuthorizedViewInfo> {
        let name = resource::authorized_view_path(&self.prefix, table, authorized_view);
        let view = idempotent!(self.get_authorized_view(GetAuthorizedViewRequest {
            name: name.clone(),
            view: authorized_view::ResponseView::Unspecified as i32,
        }))
        .await?;
        Ok(AuthorizedViewInfo {
            table_id: table.to_owned(),
            authorized_view_id: authorized_view.to_owned(),
            subset_view: match &view.authorized_view {
                Some(authorized_view::AuthorizedView::SubsetView(subset)) => {
                    Some(SubsetViewConf::from_proto(subset))
                }
                None => None,
            },
            deletion_protection: DeletionProtection::from_flag(view.deletion_protection),
        })
    }

    /// The ids of every authorized view on a table.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn authorized_views(&self, table: &str) -> Result<Vec<String>> {
        let parent = self.table_path(table);
        let mut views = Vec::new();
        let mut page_token = String::new();
        loop {
            let response = idempotent!(self.list_authorized_views(ListAuthorizedViewsRequest {
                parent: parent.clone(),
                page_size: 0,
                page_token: page_token.clone(),
                view: authorized_view::ResponseView::NameOnly as i32,
            }))
            .await?;
            views.extend(
                response
                    .authorized_views
                    .iter()
                    .map(|view| resource::last_segment(&view.name).to_owned()),
            );
            if response.next_page_token.is_empty() {
                return Ok(views);
            }
            page_token = response.next_page_token;
        }
    }

    /// Change an authorized view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, update), fields(view = %update.conf.authorized_view_id)))]
    pub async fn update_authorized_view(&self, update: &UpdateAuthorizedViewConf) -> Result<()> {
        let conf = &update.conf;
        conf.require_ids()?;
        let mut view = conf.to_proto();
        view.name = resource::authorized_view_path(
            &self.prefix,
            &conf.table_id,
            &conf.authorized_view_id,
        );
        let mut paths = Vec::new();
        if conf.deletion_protection != DeletionProtection::None {
            paths.push("deletion_protection".to_owned());
        }
        if conf.subset_view.is_some() {
            paths.push("subset_view".to_owned());
        }
        let request = UpdateAuthorizedViewRequest {
            authorized_view: Some(view),
            update_mask: Some(prost_types::FieldMask { paths }),
            ignore_warnings: update.ignore_warnings,
        };
        let operation = self
            .client
            .clone()
            .update_authorized_view(self.request(request))
            .await?
            .into_inner();
        let _view: AuthorizedView = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Delete an authorized view.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_authorized_view(&self, table: &str, authorized_view: &str) -> Result<()> {
        let request = DeleteAuthorizedViewRequest {
            name: resource::authorized_view_path(&self.prefix, table, authorized_view),
            etag: String::new(),
        };
        let _response = self
            .client
            .clone()
            .delete_authorized_view(self.request(request))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_subset_view_builder() {
        let mut subset = SubsetViewConf::default();
        subset.add_row_prefix("user#");
        subset.add_family_subset_qualifier("profile", "name");
        subset.add_family_subset_qualifier_prefix("profile", "addr_");
        subset.add_family_subset_qualifier_prefix("stats", "");

        let proto = subset.to_proto();
        assert_eq!(proto.row_prefixes, [b"user#".to_vec()]);
        assert_eq!(proto.family_subsets["profile"].qualifiers, [b"name".to_vec()]);
        assert_eq!(proto.family_subsets["profile"].qualifier_prefixes, [b"addr_".to_vec()]);
        assert_eq!(proto.family_subsets["stats"].qualifier_prefixes, [Vec::<u8>::new()]);
        assert_eq!(SubsetViewConf::from_proto(&proto), subset);
    }

    #[test]
    fn test_ids_required() {
        let conf = AuthorizedViewConf {
            table_id: "t".to_owned(),
            ..AuthorizedViewConf::default()
        };
        assert!(conf.require_ids().is_err());
    }
}
