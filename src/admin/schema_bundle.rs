use super::AdminClient;
use crate::internal_macros::idempotent;
use crate::proto::admin::{
    schema_bundle, CreateSchemaBundleRequest, DeleteSchemaBundleRequest, GetSchemaBundleRequest,
    ListSchemaBundlesRequest, ProtoSchema, SchemaBundle, UpdateSchemaBundleRequest,
};
use crate::{resource, Error, Result};

/// Everything needed to create a schema bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaBundleConf {
    /// The table the bundle belongs to.
    pub table_id: String,
    /// The bundle id, unique within the table.
    pub schema_bundle_id: String,
    /// A serialized `FileDescriptorSet`.
    pub proto_descriptors: Option<Vec<u8>>,
    /// Only used when updating. An empty etag skips the concurrency check.
    pub etag: String,
}

impl SchemaBundleConf {
    fn to_proto(&self, name: String) -> SchemaBundle {
        SchemaBundle {
            name,
            r#type: self.proto_descriptors.as_ref().map(|descriptors| {
                schema_bundle::Type::ProtoSchema(ProtoSchema {
                    proto_descriptors: descriptors.clone(),
                })
            }),
            etag: self.etag.clone(),
        }
    }
}

/// A change to an existing schema bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSchemaBundleConf {
    /// The new settings.
    pub conf: SchemaBundleConf,
    /// Proceed even if the server warns that the change is unsafe.
    pub ignore_warnings: bool,
}

/// A schema bundle as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaBundleInfo {
    /// The table the bundle belongs to.
    pub table_id: String,
    /// The bundle id.
    pub schema_bundle_id: String,
    /// Pass back on update to detect concurrent changes.
    pub etag: String,
    /// The serialized descriptors.
    pub schema_bundle: Vec<u8>,
}

impl AdminClient {
    fn schema_bundle_path(&self, table: &str, bundle: &str) -> String {
        resource::schema_bundle_path(&self.prefix, table, bundle)
    }

    /// Create a schema bundle on a table.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, conf), fields(bundle = %conf.schema_bundle_id)))]
    pub async fn create_schema_bundle(&self, conf: &SchemaBundleConf) -> Result<()> {
        if conf.table_id.is_empty() || conf.schema_bundle_id.is_empty() {
            return Err(Error::invalid(
                "both schema_bundle_id and table_id are required",
            ));
        }
        let request = CreateSchemaBundleRequest {
            parent: self.table_path(&conf.table_id),
            schema_bundle_id: conf.schema_bundle_id.clone(),
            schema_bundle: Some(conf.to_proto(String::new())),
        };
        let operation = self
            .client
            .clone()
            .create_schema_bundle(self.request(request))
            .await?
            .into_inner();
        let _bundle: SchemaBundle = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Fetch a schema bundle.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn get_schema_bundle(&self, table: &str, bundle: &str) -> Result<SchemaBundleInfo> {
        let name = self.schema_bundle_path(table, bundle);
        let response =
            idempotent!(self.get_schema_bundle(GetSchemaBundleRequest { name: name.clone() }))
                .await?;
        Ok(SchemaBundleInfo {
            table_id: table.to_owned(),
            schema_bundle_id: bundle.to_owned(),
            etag: response.etag,
            schema_bundle: match response.r#type {
                Some(schema_bundle::Type::ProtoSchema(schema)) => schema.proto_descriptors,
                None => Vec::new(),
            },
        })
    }

    /// The ids of every schema bundle on a table.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn schema_bundles(&self, table: &str) -> Result<Vec<String>> {
        let parent = self.table_path(table);
        let mut bundles = Vec::new();
        let mut page_token = String::new();
        loop {
            let response = idempotent!(self.list_schema_bundles(ListSchemaBundlesRequest {
                parent: parent.clone(),
                page_size: 0,
                page_token: page_token.clone(),
            }))
            .await?;
            bundles.extend(
                response
                    .schema_bundles
                    .iter()
                    .map(|bundle| resource::last_segment(&bundle.name).to_owned()),
            );
            if response.next_page_token.is_empty() {
                return Ok(bundles);
            }
            page_token = response.next_page_token;
        }
    }

    /// Replace the descriptors of a schema bundle.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, update), fields(bundle = %update.conf.schema_bundle_id)))]
    pub async fn update_schema_bundle(&self, update: &UpdateSchemaBundleConf) -> Result<()> {
        let conf = &update.conf;
        let name = self.schema_bundle_path(&conf.table_id, &conf.schema_bundle_id);
        let request = UpdateSchemaBundleRequest {
            schema_bundle: Some(conf.to_proto(name)),
            update_mask: Some(prost_types::FieldMask {
                paths: vec!["proto_schema".to_owned()],
            }),
            ignore_warnings: update.ignore_warnings,
        };
        let operation = self
            .client
            .clone()
            .update_schema_bundle(self.request(request))
            .await?
            .into_inner();
        let _bundle: SchemaBundle = self.operations.wait(operation).await?;
        Ok(())
    }

    /// Delete a schema bundle.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn delete_schema_bundle(&self, table: &str, bundle: &str) -> Result<()> {
        let request = DeleteSchemaBundleRequest {
            name: self.schema_bundle_path(table, bundle),
            etag: String::new(),
        };
        let _response = self
            .client
            .clone()
            .delete_schema_bundle(self.request(request))
            .await?;
        Ok(())
    }
}
