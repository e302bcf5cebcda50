//! Fully qualified resource names.
//!
//! The service identifies everything by a slash-separated path rooted at a project. These helpers
//! build and take apart such paths so the rest of the crate never formats them by hand.

use crate::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;
use tonic::metadata::MetadataValue;

/// The metadata header naming the resource a request operates under.
pub(crate) const RESOURCE_PREFIX_HEADER: &str = "google-cloud-resource-prefix";

/// Matches a fully qualified instance name, capturing the project and instance ids.
static INSTANCE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // the pattern is a literal
    Regex::new(r"^projects/([^/]+)/instances/([a-z][-a-z0-9]*)$").unwrap()
});

/// `projects/{project}`
#[must_use]
pub fn project_path(project: &str) -> String {
    format!("projects/{project}")
}

/// `projects/{project}/instances/{instance}`
#[must_use]
pub fn instance_path(project: &str, instance: &str) -> String {
    format!("projects/{project}/instances/{instance}")
}

/// `projects/{project}/locations/{zone}`
#[must_use]
pub fn location_path(project: &str, zone: &str) -> String {
    format!("projects/{project}/locations/{zone}")
}

/// `{instance}/tables/{table}`
#[must_use]
pub fn table_path(instance: &str, table: &str) -> String {
    format!("{instance}/tables/{table}")
}

/// `{instance}/clusters/{cluster}`
#[must_use]
pub fn cluster_path(instance: &str, cluster: &str) -> String {
    format!("{instance}/clusters/{cluster}")
}

/// `{instance}/clusters/{cluster}/backups/{backup}`
#[must_use]
pub fn backup_path(instance: &str, cluster: &str, backup: &str) -> String {
    format!("{instance}/clusters/{cluster}/backups/{backup}")
}

/// `{instance}/clusters/{cluster}/snapshots/{snapshot}`
#[must_use]
pub fn snapshot_path(instance: &str, cluster: &str, snapshot: &str) -> String {
    format!("{instance}/clusters/{cluster}/snapshots/{snapshot}")
}

/// `{instance}/tables/{table}/authorizedViews/{view}`
#[must_use]
pub fn authorized_view_path(instance: &str, table: &str, view: &str) -> String {
    format!("{instance}/tables/{table}/authorizedViews/{view}")
}

/// `{instance}/tables/{table}/schemaBundles/{bundle}`
#[must_use]
pub fn schema_bundle_path(instance: &str, table: &str, bundle: &str) -> String {
    format!("{instance}/tables/{table}/schemaBundles/{bundle}")
}

/// `{instance}/logicalViews/{view}`
#[must_use]
pub fn logical_view_path(instance: &str, view: &str) -> String {
    format!("{instance}/logicalViews/{view}")
}

/// `{instance}/materializedViews/{view}`
#[must_use]
pub fn materialized_view_path(instance: &str, view: &str) -> String {
    format!("{instance}/materializedViews/{view}")
}

/// `{instance}/appProfiles/{profile}`
#[must_use]
pub fn app_profile_path(instance: &str, profile: &str) -> String {
    format!("{instance}/appProfiles/{profile}")
}

/// The final component of a resource name.
#[must_use]
pub fn last_segment(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Strip `prefix/` from `name`, returning `name` unchanged if it is not under `prefix`.
#[must_use]
pub fn strip_parent<'a>(name: &'a str, prefix: &str) -> &'a str {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(name)
}

/// Extract the project and instance ids from a fully qualified instance name.
pub fn parse_instance_name(name: &str) -> Result<(&str, &str)> {
    let captures = INSTANCE_NAME
        .captures(name)
        .ok_or_else(|| Error::malformed(format!("malformed instance name {name:?}")))?;
    match (captures.get(1), captures.get(2)) {
        (Some(project), Some(instance)) => Ok((project.as_str(), instance.as_str())),
        _ => Err(Error::malformed(format!("malformed instance name {name:?}"))),
    }
}

/// Wrap a message in a request tagged with the resource it operates under.
pub(crate) fn request<T>(message: T, prefix: &str) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    if let Ok(value) = MetadataValue::try_from(prefix) {
        let _previous = request.metadata_mut().insert(RESOURCE_PREFIX_HEADER, value);
    }
    request
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_paths() {
        let instance = instance_path("proj", "inst");
        assert_eq!(instance, "projects/proj/instances/inst");
        assert_eq!(
            backup_path(&instance, "c1", "b1"),
            "projects/proj/instances/inst/clusters/c1/backups/b1"
        );
        assert_eq!(
            authorized_view_path(&instance, "t", "v"),
            "projects/proj/instances/inst/tables/t/authorizedViews/v"
        );
        assert_eq!(
            schema_bundle_path(&instance, "t", "s"),
            "projects/proj/instances/inst/tables/t/schemaBundles/s"
        );
        assert_eq!(location_path("proj", "us-east1-b"), "projects/proj/locations/us-east1-b");
    }

    #[test]
    fn test_segments() {
        assert_eq!(last_segment("projects/p/instances/i/tables/t"), "t");
        assert_eq!(last_segment("t"), "t");
        assert_eq!(strip_parent("projects/p/instances/i/tables/t", "projects/p/instances/i"), "tables/t");
        assert_eq!(strip_parent("other", "projects/p"), "other");
    }

    #[test]
    fn test_parse_instance_name() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(parse_instance_name("projects/p-1/instances/my-inst")?, ("p-1", "my-inst"));
        assert!(parse_instance_name("projects/p/instances/MyInst").is_err());
        assert!(parse_instance_name("projects/p/instances/i/tables/t").is_err());
        assert!(parse_instance_name("instances/i").is_err());
        Ok(())
    }

    #[test]
    fn test_request_carries_prefix() {
        let request = request((), "projects/p/instances/i");
        assert_eq!(
            request
                .metadata()
                .get(RESOURCE_PREFIX_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("projects/p/instances/i")
        );
    }
}
