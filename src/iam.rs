//! Access control policies on tables, backups, authorized views and instances.

use crate::proto::admin::bigtable_instance_admin_client::BigtableInstanceAdminClient;
use crate::proto::admin::bigtable_table_admin_client::BigtableTableAdminClient;
use crate::proto::iam::{
    self, Binding, GetIamPolicyRequest, SetIamPolicyRequest, TestIamPermissionsRequest,
};
use crate::retry::{self, RetrySettings};
use crate::{resource, Result};
use tonic::transport::Channel;

/// Which administrative service owns the resource a handle refers to.
#[derive(Debug, Clone)]
pub(crate) enum IamService {
    Table(BigtableTableAdminClient<Channel>),
    Instance(BigtableInstanceAdminClient<Channel>),
}

/// Reads and writes the access control policy of a single resource.
#[derive(Debug, Clone)]
pub struct IamHandle {
    service: IamService,
    resource: String,
    prefix: String,
    retry: RetrySettings,
}

impl IamHandle {
    pub(crate) const fn new(
        service: IamService,
        resource: String,
        prefix: String,
        retry: RetrySettings,
    ) -> Self {
        Self {
            service,
            resource,
            prefix,
            retry,
        }
    }

    /// The fully qualified name of the resource.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Fetch the current policy.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), fields(resource = %self.resource)))]
    pub async fn policy(&self) -> Result<Policy> {
        let policy = retry::invoke(&self.retry, || {
            let service = self.service.clone();
            let request = resource::request(
                GetIamPolicyRequest {
                    resource: self.resource.clone(),
                },
                &self.prefix,
            );
            async move {
                match service {
                    IamService::Table(mut client) => client.get_iam_policy(request).await,
                    IamService::Instance(mut client) => client.get_iam_policy(request).await,
                }
            }
        })
        .await?
        .into_inner();
        Ok(Policy::from_proto(policy))
    }

    /// Replace the policy. The policy's etag guards against concurrent modification.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, policy), fields(resource = %self.resource)))]
    pub async fn set_policy(&self, policy: &Policy) -> Result<Policy> {
        let request = resource::request(
            SetIamPolicyRequest {
                resource: self.resource.clone(),
                policy: Some(policy.inner.clone()),
            },
            &self.prefix,
        );
        let policy = match self.service.clone() {
            IamService::Table(mut client) => client.set_iam_policy(request).await?,
            IamService::Instance(mut client) => client.set_iam_policy(request).await?,
        }
        .into_inner();
        Ok(Policy::from_proto(policy))
    }

    /// The subset of `permissions` the caller holds on the resource.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), fields(resource = %self.resource)))]
    pub async fn test_permissions(&self, permissions: &[&str]) -> Result<Vec<String>> {
        let permissions: Vec<String> = permissions.iter().map(|&p| p.to_owned()).collect();
        let response = retry::invoke(&self.retry, || {
            let service = self.service.clone();
            let request = resource::request(
                TestIamPermissionsRequest {
                    resource: self.resource.clone(),
                    permissions: permissions.clone(),
                },
                &self.prefix,
            );
            async move {
                match service {
                    IamService::Table(mut client) => client.test_iam_permissions(request).await,
                    IamService::Instance(mut client) => client.test_iam_permissions(request).await,
                }
            }
        })
        .await?
        .into_inner();
        Ok(response.permissions)
    }
}

/// An access control policy: a set of roles, each granted to a set of members.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Policy {
    inner: iam::Policy,
}

impl Policy {
    /// Wrap a policy received from the server.
    #[must_use]
    pub const fn from_proto(inner: iam::Policy) -> Self {
        Self { inner }
    }

    /// The wire representation.
    #[must_use]
    pub fn into_proto(self) -> iam::Policy {
        self.inner
    }

    /// The members granted `role`.
    #[must_use]
    pub fn members(&self, role: &str) -> Vec<&str> {
        self.inner
            .bindings
            .iter()
            .filter(|binding| binding.role == role)
            .flat_map(|binding| binding.members.iter().map(String::as_str))
            .collect()
    }

    /// Whether `member` has been granted `role`.
    #[must_use]
    pub fn has_role(&self, member: &str, role: &str) -> bool {
        self.members(role).contains(&member)
    }

    /// Grant `role` to `member`. Granting an existing role does nothing.
    pub fn add(&mut self, member: &str, role: &str) {
        if self.has_role(member, role) {
            return;
        }
        match self.inner.bindings.iter_mut().find(|b| b.role == role) {
            Some(binding) => binding.members.push(member.to_owned()),
            None => self.inner.bindings.push(Binding {
                role: role.to_owned(),
                members: vec![member.to_owned()],
            }),
        }
    }

    /// Revoke `role` from `member`, dropping the role entirely once nobody holds it.
    pub fn remove(&mut self, member: &str, role: &str) {
        for binding in self.inner.bindings.iter_mut().filter(|b| b.role == role) {
            binding.members.retain(|m| m != member);
        }
        self.inner.bindings.retain(|b| !b.members.is_empty());
    }

    /// Every role granted to at least one member.
    #[must_use]
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.inner.bindings.iter().map(|b| b.role.as_str()).collect();
        roles.sort_unstable();
        roles.dedup();
        roles
    }

    /// The version tag used for optimistic concurrency control.
    #[must_use]
    pub fn etag(&self) -> &[u8] {
        &self.inner.etag
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const VIEWER: &str = "roles/bigtable.viewer";
    const ADMIN: &str = "roles/bigtable.admin";

    #[test]
    fn test_policy_edits() {
        let mut policy = Policy::default();
        policy.add("user:a@example.com", VIEWER);
        policy.add("user:a@example.com", VIEWER);
        policy.add("user:b@example.com", VIEWER);
        policy.add("user:b@example.com", ADMIN);
        assert_eq!(policy.members(VIEWER), ["user:a@example.com", "user:b@example.com"]);
        assert_eq!(policy.roles(), [ADMIN, VIEWER]);
        assert!(policy.has_role("user:b@example.com", ADMIN));

        policy.remove("user:b@example.com", ADMIN);
        assert!(!policy.has_role("user:b@example.com", ADMIN));
        assert_eq!(policy.roles(), [VIEWER]);
        assert_eq!(policy.into_proto().bindings.len(), 1);
    }
}
