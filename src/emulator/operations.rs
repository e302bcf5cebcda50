//! Operation lookups and access control policies.

use super::{Emulator, State};
use crate::proto::iam::{Policy, TestIamPermissionsResponse};
use crate::proto::longrunning::operations_server::Operations;
use crate::proto::longrunning::{GetOperationRequest, Operation};
use crate::RpcResponse;
use tonic::{Request, Response, Status};

#[tonic::async_trait]
impl Operations for Emulator {
    async fn get_operation(&self, request: Request<GetOperationRequest>) -> RpcResponse<Operation> {
        let GetOperationRequest { name } = request.into_inner();
        let state = self.state()?;
        let operation = state
            .operations
            .get(&name)
            .cloned()
            .ok_or_else(|| super::not_found("operation", &name))?;
        Ok(Response::new(operation))
    }
}

impl State {
    /// The policy of a resource. Resources without one have an empty policy.
    pub(super) fn policy(&self, resource: &str) -> Policy {
        self.policies.get(resource).cloned().unwrap_or_else(|| Policy {
            version: 1,
            bindings: Vec::new(),
            etag: b"0".to_vec(),
        })
    }

    /// Replace the policy of a resource, bumping its etag.
    pub(super) fn set_policy(&mut self, resource: &str, policy: Policy) -> Result<Policy, Status> {
        let current = self.policy(resource);
        if !policy.etag.is_empty() && policy.etag != current.etag {
            return Err(Status::aborted("policy was modified concurrently"));
        }
        let generation = std::str::from_utf8(&current.etag)
            .ok()
            .and_then(|etag| etag.parse::<u64>().ok())
            .unwrap_or(0);
        let policy = Policy {
            etag: (generation + 1).to_string().into_bytes(),
            ..policy
        };
        let _previous = self.policies.insert(resource.to_owned(), policy.clone());
        Ok(policy)
    }
}

/// Every requested permission is granted.
pub(super) fn grant_all(permissions: Vec<String>) -> TestIamPermissionsResponse {
    TestIamPermissionsResponse { permissions }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::proto::iam::Binding;

    #[test]
    fn test_set_policy_bumps_etag() -> Result<(), Box<dyn std::error::Error>> {
        let mut state = State::default();
        let resource = "projects/p/instances/i/tables/t";
        let initial = state.policy(resource);
        let policy = Policy {
            bindings: vec![Binding {
                role: "roles/bigtable.reader".to_owned(),
                members: vec!["user:a@example.com".to_owned()],
            }],
            ..initial.clone()
        };
        let stored = state.set_policy(resource, policy)?;
        assert_ne!(stored.etag, initial.etag);
        assert_eq!(state.policy(resource).bindings.len(), 1);

        let stale = state.set_policy(resource, initial);
        assert_eq!(stale.map_err(|s| s.code()).err(), Some(tonic::Code::Aborted));
        Ok(())
    }
}
