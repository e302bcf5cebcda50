//! Planning the cluster changes that bring an instance in line with a configuration.

/// One cluster creation or deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStep {
    /// Create the cluster with this id.
    Create(String),
    /// Delete the cluster with this id.
    Delete(String),
}

/// The work needed to make an instance's clusters match a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSyncPlan {
    /// Configured clusters that already exist, in configuration order.
    pub update: Vec<String>,
    /// Creations and deletions, in the order to run them.
    pub steps: Vec<SyncStep>,
}

/// Plan the changes that turn the `existing` clusters into the `desired` ones.
///
/// While more than one cluster exists a deletion goes first, which keeps the instance below any
/// cluster limit. Otherwise each deletion is preceded by a creation, so capacity never drops
/// further than it has to and the last cluster is never removed while creations remain.
#[must_use]
pub fn plan_cluster_sync(existing: &[&str], desired: &[&str]) -> ClusterSyncPlan {
    let mut plan = ClusterSyncPlan::default();
    let mut to_create = Vec::new();
    for &id in desired {
        if existing.contains(&id) {
            plan.update.push(id.to_owned());
        } else {
            to_create.push(id.to_owned());
        }
    }
    let to_delete: Vec<String> = existing
        .iter()
        .filter(|id| !desired.contains(id))
        .map(|&id| id.to_owned())
        .collect();

    let mut count = existing.len();
    let mut creations = to_create.into_iter().peekable();
    let mut deletions = to_delete.into_iter().peekable();
    while creations.peek().is_some() || deletions.peek().is_some() {
        if count > 1 || creations.peek().is_none() {
            if let Some(id) = deletions.next() {
                plan.steps.push(SyncStep::Delete(id));
                count -= 1;
            }
        }
        if let Some(id) = creations.next() {
            plan.steps.push(SyncStep::Create(id));
            count += 1;
        }
    }
    plan
}
