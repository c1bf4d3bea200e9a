//! Trackability of a runtime
//!
//! A runtime is billable right now iff the chronologically last operation
//! on it says so: a succeeded provisioning or unsuspension makes it
//! trackable, a suspension or deprovisioning ends tracking, and any other
//! operation implies the cluster already exists and stays billable.

use chrono::{DateTime, Utc};

use crate::keb::{Operation, RuntimeDto};

const STATE_SUCCEEDED: &str = "succeeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Provisioning,
    Deprovisioning,
    UpgradingKyma,
    UpgradingCluster,
    Update,
    Suspension,
    Unsuspension,
}

#[derive(Debug, Clone)]
struct SimpleOperation {
    kind: OperationKind,
    created_at: Option<DateTime<Utc>>,
    succeeded: bool,
}

impl SimpleOperation {
    fn new(kind: OperationKind, operation: &Operation) -> Self {
        Self {
            kind,
            created_at: operation.created_at,
            succeeded: operation.state == STATE_SUCCEEDED,
        }
    }
}

pub(crate) fn is_runtime_trackable(runtime: &RuntimeDto) -> bool {
    let operations = sorted_operations(runtime);

    // a cluster without any operations is not trackable
    let Some(last) = operations.last() else {
        return false;
    };

    match last.kind {
        OperationKind::Provisioning | OperationKind::Unsuspension => last.succeeded,
        OperationKind::Suspension | OperationKind::Deprovisioning => false,
        _ => true,
    }
}

/// Merge all operation lists in chronological order. The sort is stable,
/// so operations with equal timestamps keep their insertion order.
fn sorted_operations(runtime: &RuntimeDto) -> Vec<SimpleOperation> {
    let status = &runtime.status;
    let mut operations = Vec::new();

    if let Some(op) = &status.provisioning {
        operations.push(SimpleOperation::new(OperationKind::Provisioning, op));
    }

    if let Some(op) = &status.deprovisioning {
        operations.push(SimpleOperation::new(OperationKind::Deprovisioning, op));
    }

    let groups = [
        (OperationKind::UpgradingKyma, &status.upgrading_kyma),
        (OperationKind::UpgradingCluster, &status.upgrading_cluster),
        (OperationKind::Update, &status.update),
        (OperationKind::Suspension, &status.suspension),
        (OperationKind::Unsuspension, &status.unsuspension),
    ];

    for (kind, group) in groups {
        if let Some(group) = group {
            for op in &group.data {
                operations.push(SimpleOperation::new(kind, op));
            }
        }
    }

    operations.sort_by_key(|op| op.created_at);

    operations
}
