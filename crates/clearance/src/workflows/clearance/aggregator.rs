use serde::Serialize;

use super::domain::{AggregateStatus, DepartmentStatusRow};

/// Derive the aggregate status from a full row-set.
///
/// Rejection is sticky: one rejected row marks the application rejected without
/// waiting for the remaining pending rows. An empty row-set never counts as completed.
pub fn aggregate(rows: &[DepartmentStatusRow]) -> AggregateStatus {
    if !rows.is_empty() && rows.iter().all(|row| row.state.is_approved()) {
        AggregateStatus::Completed
    } else if rows.iter().any(|row| row.state.is_rejected()) {
        AggregateStatus::Rejected
    } else {
        AggregateStatus::InProgress
    }
}

/// Before/after pair produced by a recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub previous: AggregateStatus,
    pub current: AggregateStatus,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    pub fn entered_completed(&self) -> bool {
        self.changed() && self.current == AggregateStatus::Completed
    }

    pub fn entered_rejected(&self) -> bool {
        self.changed() && self.current == AggregateStatus::Rejected
    }
}

/// Stateless recompute step shared by decisions, reapplications and explicit recomputes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalAggregator;

impl ApprovalAggregator {
    pub fn transition(
        &self,
        previous: AggregateStatus,
        rows: &[DepartmentStatusRow],
    ) -> Transition {
        Transition {
            previous,
            current: aggregate(rows),
        }
    }
}
