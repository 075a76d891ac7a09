use chrono::{DateTime, Utc};

use super::domain::{AggregateStatus, ApplicationId, DepartmentId, RegistrationNumber};
use super::registry::AcademicReferenceError;
use super::repository::RepositoryError;

/// Error raised by the clearance workflow. Every variant maps to a stable `code()`.
#[derive(Debug, thiserror::Error)]
pub enum ClearanceError {
    #[error("registration number {0} already has an active application")]
    DuplicateActiveApplication(RegistrationNumber),
    #[error("no departments are configured to clear applications")]
    NoDepartmentsConfigured,
    #[error("application rows incomplete: expected {expected} departments, found {found}")]
    IncompleteInitialization { expected: usize, found: usize },
    #[error("a reason code is required when rejecting")]
    MissingRejectionReason,
    #[error("department {department} already decided ({state})")]
    AlreadyDecided {
        department: DepartmentId,
        state: &'static str,
    },
    #[error("application is {} and accepts no further decisions", .0.label())]
    ApplicationTerminalState(AggregateStatus),
    #[error("reapplication limit of {limit} reached")]
    ReapplicationLimitExceeded { limit: u32 },
    #[error("application is {} and cannot be reapplied", .0.label())]
    ApplicationNotRejected(AggregateStatus),
    #[error("reapplication allowed again after {retry_after}")]
    ReapplicationCooldown { retry_after: DateTime<Utc> },
    #[error("a reply message is required to reapply")]
    MissingReplyMessage,
    #[error(transparent)]
    UnknownAcademicReference(#[from] AcademicReferenceError),
    #[error("department {0} is not part of this application")]
    UnknownDepartment(DepartmentId),
    #[error("application {0} not found")]
    NotFound(ApplicationId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ClearanceError {
    /// Stable identifier for UI layers; messages may change, codes do not.
    pub const fn code(&self) -> &'static str {
        match self {
            ClearanceError::DuplicateActiveApplication(_) => "DUPLICATE_ACTIVE_APPLICATION",
            ClearanceError::NoDepartmentsConfigured => "NO_DEPARTMENTS_CONFIGURED",
            ClearanceError::IncompleteInitialization { .. } => "INCOMPLETE_INITIALIZATION",
            ClearanceError::MissingRejectionReason => "MISSING_REJECTION_REASON",
            ClearanceError::AlreadyDecided { .. } => "ALREADY_DECIDED",
            ClearanceError::ApplicationTerminalState(_) => "APPLICATION_TERMINAL_STATE",
            ClearanceError::ReapplicationLimitExceeded { .. } => "REAPPLICATION_LIMIT_EXCEEDED",
            ClearanceError::ApplicationNotRejected(_) => "APPLICATION_NOT_REJECTED",
            ClearanceError::ReapplicationCooldown { .. } => "REAPPLICATION_COOLDOWN",
            ClearanceError::MissingReplyMessage => "MISSING_REPLY_MESSAGE",
            ClearanceError::UnknownAcademicReference(_) => "UNKNOWN_ACADEMIC_REFERENCE",
            ClearanceError::UnknownDepartment(_) => "UNKNOWN_DEPARTMENT",
            ClearanceError::NotFound(_) => "APPLICATION_NOT_FOUND",
            ClearanceError::Repository(_) => "STORAGE_UNAVAILABLE",
        }
    }

    /// Caller-side or business-rule failures; never retried automatically.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            ClearanceError::IncompleteInitialization { .. } | ClearanceError::Repository(_)
        )
    }
}
