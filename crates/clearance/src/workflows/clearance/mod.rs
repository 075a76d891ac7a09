//! Student clearance workflow: submission, independent department decisions,
//! reapplication after rejection, and decoupled certificate finalization.

pub mod aggregator;
pub mod clock;
pub mod domain;
pub mod errors;
pub mod events;
pub mod finalization;
pub(crate) mod locks;
pub mod memory;
pub mod reapplication;
pub mod registry;
pub mod repository;
pub mod router;
pub mod service;
pub(crate) mod tracker;
pub mod views;

#[cfg(test)]
mod tests;

pub use aggregator::{aggregate, ApprovalAggregator, Transition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    AcademicPlacement, ActorId, AggregateStatus, ApplicationId, ApplicationRecord,
    ApplicationSubmission, BranchId, CertificateReference, ContactDetails, CourseId, Decision,
    DecisionState, DepartmentId, DepartmentStatusRow, ReapplicationHistoryEntry,
    RegistrationNumber, SchoolId, StudentProfile,
};
pub use errors::ClearanceError;
pub use events::{
    ChannelEventPublisher, ClearanceEvent, EventError, EventPublisher, RecordingEventPublisher,
};
pub use finalization::{
    run_finalization_worker, run_reconciliation, CertificateFinalizer, FinalizationError,
    FinalizationOutcome, FinalizationQueue, FinalizationService, FinalizationSink,
    FinalizerError, ReconciliationReport, RetryPolicy,
};
pub use locks::KeyedLocks;
pub use memory::InMemoryClearanceRepository;
pub use reapplication::{
    ProfileAmendment, ReapplicationOutcome, ReapplicationPolicy, ReapplicationRequest,
};
pub use registry::{
    AcademicCatalog, AcademicReferenceError, Department, DepartmentRegistry, RegistryError,
};
pub use repository::{ClearanceRepository, RepositoryError};
pub use router::clearance_router;
pub use service::WorkflowCoordinator;
pub use tracker::DecisionInput;
pub use views::{
    ApplicationStatusView, DepartmentStatusView, DepartmentSummary, UpdatedAggregate,
    WorklistEntry,
};
