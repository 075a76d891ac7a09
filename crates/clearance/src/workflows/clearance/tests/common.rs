use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::clearance::domain::{
    AcademicPlacement, ActorId, ApplicationId, ApplicationRecord, ApplicationSubmission, BranchId,
    CertificateReference, ContactDetails, CourseId, DecisionState, DepartmentId,
    DepartmentStatusRow, RegistrationNumber, ReapplicationHistoryEntry, SchoolId, StudentProfile,
};
use crate::workflows::clearance::{
    clearance_router, AcademicCatalog, CertificateFinalizer, ClearanceRepository,
    DepartmentRegistry, FinalizationService, FinalizationSink, FinalizerError,
    InMemoryClearanceRepository, KeyedLocks, ManualClock, RecordingEventPublisher,
    RepositoryError, WorkflowCoordinator,
};

pub(super) type MemoryCoordinator =
    WorkflowCoordinator<InMemoryClearanceRepository, RecordingEventPublisher>;

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn departments() -> Arc<DepartmentRegistry> {
    Arc::new(
        DepartmentRegistry::from_pairs("library:Library,hostel:Hostel,accounts:Accounts")
            .expect("registry parses"),
    )
}

pub(super) fn catalog() -> AcademicCatalog {
    AcademicCatalog::new()
        .with_branch("engineering", "btech", "cse")
        .with_branch("engineering", "btech", "ece")
        .with_branch("management", "mba", "finance")
}

pub(super) fn placement(school: &str, course: &str, branch: &str) -> AcademicPlacement {
    AcademicPlacement {
        school: SchoolId(school.to_string()),
        course: CourseId(course.to_string()),
        branch: BranchId(branch.to_string()),
    }
}

pub(super) fn submission(registration_number: &str) -> ApplicationSubmission {
    ApplicationSubmission {
        registration_number: registration_number.to_string(),
        student: StudentProfile {
            name: "Asha Verma".to_string(),
            parent_name: Some("Rakesh Verma".to_string()),
            contact: ContactDetails {
                email: "asha.verma@example.edu".to_string(),
                phone: "+91-98100-00000".to_string(),
            },
        },
        placement: placement("engineering", "btech", "cse"),
    }
}

pub(super) fn dept(id: &str) -> DepartmentId {
    DepartmentId::new(id)
}

/// Sink that only remembers what it was asked to finalize.
#[derive(Default)]
pub(super) struct RecordingSink {
    requested: Mutex<Vec<ApplicationId>>,
}

impl RecordingSink {
    pub(super) fn requested(&self) -> Vec<ApplicationId> {
        self.requested.lock().expect("sink mutex poisoned").clone()
    }
}

impl FinalizationSink for RecordingSink {
    fn request(&self, application_id: ApplicationId) {
        self.requested
            .lock()
            .expect("sink mutex poisoned")
            .push(application_id);
    }
}

/// Issues `CERT-<id>` and counts calls; the first `failures` calls fail.
#[derive(Default)]
pub(super) struct CountingFinalizer {
    calls: AtomicUsize,
    failures: usize,
}

impl CountingFinalizer {
    pub(super) fn failing(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
        }
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CertificateFinalizer for CountingFinalizer {
    fn finalize(
        &self,
        application_id: &ApplicationId,
    ) -> Result<CertificateReference, FinalizerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(FinalizerError::Unavailable("certificate store offline".to_string()));
        }
        Ok(CertificateReference(format!("CERT-{application_id}")))
    }
}

pub(super) struct Harness {
    pub(super) coordinator: MemoryCoordinator,
    pub(super) repository: Arc<InMemoryClearanceRepository>,
    pub(super) events: Arc<RecordingEventPublisher>,
    pub(super) sink: Arc<RecordingSink>,
    pub(super) clock: Arc<ManualClock>,
}

pub(super) fn harness() -> Harness {
    let repository = Arc::new(InMemoryClearanceRepository::default());
    let events = Arc::new(RecordingEventPublisher::default());
    let sink = Arc::new(RecordingSink::default());
    let clock = Arc::new(ManualClock::starting_at(start()));
    let coordinator = WorkflowCoordinator::new(
        repository.clone(),
        events.clone(),
        departments(),
        sink.clone(),
    )
    .with_clock(clock.clone());

    Harness {
        coordinator,
        repository,
        events,
        sink,
        clock,
    }
}

pub(super) struct FinalizingHarness {
    pub(super) coordinator: Arc<MemoryCoordinator>,
    pub(super) service: Arc<FinalizationService<InMemoryClearanceRepository, RecordingEventPublisher>>,
    pub(super) repository: Arc<InMemoryClearanceRepository>,
    pub(super) finalizer: Arc<CountingFinalizer>,
}

/// Coordinator wired to a real finalization service used as the inline sink.
pub(super) fn finalizing_harness(finalizer: CountingFinalizer) -> FinalizingHarness {
    let repository = Arc::new(InMemoryClearanceRepository::default());
    let events = Arc::new(RecordingEventPublisher::default());
    let finalizer = Arc::new(finalizer);
    let locks = Arc::new(KeyedLocks::new());
    let service = Arc::new(FinalizationService::new(
        repository.clone(),
        finalizer.clone(),
        events.clone(),
        locks.clone(),
    ));
    let coordinator = Arc::new(
        WorkflowCoordinator::new(repository.clone(), events, departments(), service.clone())
            .with_locks(locks),
    );

    FinalizingHarness {
        coordinator,
        service,
        repository,
        finalizer,
    }
}

pub(super) fn approve(
    coordinator: &MemoryCoordinator,
    application_id: &ApplicationId,
    department: &str,
) {
    coordinator
        .record_decision(
            application_id,
            crate::workflows::clearance::DecisionInput::approve(department, "staff-1"),
        )
        .expect("approval recorded");
}

pub(super) fn reject(
    coordinator: &MemoryCoordinator,
    application_id: &ApplicationId,
    department: &str,
    reason_code: &str,
) {
    coordinator
        .record_decision(
            application_id,
            crate::workflows::clearance::DecisionInput::reject(
                department,
                "staff-2",
                reason_code,
                "see office",
            ),
        )
        .expect("rejection recorded");
}

pub(super) fn row_state<'a>(rows: &'a [DepartmentStatusRow], department: &str) -> &'a DecisionState {
    &rows
        .iter()
        .find(|row| row.department_id.0 == department)
        .expect("row present")
        .state
}

pub(super) fn actor(id: &str) -> ActorId {
    ActorId(id.to_string())
}

/// Drops the last row of every submission to simulate a partial write.
#[derive(Default)]
pub(super) struct ShortRowsRepository {
    pub(super) inner: InMemoryClearanceRepository,
}

impl ClearanceRepository for ShortRowsRepository {
    fn insert_submission(
        &self,
        record: ApplicationRecord,
        mut rows: Vec<DepartmentStatusRow>,
    ) -> Result<(), RepositoryError> {
        rows.pop();
        self.inner.insert_submission(record, rows)
    }

    fn discard_submission(&self, id: &ApplicationId) -> Result<(), RepositoryError> {
        self.inner.discard_submission(id)
    }

    fn commit_decision(
        &self,
        record: ApplicationRecord,
        row: DepartmentStatusRow,
    ) -> Result<(), RepositoryError> {
        self.inner.commit_decision(record, row)
    }

    fn commit_reapplication(
        &self,
        record: ApplicationRecord,
        rows: Vec<DepartmentStatusRow>,
        history: Vec<ReapplicationHistoryEntry>,
    ) -> Result<(), RepositoryError> {
        self.inner.commit_reapplication(record, rows, history)
    }

    fn update(&self, record: ApplicationRecord) -> Result<(), RepositoryError> {
        self.inner.update(record)
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn find_by_registration(
        &self,
        registration_number: &RegistrationNumber,
    ) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        self.inner.find_by_registration(registration_number)
    }

    fn rows(&self, id: &ApplicationId) -> Result<Vec<DepartmentStatusRow>, RepositoryError> {
        self.inner.rows(id)
    }

    fn department_rows(
        &self,
        department: &DepartmentId,
    ) -> Result<Vec<DepartmentStatusRow>, RepositoryError> {
        self.inner.department_rows(department)
    }

    fn history(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<ReapplicationHistoryEntry>, RepositoryError> {
        self.inner.history(id)
    }

    fn awaiting_certificate(
        &self,
        limit: usize,
    ) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        self.inner.awaiting_certificate(limit)
    }
}

pub(super) struct UnavailableRepository;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

impl ClearanceRepository for UnavailableRepository {
    fn insert_submission(
        &self,
        _record: ApplicationRecord,
        _rows: Vec<DepartmentStatusRow>,
    ) -> Result<(), RepositoryError> {
        offline()
    }

    fn discard_submission(&self, _id: &ApplicationId) -> Result<(), RepositoryError> {
        offline()
    }

    fn commit_decision(
        &self,
        _record: ApplicationRecord,
        _row: DepartmentStatusRow,
    ) -> Result<(), RepositoryError> {
        offline()
    }

    fn commit_reapplication(
        &self,
        _record: ApplicationRecord,
        _rows: Vec<DepartmentStatusRow>,
        _history: Vec<ReapplicationHistoryEntry>,
    ) -> Result<(), RepositoryError> {
        offline()
    }

    fn update(&self, _record: ApplicationRecord) -> Result<(), RepositoryError> {
        offline()
    }

    fn fetch(&self, _id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        offline()
    }

    fn find_by_registration(
        &self,
        _registration_number: &RegistrationNumber,
    ) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        offline()
    }

    fn rows(&self, _id: &ApplicationId) -> Result<Vec<DepartmentStatusRow>, RepositoryError> {
        offline()
    }

    fn department_rows(
        &self,
        _department: &DepartmentId,
    ) -> Result<Vec<DepartmentStatusRow>, RepositoryError> {
        offline()
    }

    fn history(
        &self,
        _id: &ApplicationId,
    ) -> Result<Vec<ReapplicationHistoryEntry>, RepositoryError> {
        offline()
    }

    fn awaiting_certificate(
        &self,
        _limit: usize,
    ) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        offline()
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn router_for(coordinator: MemoryCoordinator) -> axum::Router {
    clearance_router(Arc::new(coordinator))
}
