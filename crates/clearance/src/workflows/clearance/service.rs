use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use super::aggregator::{ApprovalAggregator, Transition};
use super::clock::{Clock, SystemClock};
use super::domain::{
    AggregateStatus, ApplicationId, ApplicationRecord, ApplicationSubmission, DepartmentId,
    RegistrationNumber, ReapplicationHistoryEntry,
};
use super::errors::ClearanceError;
use super::events::{publish_all, ClearanceEvent, EventPublisher};
use super::finalization::FinalizationSink;
use super::locks::KeyedLocks;
use super::reapplication::{
    ReapplicationController, ReapplicationOutcome, ReapplicationPolicy, ReapplicationRequest,
};
use super::registry::{AcademicCatalog, DepartmentRegistry};
use super::repository::ClearanceRepository;
use super::tracker::{DecisionInput, DepartmentStatusTracker};
use super::views::{
    sort_worklist, ApplicationStatusView, DepartmentStatusView, DepartmentSummary,
    UpdatedAggregate, WorklistEntry,
};

/// Coordinates submission, department decisions, reapplication and the hand-off to
/// certificate finalization.
///
/// Decisions, recomputes and reapplications for one application run inside that
/// application's lock; submissions for one registration number run inside that
/// number's lock. Anything that can make an application active again (reapplication,
/// ceiling override) takes the registration lock first, then the application lock.
/// Events and finalization requests leave only after the locks are released.
pub struct WorkflowCoordinator<R, E> {
    repository: Arc<R>,
    events: Arc<E>,
    finalization: Arc<dyn FinalizationSink>,
    registry: Arc<DepartmentRegistry>,
    catalog: Option<Arc<AcademicCatalog>>,
    policy: ReapplicationPolicy,
    clock: Arc<dyn Clock>,
    application_locks: Arc<KeyedLocks<ApplicationId>>,
    registration_locks: KeyedLocks<RegistrationNumber>,
    tracker: DepartmentStatusTracker,
    aggregator: ApprovalAggregator,
    controller: ReapplicationController,
}

static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_application_id() -> ApplicationId {
    let id = APPLICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ApplicationId(format!("app-{id:06}"))
}

/// What a locked section hands back for delivery once the lock is released.
struct Committed<T> {
    value: T,
    events: Vec<ClearanceEvent>,
    finalize: bool,
}

impl<R, E> WorkflowCoordinator<R, E>
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    pub fn new(
        repository: Arc<R>,
        events: Arc<E>,
        registry: Arc<DepartmentRegistry>,
        finalization: Arc<dyn FinalizationSink>,
    ) -> Self {
        Self {
            repository,
            events,
            finalization,
            registry,
            catalog: None,
            policy: ReapplicationPolicy::default(),
            clock: Arc::new(SystemClock),
            application_locks: Arc::new(KeyedLocks::new()),
            registration_locks: KeyedLocks::new(),
            tracker: DepartmentStatusTracker,
            aggregator: ApprovalAggregator,
            controller: ReapplicationController::new(),
        }
    }

    pub fn with_policy(mut self, policy: ReapplicationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validate submitted and amended placements against the academic hierarchy.
    pub fn with_catalog(mut self, catalog: AcademicCatalog) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share the per-application lock table with a
    /// [`FinalizationService`](super::FinalizationService).
    pub fn with_locks(mut self, locks: Arc<KeyedLocks<ApplicationId>>) -> Self {
        self.application_locks = locks;
        self
    }

    pub fn application_locks(&self) -> Arc<KeyedLocks<ApplicationId>> {
        self.application_locks.clone()
    }

    pub fn registry(&self) -> &DepartmentRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &ReapplicationPolicy {
        &self.policy
    }

    fn load(&self, application_id: &ApplicationId) -> Result<ApplicationRecord, ClearanceError> {
        self.repository
            .fetch(application_id)?
            .ok_or_else(|| ClearanceError::NotFound(application_id.clone()))
    }

    fn require_department(&self, department: &DepartmentId) -> Result<(), ClearanceError> {
        match self.registry.get(department) {
            Some(_) => Ok(()),
            None => Err(ClearanceError::UnknownDepartment(department.clone())),
        }
    }

    /// Refuse when another application for the same registration number is still active.
    fn ensure_sole_active(&self, record: &ApplicationRecord) -> Result<(), ClearanceError> {
        let others = self
            .repository
            .find_by_registration(&record.registration_number)?;
        if others
            .iter()
            .any(|other| other.id != record.id && other.is_active(&self.policy))
        {
            return Err(ClearanceError::DuplicateActiveApplication(
                record.registration_number.clone(),
            ));
        }
        Ok(())
    }

    fn deliver<T>(&self, application_id: &ApplicationId, committed: Committed<T>) -> T {
        publish_all(self.events.as_ref(), committed.events);
        if committed.finalize {
            self.finalization.request(application_id.clone());
        }
        committed.value
    }

    /// Apply a completed transition to the record. Returns true the first time only.
    fn mark_completed(
        record: &mut ApplicationRecord,
        transition: &Transition,
        events: &mut Vec<ClearanceEvent>,
    ) -> bool {
        if !transition.entered_completed() {
            return false;
        }
        let now = record.updated_at;
        record.completed_at = Some(now);
        events.push(ClearanceEvent::Completed {
            application_id: record.id.clone(),
            at: now,
        });
        if record.finalization_requested_at.is_some() {
            return false;
        }
        record.finalization_requested_at = Some(now);
        true
    }

    /// Create an application with one pending row per required department.
    ///
    /// The record and its rows land as one unit and are read back before the call
    /// returns; a short row-set is discarded and reported as `IncompleteInitialization`.
    pub fn submit(
        &self,
        submission: ApplicationSubmission,
    ) -> Result<ApplicationRecord, ClearanceError> {
        let registration_number = RegistrationNumber::new(&submission.registration_number);
        let committed = self.registration_locks.with(&registration_number, || {
            self.create_locked(registration_number.clone(), submission)
        })?;

        info!(
            application_id = %committed.value.id,
            registration_number = %committed.value.registration_number,
            "clearance application submitted"
        );
        let application_id = committed.value.id.clone();
        Ok(self.deliver(&application_id, committed))
    }

    fn create_locked(
        &self,
        registration_number: RegistrationNumber,
        submission: ApplicationSubmission,
    ) -> Result<Committed<ApplicationRecord>, ClearanceError> {
        let existing = self.repository.find_by_registration(&registration_number)?;
        if existing.iter().any(|record| record.is_active(&self.policy)) {
            return Err(ClearanceError::DuplicateActiveApplication(
                registration_number,
            ));
        }

        let departments = self.registry.required_ids();
        if departments.is_empty() {
            return Err(ClearanceError::NoDepartmentsConfigured);
        }

        if let Some(catalog) = &self.catalog {
            catalog.validate(&submission.placement)?;
        }

        let now = self.clock.now();
        let application_id = next_application_id();
        let record = ApplicationRecord {
            id: application_id.clone(),
            registration_number,
            student: submission.student,
            placement: submission.placement,
            status: AggregateStatus::InProgress,
            reapplication_count: 0,
            last_reapplied_at: None,
            max_reapplications_override: None,
            certificate_reference: None,
            finalization_requested_at: None,
            submitted_at: now,
            updated_at: now,
            completed_at: None,
        };
        let rows = self.tracker.initial_rows(&application_id, &departments);

        self.repository.insert_submission(record.clone(), rows)?;

        let verified = self
            .repository
            .rows(&application_id)
            .map_err(ClearanceError::from)
            .and_then(|stored| self.tracker.verify_complete(&stored, &departments));
        if let Err(err) = verified {
            if let Err(discard_err) = self.repository.discard_submission(&application_id) {
                warn!(
                    %application_id,
                    error = %discard_err,
                    "unable to discard incomplete submission"
                );
            }
            return Err(match err {
                ClearanceError::Repository(_) => ClearanceError::IncompleteInitialization {
                    expected: departments.len(),
                    found: 0,
                },
                other => other,
            });
        }

        let event = ClearanceEvent::Submitted {
            application_id,
            registration_number: record.registration_number.clone(),
            departments,
            at: now,
        };
        Ok(Committed {
            value: record,
            events: vec![event],
            finalize: false,
        })
    }

    /// Record one department's decision and recompute the aggregate once.
    ///
    /// When two callers race the same row, the second sees `AlreadyDecided`.
    pub fn record_decision(
        &self,
        application_id: &ApplicationId,
        input: DecisionInput,
    ) -> Result<UpdatedAggregate, ClearanceError> {
        let committed = self
            .application_locks
            .with(application_id, || self.decide_locked(application_id, &input))?;

        info!(
            %application_id,
            department = %committed.value.department.department_id,
            decision = committed.value.department.state.label(),
            status = committed.value.status.label(),
            "department decision recorded"
        );
        Ok(self.deliver(application_id, committed))
    }

    fn decide_locked(
        &self,
        application_id: &ApplicationId,
        input: &DecisionInput,
    ) -> Result<Committed<UpdatedAggregate>, ClearanceError> {
        let mut record = self.load(application_id)?;
        self.tracker.validate_input(input)?;

        let mut rows = self.repository.rows(application_id)?;
        let index = self.tracker.locate_pending(&rows, &input.department)?;
        if record.status != AggregateStatus::InProgress {
            return Err(ClearanceError::ApplicationTerminalState(record.status));
        }

        let now = self.clock.now();
        self.tracker.apply(&mut rows[index], input, now);
        let transition = self.aggregator.transition(record.status, &rows);
        let row = rows.swap_remove(index);

        let mut events = vec![ClearanceEvent::DepartmentDecided {
            application_id: application_id.clone(),
            department: row.department_id.clone(),
            decision: input.decision,
            at: now,
        }];

        record.status = transition.current;
        record.updated_at = now;
        let finalize = Self::mark_completed(&mut record, &transition, &mut events);
        if transition.entered_rejected() {
            events.push(ClearanceEvent::Rejected {
                application_id: application_id.clone(),
                department: row.department_id.clone(),
                reason_code: row.state.reason_code().unwrap_or_default().to_string(),
                at: now,
            });
        }

        self.repository.commit_decision(record, row.clone())?;

        Ok(Committed {
            value: UpdatedAggregate {
                application_id: application_id.clone(),
                department: DepartmentStatusView::from_row(row, &self.registry),
                status: transition.current,
                transition,
                finalization_requested: finalize,
            },
            events,
            finalize,
        })
    }

    /// Re-derive the aggregate from the stored rows, persisting any change.
    pub fn recompute(
        &self,
        application_id: &ApplicationId,
    ) -> Result<AggregateStatus, ClearanceError> {
        let committed = self
            .application_locks
            .with(application_id, || self.recompute_locked(application_id))?;
        Ok(self.deliver(application_id, committed))
    }

    fn recompute_locked(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Committed<AggregateStatus>, ClearanceError> {
        let mut record = self.load(application_id)?;
        let unchanged = Committed {
            value: record.status,
            events: Vec::new(),
            finalize: false,
        };
        if record.status == AggregateStatus::Completed {
            return Ok(unchanged);
        }

        let rows = self.repository.rows(application_id)?;
        let transition = self.aggregator.transition(record.status, &rows);
        if !transition.changed() {
            return Ok(unchanged);
        }

        let mut events = Vec::new();
        record.status = transition.current;
        record.updated_at = self.clock.now();
        let finalize = Self::mark_completed(&mut record, &transition, &mut events);
        self.repository.update(record)?;

        info!(
            %application_id,
            previous = transition.previous.label(),
            status = transition.current.label(),
            "aggregate status recomputed"
        );
        Ok(Committed {
            value: transition.current,
            events,
            finalize,
        })
    }

    /// Re-open every rejected department under the configured policy.
    pub fn open_reapplication(
        &self,
        application_id: &ApplicationId,
        request: ReapplicationRequest,
    ) -> Result<ReapplicationOutcome, ClearanceError> {
        self.open_reapplication_with_policy(application_id, request, &self.policy)
    }

    pub fn open_reapplication_with_policy(
        &self,
        application_id: &ApplicationId,
        request: ReapplicationRequest,
        policy: &ReapplicationPolicy,
    ) -> Result<ReapplicationOutcome, ClearanceError> {
        // The registration number never changes, so it is safe to read before locking.
        let registration_number = self.load(application_id)?.registration_number;
        let committed = self.registration_locks.with(&registration_number, || {
            self.application_locks.with(application_id, || {
                self.reapply_locked(application_id, request, policy)
            })
        })?;

        info!(
            %application_id,
            cycle = committed.value.cycle,
            reset = committed.value.reset.len(),
            "reapplication opened"
        );
        Ok(self.deliver(application_id, committed))
    }

    fn reapply_locked(
        &self,
        application_id: &ApplicationId,
        request: ReapplicationRequest,
        policy: &ReapplicationPolicy,
    ) -> Result<Committed<ReapplicationOutcome>, ClearanceError> {
        let mut record = self.load(application_id)?;
        let mut rows = self.repository.rows(application_id)?;
        let now = self.clock.now();

        let outcome = self.controller.open(
            &mut record,
            &mut rows,
            request,
            policy,
            self.catalog.as_deref(),
            now,
        )?;
        self.ensure_sole_active(&record)?;

        let reset_rows = rows
            .into_iter()
            .filter(|row| outcome.reset.contains(&row.department_id))
            .collect();
        self.repository
            .commit_reapplication(record, reset_rows, outcome.history.clone())?;

        let event = ClearanceEvent::ReapplicationOpened {
            application_id: application_id.clone(),
            cycle: outcome.cycle,
            departments: outcome.reset.clone(),
            at: now,
        };
        Ok(Committed {
            value: outcome,
            events: vec![event],
            finalize: false,
        })
    }

    /// Set or clear a per-application reapplication ceiling.
    pub fn override_reapplication_limit(
        &self,
        application_id: &ApplicationId,
        limit: Option<u32>,
    ) -> Result<ApplicationRecord, ClearanceError> {
        let registration_number = self.load(application_id)?.registration_number;
        let record = self.registration_locks.with(&registration_number, || {
            self.application_locks
                .with(application_id, || self.override_locked(application_id, limit))
        })?;
        info!(%application_id, ?limit, "reapplication ceiling overridden");
        Ok(record)
    }

    fn override_locked(
        &self,
        application_id: &ApplicationId,
        limit: Option<u32>,
    ) -> Result<ApplicationRecord, ClearanceError> {
        let mut record = self.load(application_id)?;
        record.max_reapplications_override = limit;
        if record.is_active(&self.policy) {
            self.ensure_sole_active(&record)?;
        }
        record.updated_at = self.clock.now();
        self.repository.update(record.clone())?;
        Ok(record)
    }

    pub fn status(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ApplicationStatusView, ClearanceError> {
        let record = self.load(application_id)?;
        let rows = self.repository.rows(application_id)?;
        Ok(ApplicationStatusView::build(
            record,
            rows,
            &self.registry,
            &self.policy,
        ))
    }

    /// Pending rows for one department, reapplications first, then oldest submission.
    pub fn worklist(
        &self,
        department: &DepartmentId,
    ) -> Result<Vec<WorklistEntry>, ClearanceError> {
        self.require_department(department)?;

        let mut entries = Vec::new();
        for row in self.repository.department_rows(department)? {
            if !row.state.is_pending() {
                continue;
            }
            if let Some(record) = self.repository.fetch(&row.application_id)? {
                entries.push(WorklistEntry::from_parts(&record, row));
            }
        }
        sort_worklist(&mut entries);
        Ok(entries)
    }

    /// Archived decisions, newest cycle first.
    pub fn history(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<ReapplicationHistoryEntry>, ClearanceError> {
        self.load(application_id)?;
        let mut history = self.repository.history(application_id)?;
        history.sort_by(|a, b| {
            b.cycle.cmp(&a.cycle).then_with(|| {
                self.registry
                    .display_order(&a.department_id)
                    .cmp(&self.registry.display_order(&b.department_id))
            })
        });
        Ok(history)
    }

    pub fn department_summary(
        &self,
        department: &DepartmentId,
    ) -> Result<DepartmentSummary, ClearanceError> {
        self.require_department(department)?;
        let rows = self.repository.department_rows(department)?;
        Ok(DepartmentSummary::tally(department, &self.registry, &rows))
    }
}
