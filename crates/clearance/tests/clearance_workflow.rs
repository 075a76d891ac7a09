use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use clearance::workflows::clearance::{
    AcademicPlacement, AggregateStatus, ApplicationId, ApplicationSubmission, BranchId,
    CertificateFinalizer, CertificateReference, ChannelEventPublisher, ClearanceError,
    ClearanceEvent, ContactDetails, CourseId, DecisionInput, DepartmentRegistry,
    FinalizationService, FinalizerError, InMemoryClearanceRepository, KeyedLocks,
    ReapplicationPolicy, ReapplicationRequest, SchoolId, StudentProfile, WorkflowCoordinator,
};

#[derive(Default)]
struct CertificateDesk {
    calls: AtomicUsize,
}

impl CertificateFinalizer for CertificateDesk {
    fn finalize(
        &self,
        application_id: &ApplicationId,
    ) -> Result<CertificateReference, FinalizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CertificateReference(format!("NOC/{application_id}")))
    }
}

type Coordinator = WorkflowCoordinator<InMemoryClearanceRepository, ChannelEventPublisher>;

fn registry() -> Arc<DepartmentRegistry> {
    let data = include_bytes!("../departments.csv");
    Arc::new(DepartmentRegistry::from_csv_reader(&data[..]).expect("department csv loads"))
}

fn submission(number: &str) -> ApplicationSubmission {
    ApplicationSubmission {
        registration_number: number.to_string(),
        student: StudentProfile {
            name: "Kabir Sen".to_string(),
            parent_name: None,
            contact: ContactDetails {
                email: "kabir.sen@example.edu".to_string(),
                phone: "+91-90000-12345".to_string(),
            },
        },
        placement: AcademicPlacement {
            school: SchoolId("science".to_string()),
            course: CourseId("bsc".to_string()),
            branch: BranchId("physics".to_string()),
        },
    }
}

fn wired(
    policy: ReapplicationPolicy,
) -> (
    Arc<Coordinator>,
    Arc<CertificateDesk>,
    tokio::sync::mpsc::UnboundedReceiver<ClearanceEvent>,
) {
    let repository = Arc::new(InMemoryClearanceRepository::default());
    let (publisher, receiver) = ChannelEventPublisher::channel();
    let events = Arc::new(publisher);
    let desk = Arc::new(CertificateDesk::default());
    let locks = Arc::new(KeyedLocks::new());
    let finalization = Arc::new(FinalizationService::new(
        repository.clone(),
        desk.clone(),
        events.clone(),
        locks.clone(),
    ));
    let coordinator =
        WorkflowCoordinator::new(repository, events, registry(), finalization)
            .with_policy(policy)
            .with_locks(locks);
    (Arc::new(coordinator), desk, receiver)
}

fn drain(receiver: &mut tokio::sync::mpsc::UnboundedReceiver<ClearanceEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        names.push(event.name());
    }
    names
}

#[test]
fn csv_registry_skips_inactive_departments() {
    let registry = registry();
    assert_eq!(registry.len(), 3);
    let names: Vec<_> = registry.required().map(|d| d.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Central Library", "Hostel Office", "Accounts Section"]
    );
}

#[test]
fn clearance_runs_from_submission_to_certificate() {
    let (coordinator, desk, mut events) = wired(ReapplicationPolicy::default());
    let record = coordinator.submit(submission("PH-2020-117")).expect("submitted");

    coordinator
        .record_decision(&record.id, DecisionInput::approve("library", "librarian"))
        .expect("library approves");
    let rejected = coordinator
        .record_decision(
            &record.id,
            DecisionInput::reject("hostel", "warden", "KEY_NOT_RETURNED", ""),
        )
        .expect("hostel rejects");
    assert_eq!(rejected.status, AggregateStatus::Rejected);

    coordinator
        .open_reapplication(&record.id, ReapplicationRequest::reply("key returned"))
        .expect("reapplication opened");

    coordinator
        .record_decision(&record.id, DecisionInput::approve("hostel", "warden"))
        .expect("hostel approves");
    let completed = coordinator
        .record_decision(&record.id, DecisionInput::approve("accounts", "cashier"))
        .expect("accounts approves");
    assert_eq!(completed.status, AggregateStatus::Completed);

    let view = coordinator.status(&record.id).expect("status");
    assert_eq!(
        view.certificate_reference,
        Some(CertificateReference(format!("NOC/{}", record.id)))
    );
    assert_eq!(view.reapplication_count, 1);
    assert_eq!(desk.calls.load(Ordering::SeqCst), 1);

    assert_eq!(
        drain(&mut events),
        vec![
            "submitted",
            "department_decided",
            "department_decided",
            "rejected",
            "reapplication_opened",
            "department_decided",
            "department_decided",
            "completed",
            "certificate_issued",
        ]
    );
}

#[test]
fn racing_final_decisions_issue_one_certificate() {
    for round in 0..10 {
        let (coordinator, desk, _events) = wired(ReapplicationPolicy::default());
        let record = coordinator
            .submit(submission(&format!("PH-2020-2{round:02}")))
            .expect("submitted");

        let outcomes: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = ["library", "hostel", "accounts"]
                .iter()
                .flat_map(|department| [*department; 4])
                .map(|department| {
                    let coordinator = &coordinator;
                    let id = &record.id;
                    scope.spawn(move || {
                        coordinator.record_decision(id, DecisionInput::approve(department, "staff"))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread joins"))
                .collect()
        });

        let accepted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(accepted, 3, "one decision per department");
        assert!(outcomes.iter().all(|outcome| matches!(
            outcome,
            Ok(_) | Err(ClearanceError::AlreadyDecided { .. })
        )));
        assert_eq!(desk.calls.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn ceiling_leaves_application_rejected() {
    let (coordinator, _desk, _events) = wired(ReapplicationPolicy {
        max_reapplications: 1,
        ..ReapplicationPolicy::default()
    });
    let record = coordinator.submit(submission("PH-2020-300")).expect("submitted");

    coordinator
        .record_decision(
            &record.id,
            DecisionInput::reject("accounts", "cashier", "FEES_DUE", ""),
        )
        .expect("rejected");
    coordinator
        .open_reapplication(&record.id, ReapplicationRequest::reply("paid"))
        .expect("first reapplication");
    coordinator
        .record_decision(
            &record.id,
            DecisionInput::reject("accounts", "cashier", "FEES_DUE", "still due"),
        )
        .expect("rejected again");

    assert!(matches!(
        coordinator.open_reapplication(&record.id, ReapplicationRequest::reply("paid now")),
        Err(ClearanceError::ReapplicationLimitExceeded { limit: 1 })
    ));
    assert_eq!(
        coordinator.status(&record.id).expect("status").status,
        AggregateStatus::Rejected
    );

    let again = coordinator
        .submit(submission("PH-2020-300"))
        .expect("terminal rejection frees the registration number");
    assert_ne!(again.id, record.id);
}
