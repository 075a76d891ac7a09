use clap::Args;
use clearance::error::AppError;
use clearance::workflows::clearance::{
    AcademicPlacement, ApplicationStatusView, ApplicationSubmission, BranchId, ContactDetails,
    CourseId, DecisionInput, DepartmentId, DepartmentRegistry, FinalizationService,
    InMemoryClearanceRepository, KeyedLocks, RecordingEventPublisher, ReapplicationPolicy,
    ReapplicationRequest, SchoolId, StudentProfile, WorkflowCoordinator,
};
use std::sync::Arc;

use crate::infra::InMemoryCertificateDesk;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Required departments as `id:Name` pairs separated by commas.
    #[arg(long, default_value = "library:Library,hostel:Hostel,accounts:Accounts")]
    pub(crate) departments: String,
    /// Department that rejects the first cycle.
    #[arg(long, default_value = "hostel")]
    pub(crate) rejecting_department: String,
    /// Registration number used for the demo student.
    #[arg(long, default_value = "CS-2021-044")]
    pub(crate) registration_number: String,
    /// Reapplication ceiling for the demo policy.
    #[arg(long, default_value_t = 5)]
    pub(crate) max_reapplications: u32,
}

fn demo_submission(registration_number: &str) -> ApplicationSubmission {
    ApplicationSubmission {
        registration_number: registration_number.to_string(),
        student: StudentProfile {
            name: "Meera Iyer".to_string(),
            parent_name: Some("R. Iyer".to_string()),
            contact: ContactDetails {
                email: "meera.iyer@example.edu".to_string(),
                phone: "+91-98400-22222".to_string(),
            },
        },
        placement: AcademicPlacement {
            school: SchoolId("engineering".to_string()),
            course: CourseId("btech".to_string()),
            branch: BranchId("cse".to_string()),
        },
    }
}

fn render_status(view: &ApplicationStatusView) {
    println!(
        "  {} [{}] reapplications {} (remaining {})",
        view.application_id,
        view.status.label(),
        view.reapplication_count,
        view.reapplications_remaining
    );
    for department in &view.departments {
        let detail = department
            .state
            .reason_code()
            .map(|reason| format!(" ({reason})"))
            .unwrap_or_default();
        println!(
            "    - {}: {}{} cycle {}",
            department.department_name,
            department.state.label(),
            detail,
            department.cycle
        );
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        departments,
        rejecting_department,
        registration_number,
        max_reapplications,
    } = args;

    let registry = Arc::new(DepartmentRegistry::from_pairs(&departments)?);
    let rejecting = DepartmentId::new(&rejecting_department);

    let repository = Arc::new(InMemoryClearanceRepository::default());
    let events = Arc::new(RecordingEventPublisher::default());
    let desk = Arc::new(InMemoryCertificateDesk::default());
    let locks = Arc::new(KeyedLocks::new());
    let finalization = Arc::new(FinalizationService::new(
        repository.clone(),
        desk.clone(),
        events.clone(),
        locks.clone(),
    ));
    let coordinator =
        WorkflowCoordinator::new(repository, events.clone(), registry.clone(), finalization)
            .with_policy(ReapplicationPolicy {
                max_reapplications,
                ..ReapplicationPolicy::default()
            })
            .with_locks(locks);

    println!("No-dues clearance demo");
    let record = coordinator.submit(demo_submission(&registration_number))?;
    println!(
        "- Submitted {} for {} across {} departments",
        record.id,
        registration_number,
        registry.len()
    );

    // A rejection freezes the application, so the rejecting department decides last.
    let mut order = registry.required_ids();
    order.sort_by_key(|department| *department == rejecting);
    for department in order {
        let input = if department == rejecting {
            DecisionInput::reject(
                department.0.as_str(),
                "demo-officer",
                "DUES_OUTSTANDING",
                "settle the outstanding balance",
            )
        } else {
            DecisionInput::approve(department.0.as_str(), "demo-officer")
        };
        let updated = coordinator.record_decision(&record.id, input)?;
        println!(
            "- {} recorded {} -> application {}",
            updated.department.department_name,
            updated.department.state.label(),
            updated.status.label()
        );
    }
    render_status(&coordinator.status(&record.id)?);

    if registry.get(&rejecting).is_some() {
        let outcome = coordinator.open_reapplication(
            &record.id,
            ReapplicationRequest::reply("balance paid at the counter"),
        )?;
        let reset: Vec<_> = outcome.reset.iter().map(|id| id.0.as_str()).collect();
        println!(
            "- Reapplication cycle {} reset {}",
            outcome.cycle,
            reset.join(", ")
        );
        for department in &outcome.reset {
            let updated = coordinator.record_decision(
                &record.id,
                DecisionInput::approve(department.0.as_str(), "demo-officer"),
            )?;
            println!(
                "- {} recorded {} -> application {}",
                updated.department.department_name,
                updated.department.state.label(),
                updated.status.label()
            );
        }
    }

    let view = coordinator.status(&record.id)?;
    render_status(&view);
    match &view.certificate_reference {
        Some(reference) => println!("- Certificate issued: {}", reference.0),
        None => println!("- Certificate pending; the reconciliation sweep will retry"),
    }

    println!("Events emitted:");
    for event in events.events() {
        println!("  - {}", event.name());
    }
    println!("Certificates on the desk: {}", desk.issued_count());

    Ok(())
}
