use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{ApplicationId, ApplicationSubmission, DepartmentId};
use super::errors::ClearanceError;
use super::events::EventPublisher;
use super::reapplication::{ReapplicationOutcome, ReapplicationRequest};
use super::repository::ClearanceRepository;
use super::service::WorkflowCoordinator;
use super::tracker::DecisionInput;
use super::views::ApplicationStatusView;

type Coordinator<R, E> = State<Arc<WorkflowCoordinator<R, E>>>;

/// Router builder exposing the clearance workflow over HTTP.
pub fn clearance_router<R, E>(coordinator: Arc<WorkflowCoordinator<R, E>>) -> Router
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    Router::new()
        .route(
            "/api/v1/clearance/applications",
            post(submit_handler::<R, E>),
        )
        .route(
            "/api/v1/clearance/applications/:application_id",
            get(status_handler::<R, E>),
        )
        .route(
            "/api/v1/clearance/applications/:application_id/decisions",
            post(decision_handler::<R, E>),
        )
        .route(
            "/api/v1/clearance/applications/:application_id/reapplications",
            post(reapplication_handler::<R, E>),
        )
        .route(
            "/api/v1/clearance/applications/:application_id/reapplication-limit",
            put(limit_handler::<R, E>),
        )
        .route(
            "/api/v1/clearance/applications/:application_id/history",
            get(history_handler::<R, E>),
        )
        .route(
            "/api/v1/clearance/departments/:department_id/worklist",
            get(worklist_handler::<R, E>),
        )
        .route(
            "/api/v1/clearance/departments/:department_id/summary",
            get(summary_handler::<R, E>),
        )
        .with_state(coordinator)
}

#[derive(Debug, Serialize)]
struct ReapplicationResponse {
    #[serde(flatten)]
    outcome: ReapplicationOutcome,
    application: ApplicationStatusView,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LimitBody {
    #[serde(default)]
    limit: Option<u32>,
}

pub(crate) fn error_status(error: &ClearanceError) -> StatusCode {
    match error {
        ClearanceError::NotFound(_) | ClearanceError::UnknownDepartment(_) => {
            StatusCode::NOT_FOUND
        }
        ClearanceError::DuplicateActiveApplication(_)
        | ClearanceError::AlreadyDecided { .. }
        | ClearanceError::ApplicationTerminalState(_)
        | ClearanceError::ReapplicationLimitExceeded { .. }
        | ClearanceError::ApplicationNotRejected(_)
        | ClearanceError::ReapplicationCooldown { .. } => StatusCode::CONFLICT,
        ClearanceError::NoDepartmentsConfigured
        | ClearanceError::MissingRejectionReason
        | ClearanceError::MissingReplyMessage
        | ClearanceError::UnknownAcademicReference(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ClearanceError::IncompleteInitialization { .. } | ClearanceError::Repository(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(error: ClearanceError) -> Response {
    let status = error_status(&error);
    let message = if error.is_validation() {
        error.to_string()
    } else {
        tracing::error!(code = error.code(), error = %error, "clearance request failed");
        "internal error; retry the request".to_string()
    };
    let payload = json!({
        "code": error.code(),
        "error": message,
    });
    (status, axum::Json(payload)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, ClearanceError>) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn submit_handler<R, E>(
    State(coordinator): Coordinator<R, E>,
    axum::Json(submission): axum::Json<ApplicationSubmission>,
) -> Response
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    let result = coordinator
        .submit(submission)
        .and_then(|record| coordinator.status(&record.id));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn status_handler<R, E>(
    State(coordinator): Coordinator<R, E>,
    Path(application_id): Path<String>,
) -> Response
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    respond(
        StatusCode::OK,
        coordinator.status(&ApplicationId(application_id)),
    )
}

pub(crate) async fn decision_handler<R, E>(
    State(coordinator): Coordinator<R, E>,
    Path(application_id): Path<String>,
    axum::Json(input): axum::Json<DecisionInput>,
) -> Response
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    respond(
        StatusCode::OK,
        coordinator.record_decision(&ApplicationId(application_id), input),
    )
}

pub(crate) async fn reapplication_handler<R, E>(
    State(coordinator): Coordinator<R, E>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<ReapplicationRequest>,
) -> Response
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    let id = ApplicationId(application_id);
    let result = coordinator.open_reapplication(&id, request).and_then(|outcome| {
        coordinator
            .status(&id)
            .map(|application| ReapplicationResponse {
                outcome,
                application,
            })
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn limit_handler<R, E>(
    State(coordinator): Coordinator<R, E>,
    Path(application_id): Path<String>,
    axum::Json(body): axum::Json<LimitBody>,
) -> Response
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    let id = ApplicationId(application_id);
    let result = coordinator
        .override_reapplication_limit(&id, body.limit)
        .and_then(|_| coordinator.status(&id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn history_handler<R, E>(
    State(coordinator): Coordinator<R, E>,
    Path(application_id): Path<String>,
) -> Response
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    respond(
        StatusCode::OK,
        coordinator.history(&ApplicationId(application_id)),
    )
}

pub(crate) async fn worklist_handler<R, E>(
    State(coordinator): Coordinator<R, E>,
    Path(department_id): Path<String>,
) -> Response
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    respond(
        StatusCode::OK,
        coordinator.worklist(&DepartmentId(department_id)),
    )
}

pub(crate) async fn summary_handler<R, E>(
    State(coordinator): Coordinator<R, E>,
    Path(department_id): Path<String>,
) -> Response
where
    R: ClearanceRepository + 'static,
    E: EventPublisher + 'static,
{
    respond(
        StatusCode::OK,
        coordinator.department_summary(&DepartmentId(department_id)),
    )
}
