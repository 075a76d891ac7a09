use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::workflows::clearance::router::{error_status, submit_handler};
use crate::workflows::clearance::{
    ClearanceError, RecordingEventPublisher, WorkflowCoordinator,
};

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request builds")
}

#[tokio::test]
async fn submit_route_returns_created_status_view() {
    let router = router_for(harness().coordinator);

    let response = router
        .oneshot(post_json(
            "/api/v1/clearance/applications",
            serde_json::to_value(submission("CS-2024-001")).expect("serializable"),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json_body(response).await;
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["registration_number"], "CS-2024-001");
    assert_eq!(body["departments"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["departments"][0]["state"], "pending");
}

#[tokio::test]
async fn submit_handler_reports_storage_failures_without_raw_messages() {
    let coordinator = Arc::new(WorkflowCoordinator::new(
        Arc::new(UnavailableRepository),
        Arc::new(RecordingEventPublisher::default()),
        departments(),
        Arc::new(RecordingSink::default()),
    ));

    let response = submit_handler::<UnavailableRepository, RecordingEventPublisher>(
        State(coordinator),
        axum::Json(submission("CS-2024-002")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_json_body(response).await;
    assert_eq!(body["code"], "STORAGE_UNAVAILABLE");
    assert!(!body["error"]
        .as_str()
        .unwrap_or_default()
        .contains("database offline"));
}

#[tokio::test]
async fn decision_route_maps_business_errors_to_codes() {
    let h = harness();
    let record = h
        .coordinator
        .submit(submission("CS-2024-003"))
        .expect("submitted");
    let router = router_for(h.coordinator);
    let uri = format!("/api/v1/clearance/applications/{}/decisions", record.id);

    let missing_reason = router
        .clone()
        .oneshot(post_json(
            &uri,
            json!({ "department": "hostel", "decision": "reject", "actor": "warden" }),
        ))
        .await
        .expect("router responds");
    assert_eq!(missing_reason.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        read_json_body(missing_reason).await["code"],
        "MISSING_REJECTION_REASON"
    );

    let rejected = router
        .clone()
        .oneshot(post_json(
            &uri,
            json!({
                "department": "hostel",
                "decision": "reject",
                "actor": "warden",
                "reason_code": "KEY_NOT_RETURNED"
            }),
        ))
        .await
        .expect("router responds");
    assert_eq!(rejected.status(), StatusCode::OK);
    let body = read_json_body(rejected).await;
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["department"]["reason_code"], "KEY_NOT_RETURNED");

    let terminal = router
        .oneshot(post_json(
            &uri,
            json!({ "department": "accounts", "decision": "approve", "actor": "clerk" }),
        ))
        .await
        .expect("router responds");
    assert_eq!(terminal.status(), StatusCode::CONFLICT);
    assert_eq!(
        read_json_body(terminal).await["code"],
        "APPLICATION_TERMINAL_STATE"
    );
}

#[tokio::test]
async fn reapplication_route_returns_outcome_and_history() {
    let h = harness();
    let record = h
        .coordinator
        .submit(submission("CS-2024-004"))
        .expect("submitted");
    reject(&h.coordinator, &record.id, "hostel", "KEY_NOT_RETURNED");
    let router = router_for(h.coordinator);

    let response = router
        .clone()
        .oneshot(post_json(
            &format!(
                "/api/v1/clearance/applications/{}/reapplications",
                record.id
            ),
            json!({ "reply_message": "key returned" }),
        ))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["cycle"], 1);
    assert_eq!(body["reset"], json!(["hostel"]));
    assert_eq!(body["application"]["status"], "in_progress");

    let history = router
        .oneshot(get(&format!(
            "/api/v1/clearance/applications/{}/history",
            record.id
        )))
        .await
        .expect("router responds");
    assert_eq!(history.status(), StatusCode::OK);
    let entries = read_json_body(history).await;
    assert_eq!(entries[0]["prior_decision"], "rejected");
    assert_eq!(entries[0]["student_reply"], "key returned");
}

#[tokio::test]
async fn department_routes_render_worklist_and_summary() {
    let h = harness();
    let record = h
        .coordinator
        .submit(submission("CS-2024-005"))
        .expect("submitted");
    approve(&h.coordinator, &record.id, "library");
    let router = router_for(h.coordinator);

    let worklist = router
        .clone()
        .oneshot(get("/api/v1/clearance/departments/hostel/worklist"))
        .await
        .expect("router responds");
    assert_eq!(worklist.status(), StatusCode::OK);
    let entries = read_json_body(worklist).await;
    assert_eq!(entries[0]["application_id"], record.id.0.as_str());

    let summary = router
        .clone()
        .oneshot(get("/api/v1/clearance/departments/library/summary"))
        .await
        .expect("router responds");
    let body = read_json_body(summary).await;
    assert_eq!(body["approved"], 1);
    assert_eq!(body["department_name"], "Library");

    let unknown = router
        .oneshot(get("/api/v1/clearance/departments/sports/worklist"))
        .await
        .expect("router responds");
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn limit_route_overrides_ceiling() {
    let h = harness();
    let record = h
        .coordinator
        .submit(submission("CS-2024-006"))
        .expect("submitted");
    let router = router_for(h.coordinator);

    let response = router
        .oneshot(
            Request::put(format!(
                "/api/v1/clearance/applications/{}/reapplication-limit",
                record.id
            ))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "limit": 8 }).to_string()))
            .expect("request builds"),
        )
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json_body(response).await["reapplications_remaining"], 8);
}

#[tokio::test]
async fn status_handler_returns_not_found() {
    let coordinator = Arc::new(harness().coordinator);
    let response = crate::workflows::clearance::router::status_handler(
        State(coordinator),
        Path("app-unknown".to_string()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        read_json_body(response).await["code"],
        "APPLICATION_NOT_FOUND"
    );
}

#[test]
fn collaborator_failures_map_to_internal_error() {
    assert_eq!(
        error_status(&ClearanceError::IncompleteInitialization {
            expected: 3,
            found: 2
        }),
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
        error_status(&ClearanceError::MissingReplyMessage),
        StatusCode::UNPROCESSABLE_ENTITY
    );
}
