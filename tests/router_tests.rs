/// End-to-end tests through the axum router with the in-memory gateway.
mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::MemoryGateway;
use crm_api::envelope::HandlerResponse;
use crm_api::handlers::{router, AppState};
use crm_api::models::Lead;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app(gateway: &MemoryGateway) -> Router {
    router(Arc::new(AppState {
        gateway: gateway.clone(),
        default_user_id: 1,
    }))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let gateway = MemoryGateway::new();

    let response = app(&gateway)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(gateway.sessions(), (0, 0));
}

#[tokio::test]
async fn test_rest_create_and_fetch_lead() {
    let gateway = MemoryGateway::new();

    let response = app(&gateway)
        .oneshot(
            Request::post("/api/v1/leads")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"name": "Svetlana", "stage": "contact"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let created: Lead = serde_json::from_value(body_json(response).await).unwrap();

    let response = app(&gateway)
        .oneshot(
            Request::get(format!("/api/v1/leads/{}", created.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let fetched: Lead = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_rest_stage_query_filter() {
    let gateway = MemoryGateway::new();
    gateway.seed_lead("New one", "new");
    gateway.seed_lead("Deal one", "deal");

    let response = app(&gateway)
        .oneshot(
            Request::get("/api/v1/leads?stage=deal")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "Deal one");
}

#[tokio::test]
async fn test_rest_preflight() {
    let gateway = MemoryGateway::new();

    let response = app(&gateway)
        .oneshot(
            Request::options("/api/v1/broadcasts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-methods"],
        "GET, POST, PUT, OPTIONS"
    );
    assert_eq!(response.headers()["access-control-max-age"], "86400");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.is_empty());
    assert_eq!(gateway.sessions(), (0, 0));
}

#[tokio::test]
async fn test_caller_header_sets_owner() {
    let gateway = MemoryGateway::new();

    let response = app(&gateway)
        .oneshot(
            Request::post("/api/v1/broadcasts")
                .header("X-User-Id", "42")
                .body(Body::from(r#"{"name": "Promo", "message": "Sale"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["user_id"], 42);
    assert_eq!(body["recipients_count"], 0);
}

#[tokio::test]
async fn test_invalid_caller_header_is_rejected() {
    let gateway = MemoryGateway::new();

    let response = app(&gateway)
        .oneshot(
            Request::get("/api/v1/leads")
                .header("X-User-Id", "root")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body, json!({"error": "Invalid X-User-Id header"}));
    assert_eq!(gateway.sessions(), (0, 0));
}

#[tokio::test]
async fn test_malformed_body_becomes_bad_request() {
    let gateway = MemoryGateway::new();

    let response = app(&gateway)
        .oneshot(
            Request::post("/api/v1/leads")
                .body(Body::from("{\"name\": "))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body = body_json(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid JSON body"));
}

#[tokio::test]
async fn test_unreachable_database_is_500() {
    let gateway = MemoryGateway::new();
    gateway.state().unreachable = true;

    let response = app(&gateway)
        .oneshot(Request::get("/api/v1/leads").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body = body_json(response).await;
    assert_eq!(body, json!({"error": "Database error"}));
}

#[tokio::test]
async fn test_invoke_returns_raw_envelope() {
    let gateway = MemoryGateway::new();
    let id = gateway.seed_lead("Enveloped", "new");

    let event = json!({
        "httpMethod": "PUT",
        "body": "{\"stage\": \"done\"}",
        "queryStringParameters": {},
        "pathParams": {"id": id.to_string()}
    });

    let response = app(&gateway)
        .oneshot(
            Request::post("/api/v1/invoke/leads")
                .header("content-type", "application/json")
                .body(Body::from(event.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    // The HTTP call succeeds; the function's own status lives in the envelope.
    assert_eq!(response.status(), StatusCode::OK);
    let envelope: HandlerResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(envelope.status_code, 200);
    assert!(!envelope.is_base64_encoded);
    let lead: Lead = envelope.parse_body().unwrap();
    assert_eq!(lead.stage, "done");
}

#[tokio::test]
async fn test_invoke_envelope_carries_not_found() {
    let gateway = MemoryGateway::new();

    let response = app(&gateway)
        .oneshot(
            Request::post("/api/v1/invoke/broadcasts")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"httpMethod": "GET", "pathParams": {"id": "3"}}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let envelope: HandlerResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(envelope.status_code, 404);
    assert_eq!(envelope.body, r#"{"error":"Broadcast not found"}"#);
}
