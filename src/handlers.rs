use crate::broadcasts_handler;
use crate::db::Gateway;
use crate::envelope::{HandlerRequest, HandlerResponse, InvocationContext};
use crate::errors::AppError;
use crate::leads_handler;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Header carrying the authenticated caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state injected into handlers.
pub struct AppState<G> {
    /// Opens one database session per invocation.
    pub gateway: G,
    /// Owner used when a request carries no `X-User-Id`.
    pub default_user_id: i64,
}

/// The two functions this service hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Leads,
    Broadcasts,
}

impl Function {
    pub fn name(self) -> &'static str {
        match self {
            Function::Leads => leads_handler::FUNCTION_NAME,
            Function::Broadcasts => broadcasts_handler::FUNCTION_NAME,
        }
    }

    pub async fn call<G: Gateway>(
        self,
        gateway: &G,
        ctx: &InvocationContext,
        request: &HandlerRequest,
    ) -> Result<HandlerResponse, AppError> {
        match self {
            Function::Leads => leads_handler::handle(gateway, ctx, request).await,
            Function::Broadcasts => broadcasts_handler::handle(gateway, ctx, request).await,
        }
    }
}

impl IntoResponse for HandlerResponse {
    /// Renders the envelope verbatim: status, headers and body text.
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!("Dropping invalid response header '{}'", name),
            }
        }
        response
    }
}

/// Resolves the caller identity for an invocation.
pub fn caller_id(headers: &HeaderMap, default_user_id: i64) -> Result<i64, AppError> {
    match headers.get(USER_ID_HEADER) {
        None => Ok(default_user_id),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .ok_or_else(|| AppError::BadRequest("Invalid X-User-Id header".to_string())),
    }
}

/// Builds the request envelope from a plain HTTP request.
pub fn to_envelope(
    method: &Method,
    query: HashMap<String, String>,
    id: Option<String>,
    body: String,
) -> HandlerRequest {
    let mut request = HandlerRequest::new(method.as_str());
    request.query_string_parameters = Some(query);
    if !body.is_empty() {
        request.body = Some(body);
    }
    if let Some(id) = id {
        request = request.with_path_id(id);
    }
    request
}

async fn invoke<G: Gateway>(
    state: &AppState<G>,
    function: Function,
    headers: &HeaderMap,
    request: HandlerRequest,
) -> Result<HandlerResponse, AppError> {
    let user_id = caller_id(headers, state.default_user_id)?;
    let ctx = InvocationContext::new(function.name(), user_id);
    function.call(&state.gateway, &ctx, &request).await
}

/// Health check endpoint. Never touches the database.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "crm-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// ANY /api/v1/leads
pub async fn leads_collection<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Result<HandlerResponse, AppError> {
    tracing::info!("{} /leads", method);
    let request = to_envelope(&method, query, None, body);
    invoke(&state, Function::Leads, &headers, request).await
}

/// ANY /api/v1/leads/:id
pub async fn leads_item<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    method: Method,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Result<HandlerResponse, AppError> {
    tracing::info!("{} /leads/{}", method, id);
    let request = to_envelope(&method, query, Some(id), body);
    invoke(&state, Function::Leads, &headers, request).await
}

/// ANY /api/v1/broadcasts
pub async fn broadcasts_collection<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Result<HandlerResponse, AppError> {
    tracing::info!("{} /broadcasts", method);
    let request = to_envelope(&method, query, None, body);
    invoke(&state, Function::Broadcasts, &headers, request).await
}

/// ANY /api/v1/broadcasts/:id
pub async fn broadcasts_item<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    method: Method,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Result<HandlerResponse, AppError> {
    tracing::info!("{} /broadcasts/{}", method, id);
    let request = to_envelope(&method, query, Some(id), body);
    invoke(&state, Function::Broadcasts, &headers, request).await
}

/// POST /api/v1/invoke/leads
///
/// Takes a raw request envelope and returns the raw response envelope, the
/// way a function runtime would call the handler.
pub async fn invoke_leads<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    headers: HeaderMap,
    Json(request): Json<HandlerRequest>,
) -> Result<Json<HandlerResponse>, AppError> {
    invoke(&state, Function::Leads, &headers, request)
        .await
        .map(Json)
}

/// POST /api/v1/invoke/broadcasts
pub async fn invoke_broadcasts<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    headers: HeaderMap,
    Json(request): Json<HandlerRequest>,
) -> Result<Json<HandlerResponse>, AppError> {
    invoke(&state, Function::Broadcasts, &headers, request)
        .await
        .map(Json)
}

/// Function routes, without the health check or any middleware.
pub fn routes<G: Gateway>() -> Router<Arc<AppState<G>>> {
    Router::new()
        .route("/api/v1/leads", any(leads_collection::<G>))
        .route("/api/v1/leads/:id", any(leads_item::<G>))
        .route("/api/v1/broadcasts", any(broadcasts_collection::<G>))
        .route("/api/v1/broadcasts/:id", any(broadcasts_item::<G>))
        .route("/api/v1/invoke/leads", post(invoke_leads::<G>))
        .route("/api/v1/invoke/broadcasts", post(invoke_broadcasts::<G>))
}

/// Health check plus function routes, bound to `state`.
pub fn router<G: Gateway>(state: Arc<AppState<G>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(routes::<G>())
        .with_state(state)
}
