use crate::db::{CrmStore, Gateway};
use crate::envelope::{parse_id, HandlerRequest, HandlerResponse, HttpMethod, InvocationContext};
use crate::errors::AppError;
use crate::models::{CreateLeadRequest, UpdateLeadRequest};
use chrono::Utc;
use tracing::Instrument;

/// Methods advertised to CORS preflights. DELETE is listed but answered with 405.
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const FUNCTION_NAME: &str = "leads";

/// Leads function entry point.
///
/// OPTIONS is answered without touching the database. Every other method gets
/// one session, which is closed before returning whatever the branch produced,
/// error or not.
pub async fn handle<G: Gateway>(
    gateway: &G,
    ctx: &InvocationContext,
    request: &HandlerRequest,
) -> Result<HandlerResponse, AppError> {
    let method = request.method();
    let span = tracing::info_span!(
        "invocation",
        function = %ctx.function_name,
        request_id = %ctx.request_id,
        method = ?method
    );

    async move {
        if method == HttpMethod::Options {
            return Ok(HandlerResponse::preflight(ALLOWED_METHODS));
        }

        let mut session = gateway.open().await?;
        let outcome = dispatch(&mut session, ctx, &method, request).await;
        session.close().await;

        match &outcome {
            Ok(response) => tracing::info!("Responded {}", response.status_code),
            Err(e) => tracing::error!("Leads invocation failed: {}", e),
        }
        outcome
    }
    .instrument(span)
    .await
}

async fn dispatch<S: CrmStore>(
    store: &mut S,
    ctx: &InvocationContext,
    method: &HttpMethod,
    request: &HandlerRequest,
) -> Result<HandlerResponse, AppError> {
    match method {
        HttpMethod::Get => match request.path_id() {
            Some(raw_id) => get_lead(store, parse_id(raw_id, "lead")?).await,
            None => list_leads(store, request.query("stage")).await,
        },
        HttpMethod::Post => create_lead(store, ctx, request).await,
        HttpMethod::Put => update_lead(store, request).await,
        _ => HandlerResponse::error(405, "Method not allowed"),
    }
}

async fn get_lead<S: CrmStore>(store: &mut S, id: i64) -> Result<HandlerResponse, AppError> {
    match store.find_lead(id).await? {
        Some(lead) => HandlerResponse::json(200, &lead),
        None => HandlerResponse::error(404, "Lead not found"),
    }
}

async fn list_leads<S: CrmStore>(
    store: &mut S,
    stage: Option<&str>,
) -> Result<HandlerResponse, AppError> {
    let leads = store.list_leads(stage).await?;
    tracing::debug!("Listed {} leads (stage filter: {:?})", leads.len(), stage);
    HandlerResponse::json(200, &leads)
}

async fn create_lead<S: CrmStore>(
    store: &mut S,
    ctx: &InvocationContext,
    request: &HandlerRequest,
) -> Result<HandlerResponse, AppError> {
    let payload: CreateLeadRequest = request.json_body()?;
    let new_lead = match payload.validate() {
        Ok(lead) => lead,
        Err(field) => {
            return HandlerResponse::error(400, format!("Missing required field: {}", field))
        }
    };

    let lead = store.insert_lead(ctx.user_id, &new_lead, Utc::now()).await?;
    tracing::info!("Created lead {} for user {}", lead.id, ctx.user_id);

    HandlerResponse::json(201, &lead)
}

async fn update_lead<S: CrmStore>(
    store: &mut S,
    request: &HandlerRequest,
) -> Result<HandlerResponse, AppError> {
    let Some(raw_id) = request.path_id() else {
        return HandlerResponse::error(400, "Lead ID is required");
    };

    let payload: UpdateLeadRequest = request.json_body()?;
    let changes = payload.into_changes();
    if changes.is_empty() {
        return HandlerResponse::error(400, "No fields to update");
    }

    let id = parse_id(raw_id, "lead")?;
    match store.update_lead(id, &changes, Utc::now()).await? {
        Some(lead) => {
            tracing::info!("Updated lead {} ({} field(s))", id, changes.len());
            HandlerResponse::json(200, &lead)
        }
        None => HandlerResponse::error(404, "Lead not found"),
    }
}
