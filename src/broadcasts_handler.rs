use crate::db::{CrmStore, Gateway};
use crate::envelope::{parse_id, HandlerRequest, HandlerResponse, HttpMethod, InvocationContext};
use crate::errors::AppError;
use crate::models::{
    CreateBroadcastRequest, CreatedBroadcast, UpdateBroadcastRequest, BROADCAST_LIST_LIMIT,
};
use tracing::Instrument;

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, OPTIONS";
pub const FUNCTION_NAME: &str = "broadcasts";

/// Broadcasts function entry point.
///
/// Same lifecycle as the leads function: preflight short-circuits, everything
/// else runs on one session that is closed on every exit path.
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
            Err(e) => tracing::error!("Broadcasts invocation failed: {}", e),
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
            Some(raw_id) => get_broadcast(store, parse_id(raw_id, "broadcast")?).await,
            None => {
                let broadcasts = store.list_broadcasts(BROADCAST_LIST_LIMIT).await?;
                HandlerResponse::json(200, &broadcasts)
            }
        },
        HttpMethod::Post => create_broadcast(store, ctx, request).await,
        HttpMethod::Put => update_broadcast(store, request).await,
        _ => HandlerResponse::error(405, "Method not allowed"),
    }
}

async fn get_broadcast<S: CrmStore>(store: &mut S, id: i64) -> Result<HandlerResponse, AppError> {
    match store.find_broadcast(id).await? {
        Some(broadcast) => HandlerResponse::json(200, &broadcast),
        None => HandlerResponse::error(404, "Broadcast not found"),
    }
}

/// Records a draft broadcast and fans it out to the segment's current leads.
///
/// Segment resolution and the inserts are not coordinated with concurrent
/// calls; two simultaneous posts for the same segment produce two full sets of
/// recipient rows.
async fn create_broadcast<S: CrmStore>(
    store: &mut S,
    ctx: &InvocationContext,
    request: &HandlerRequest,
) -> Result<HandlerResponse, AppError> {
    let payload: CreateBroadcastRequest = request.json_body()?;
    let new_broadcast = match payload.validate() {
        Ok(broadcast) => broadcast,
        Err(field) => {
            return HandlerResponse::error(400, format!("Missing required field: {}", field))
        }
    };

    let lead_ids = store.segment_lead_ids(&new_broadcast.segment).await?;
    tracing::debug!(
        "Segment '{}' resolved to {} lead(s)",
        new_broadcast.segment.as_str(),
        lead_ids.len()
    );

    let (broadcast, recipients) = store
        .insert_broadcast(ctx.user_id, &new_broadcast, &lead_ids)
        .await?;

    tracing::info!(
        "Created broadcast {} with {} recipient(s)",
        broadcast.id,
        recipients.len()
    );

    HandlerResponse::json(
        201,
        &CreatedBroadcast {
            broadcast,
            recipients_count: recipients.len(),
        },
    )
}

async fn update_broadcast<S: CrmStore>(
    store: &mut S,
    request: &HandlerRequest,
) -> Result<HandlerResponse, AppError> {
    let Some(raw_id) = request.path_id() else {
        return HandlerResponse::error(400, "Broadcast ID is required");
    };

    let payload: UpdateBroadcastRequest = request.json_body()?;
    let Some(status) = payload.status else {
        return HandlerResponse::error(400, "No valid fields to update");
    };

    let id = parse_id(raw_id, "broadcast")?;
    match store.update_broadcast_status(id, &status).await? {
        Some(broadcast) => {
            tracing::info!("Broadcast {} status set to '{}'", id, status);
            HandlerResponse::json(200, &broadcast)
        }
        None => HandlerResponse::error(404, "Broadcast not found"),
    }
}
