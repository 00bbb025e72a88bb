use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use pulse_core::pipeline::MessageDraft;
use pulse_core::{hydrate, with_store};
use pulse_types::api::{
    Claims, DeleteMessageRequest, MarkSeenRequest, MessagePayload, MessageQuery,
    SearchMessagesQuery, SendMessageRequest,
};
use pulse_types::models::MessageKind;

use crate::auth::AppState;
use crate::error::ApiResult;

/// Largest page a single history or search request returns.
const MAX_PAGE: u32 = 200;

/// GET /conversations/{conversation_id}/messages?limit=&before= — newest
/// first; pass the oldest `created_at` of the previous page as `before` to
/// walk further back.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Json<Vec<MessagePayload>>> {
    state.router.require_member(conversation_id, claims.sub).await?;

    let conv_key = conversation_id.to_string();
    let viewer_key = claims.sub.to_string();
    let limit = query.limit.min(MAX_PAGE);
    let rows = with_store(&state.db, move |db| {
        db.get_messages(&conv_key, &viewer_key, limit, query.before.as_deref())
    })
    .await?;

    Ok(Json(hydrate::message_payloads(&state.db, rows).await?))
}

/// POST /conversations/{conversation_id}/messages — same pipeline as the
/// gateway's message:send, without an origin connection to exclude.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let draft = MessageDraft {
        conversation_id,
        sender_id: claims.sub,
        kind: req.media_kind.unwrap_or(MessageKind::Text),
        text: req.text,
        media_url: req.media_url,
        reply_to: req.reply_to,
        origin_conn: None,
    };

    let payload = state.pipeline.submit(draft).await?;
    Ok((StatusCode::CREATED, Json(payload)))
}

/// PUT /conversations/{conversation_id}/seen
pub async fn mark_seen(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MarkSeenRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let updates = state
        .receipts
        .mark_seen(conversation_id, claims.sub, req.message_ids)
        .await?;

    let ids: Vec<Uuid> = updates.iter().map(|u| u.message_id).collect();
    Ok(Json(json!({ "updated": ids })))
}

/// GET /messages/search?q=&conversation_id= — body contains-match across
/// the caller's conversations.
pub async fn search_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchMessagesQuery>,
) -> ApiResult<Json<Vec<MessagePayload>>> {
    let q = query.q.trim().to_string();
    if q.is_empty() {
        return Ok(Json(vec![]));
    }
    if let Some(conversation_id) = query.conversation_id {
        state.router.require_member(conversation_id, claims.sub).await?;
    }

    let viewer_key = claims.sub.to_string();
    let conv_key = query.conversation_id.map(|id| id.to_string());
    let limit = query.limit.min(MAX_PAGE);
    let rows = with_store(&state.db, move |db| {
        db.search_messages(&viewer_key, &q, conv_key.as_deref(), limit)
    })
    .await?;

    Ok(Json(hydrate::message_payloads(&state.db, rows).await?))
}

/// DELETE /messages/{message_id} — body `{for_everyone}` selects between a
/// tombstone visible to everyone (sender only) and hiding the message for
/// the caller alone.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<DeleteMessageRequest>,
) -> ApiResult<Response> {
    if req.for_everyone {
        let payload = state
            .pipeline
            .delete_for_everyone(claims.sub, message_id)
            .await?;
        Ok(Json(payload).into_response())
    } else {
        state.pipeline.delete_for_self(claims.sub, message_id).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

/// PUT /messages/{message_id}/pin — toggles; any member of the message's
/// conversation may pin or unpin.
pub async fn toggle_pin(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> ApiResult<Json<MessagePayload>> {
    let payload = state.pipeline.toggle_pin(claims.sub, message_id).await?;
    Ok(Json(payload))
}
