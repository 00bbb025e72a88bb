use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use pulse_core::{hydrate, with_store};
use pulse_db::Database;
use pulse_db::models::ConversationRow;
use pulse_types::ChatError;
use pulse_types::api::{
    AddMembersRequest, Claims, ConversationPayload, CreateDirectRequest, CreateGroupRequest,
    UpdateExpiryRequest, UpdateGroupRequest,
};
use pulse_types::models::Role;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// POST /conversations — returns the existing direct conversation for the
/// pair when there is one, creating it otherwise.
pub async fn create_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateDirectRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.participant_id == claims.sub {
        return Err(ChatError::validation("cannot open a conversation with yourself").into());
    }

    let other_key = req.participant_id.to_string();
    let exists = with_store(&state.db, move |db| {
        Ok(db.get_participant(&other_key)?.is_some())
    })
    .await?;
    if !exists {
        return Err(ChatError::NotFound("participant").into());
    }

    let new_id = Uuid::new_v4().to_string();
    let me_key = claims.sub.to_string();
    let other_key = req.participant_id.to_string();
    let (id, created) = with_store(&state.db, move |db| {
        let now = Utc::now().to_rfc3339();
        db.get_or_create_direct(&new_id, &me_key, &other_key, &now)
    })
    .await?;

    let payload = conversation_response(&state.db, &id).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(payload)))
}

/// POST /conversations/group — the creator becomes admin.
pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ChatError::validation("group name is required").into());
    }

    let id = Uuid::new_v4().to_string();
    let conversation_id = id.clone();
    let me_key = claims.sub.to_string();
    let member_keys: Vec<String> = req.member_ids.iter().map(ToString::to_string).collect();
    with_store(&state.db, move |db| {
        let now = Utc::now().to_rfc3339();
        db.create_group(
            &id,
            &name,
            req.description.as_deref(),
            &me_key,
            &member_keys,
            &now,
        )
    })
    .await?;

    let payload = conversation_response(&state.db, &conversation_id).await?;
    Ok((StatusCode::CREATED, Json(payload)))
}

/// GET /conversations — every conversation the caller belongs to, most
/// recently active first.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ConversationPayload>>> {
    let me_key = claims.sub.to_string();
    let rows = with_store(&state.db, move |db| db.conversations_for(&me_key)).await?;
    Ok(Json(hydrate::conversation_payloads(&state.db, rows).await?))
}

/// GET /conversations/{conversation_id}
pub async fn get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<ConversationPayload>> {
    state.router.require_member(conversation_id, claims.sub).await?;
    Ok(Json(
        conversation_response(&state.db, &conversation_id.to_string()).await?,
    ))
}

/// PUT /conversations/{conversation_id} — group metadata, admin only.
pub async fn update_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<UpdateGroupRequest>,
) -> ApiResult<Json<ConversationPayload>> {
    let (conv, role) = load_role(&state.db, conversation_id, claims.sub).await?;
    if conv.kind != "group" {
        return Err(ChatError::validation("only group conversations can be updated").into());
    }
    if role < Role::Admin {
        return Err(ChatError::Forbidden("admin role required").into());
    }
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ChatError::validation("group name cannot be blank").into());
    }

    let key = conversation_id.to_string();
    with_store(&state.db, move |db| {
        let now = Utc::now().to_rfc3339();
        db.update_group(
            &key,
            req.name.as_deref(),
            req.description.as_deref(),
            req.avatar.as_deref(),
            &now,
        )
    })
    .await?;

    Ok(Json(
        conversation_response(&state.db, &conversation_id.to_string()).await?,
    ))
}

/// POST /conversations/{conversation_id}/members — moderator or admin.
pub async fn add_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AddMembersRequest>,
) -> ApiResult<Json<ConversationPayload>> {
    let (conv, role) = load_role(&state.db, conversation_id, claims.sub).await?;
    if conv.kind != "group" {
        return Err(ChatError::validation("members can only be added to groups").into());
    }
    if role < Role::Moderator {
        return Err(ChatError::Forbidden("moderator role required").into());
    }
    if req.member_ids.is_empty() {
        return Err(ChatError::validation("member_ids is required").into());
    }

    let key = conversation_id.to_string();
    let member_keys: Vec<String> = req.member_ids.iter().map(ToString::to_string).collect();
    with_store(&state.db, move |db| {
        let now = Utc::now().to_rfc3339();
        db.add_members(&key, &member_keys, &now)
    })
    .await?;

    Ok(Json(
        conversation_response(&state.db, &conversation_id.to_string()).await?,
    ))
}

/// DELETE /conversations/{conversation_id}/members/{participant_id} —
/// admins remove anyone; a member may remove themself to leave. If the last
/// admin goes, the longest-tenured remaining member is promoted.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((conversation_id, participant_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<ConversationPayload>> {
    let (conv, role) = load_role(&state.db, conversation_id, claims.sub).await?;
    if conv.kind != "group" {
        return Err(ChatError::validation("members can only be removed from groups").into());
    }
    if participant_id != claims.sub && role < Role::Admin {
        return Err(ChatError::Forbidden("admin role required").into());
    }

    let conv_key = conversation_id.to_string();
    let member_key = participant_id.to_string();
    let promoted = with_store(&state.db, move |db| {
        db.remove_member(&conv_key, &member_key)
    })
    .await?;

    if let Some(next_admin) = promoted {
        info!(
            "Promoted {} to admin of conversation {}",
            next_admin, conversation_id
        );
    }

    Ok(Json(
        conversation_response(&state.db, &conversation_id.to_string()).await?,
    ))
}

/// PUT /conversations/{conversation_id}/expiry — any member may change the
/// conversation's ephemeral-message policy.
pub async fn update_expiry(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<UpdateExpiryRequest>,
) -> ApiResult<Json<ConversationPayload>> {
    state.router.require_member(conversation_id, claims.sub).await?;

    if req.enabled && req.duration_ms.is_none() && !req.delete_after_seen {
        return Err(
            ChatError::validation("expiry needs a duration or delete-after-seen").into(),
        );
    }
    if req.duration_ms.is_some_and(|d| d <= 0) {
        return Err(ChatError::validation("expiry duration must be positive").into());
    }

    let key = conversation_id.to_string();
    with_store(&state.db, move |db| {
        let now = Utc::now().to_rfc3339();
        db.update_expiry(&key, req.enabled, req.duration_ms, req.delete_after_seen, &now)
    })
    .await?;

    Ok(Json(
        conversation_response(&state.db, &conversation_id.to_string()).await?,
    ))
}

/// Fetch and hydrate one conversation for a response body.
pub(crate) async fn conversation_response(
    db: &Arc<Database>,
    id: &str,
) -> Result<ConversationPayload, ApiError> {
    let key = id.to_string();
    let row = with_store(db, move |db| db.get_conversation(&key))
        .await?
        .ok_or(ChatError::NotFound("conversation"))?;

    let mut payloads = hydrate::conversation_payloads(db, vec![row]).await?;
    payloads
        .pop()
        .ok_or_else(|| ChatError::Internal("conversation hydration produced nothing".into()).into())
}

/// Conversation row plus the caller's role; `NotFound` / `AccessDenied` for
/// missing conversations and non-members.
pub(crate) async fn load_role(
    db: &Arc<Database>,
    conversation_id: Uuid,
    participant_id: Uuid,
) -> Result<(ConversationRow, Role), ApiError> {
    let conv_key = conversation_id.to_string();
    let member_key = participant_id.to_string();
    let loaded = with_store(db, move |db| {
        let Some(conv) = db.get_conversation(&conv_key)? else {
            return Ok(None);
        };
        let role = db.member_role(&conv_key, &member_key)?;
        Ok(Some((conv, role)))
    })
    .await?;

    let (conv, role) = loaded.ok_or(ChatError::NotFound("conversation"))?;
    let role = role.ok_or(ChatError::AccessDenied)?;
    Ok((conv, Role::parse(&role).unwrap_or(Role::Member)))
}
