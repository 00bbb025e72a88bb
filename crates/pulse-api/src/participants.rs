use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use pulse_core::{hydrate, with_store};
use pulse_db::Database;
use pulse_types::ChatError;
use pulse_types::api::{
    Claims, ParticipantProfile, SearchParticipantsQuery, UpdateFocusRequest, UpdatePrivacyRequest,
    UpdateProfileRequest,
};
use pulse_types::models::Participant;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

const SEARCH_LIMIT: u32 = 20;

/// GET /participants/me — the caller's own account, privacy and focus
/// settings included.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Participant>> {
    Ok(Json(load_self(&state.db, claims.sub).await?))
}

/// GET /participants/{participant_id} — public profile with presence fields
/// filtered by the subject's visibility settings.
pub async fn get_participant(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(participant_id): Path<Uuid>,
) -> ApiResult<Json<ParticipantProfile>> {
    let key = participant_id.to_string();
    let row = with_store(&state.db, move |db| db.get_participant(&key))
        .await?
        .ok_or(ChatError::NotFound("participant"))?;

    Ok(Json(
        hydrate::participant_profile(&state.db, row, claims.sub).await?,
    ))
}

/// PUT /participants/me/profile — absent fields are left unchanged.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<Participant>> {
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ChatError::validation("name cannot be blank").into());
    }

    let id_key = claims.sub.to_string();
    with_store(&state.db, move |db| {
        db.update_profile(
            &id_key,
            req.name.as_deref(),
            req.bio.as_deref(),
            req.avatar.as_deref(),
        )
    })
    .await?;

    Ok(Json(load_self(&state.db, claims.sub).await?))
}

/// PUT /participants/me/privacy
pub async fn update_privacy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePrivacyRequest>,
) -> ApiResult<Json<Participant>> {
    let id_key = claims.sub.to_string();
    with_store(&state.db, move |db| {
        db.update_privacy(
            &id_key,
            req.show_online_status.map(|v| v.as_str()),
            req.show_last_seen.map(|v| v.as_str()),
            req.read_receipts,
        )?;
        if let Some(hidden) = &req.hidden_from {
            let keys: Vec<String> = hidden.iter().map(ToString::to_string).collect();
            db.set_presence_hidden(&id_key, &keys)?;
        }
        Ok(())
    })
    .await?;

    Ok(Json(load_self(&state.db, claims.sub).await?))
}

/// PUT /participants/me/focus
pub async fn update_focus(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateFocusRequest>,
) -> ApiResult<Json<Participant>> {
    let id_key = claims.sub.to_string();
    with_store(&state.db, move |db| {
        let days = req.schedule.as_ref().map(|s| s.days.join(","));
        let schedule = match (&req.schedule, &days) {
            (Some(s), Some(d)) => Some((s.start.as_str(), s.end.as_str(), d.as_str())),
            _ => None,
        };
        db.update_focus(&id_key, req.is_active, req.auto_reply.as_deref(), schedule)?;
        if let Some(allowed) = &req.allowed_contacts {
            let keys: Vec<String> = allowed.iter().map(ToString::to_string).collect();
            db.set_focus_allowed(&id_key, &keys)?;
        }
        Ok(())
    })
    .await?;

    Ok(Json(load_self(&state.db, claims.sub).await?))
}

/// GET /participants/search?q= — name or email contains-match, the caller
/// excluded.
pub async fn search(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchParticipantsQuery>,
) -> ApiResult<Json<Vec<ParticipantProfile>>> {
    let q = query.q.trim().to_string();
    if q.chars().count() < 2 {
        return Err(ChatError::validation("search query must be at least 2 characters").into());
    }

    let me_key = claims.sub.to_string();
    let rows = with_store(&state.db, move |db| {
        db.search_participants(&q, &me_key, SEARCH_LIMIT)
    })
    .await?;

    let mut profiles = Vec::with_capacity(rows.len());
    for row in rows {
        profiles.push(hydrate::participant_profile(&state.db, row, claims.sub).await?);
    }

    Ok(Json(profiles))
}

async fn load_self(db: &Arc<Database>, id: Uuid) -> Result<Participant, ApiError> {
    Ok(hydrate::load_participant(db, id)
        .await?
        .ok_or(ChatError::NotFound("participant"))?)
}
