use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use pulse_core::{hydrate, with_store};
use pulse_db::Database;
use pulse_db::models::{PollOptionRow, PollRow, PollVoteRow};
use pulse_types::ChatError;
use pulse_types::api::{Claims, CreatePollRequest, VoteRequest};
use pulse_types::models::{Poll, PollOption};

use crate::auth::AppState;
use crate::conversations::load_role;
use crate::error::{ApiError, ApiResult};

const MIN_OPTIONS: usize = 2;
const MAX_OPTIONS: usize = 10;

/// POST /conversations/{conversation_id}/polls — group members only.
pub async fn create_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<CreatePollRequest>,
) -> ApiResult<impl IntoResponse> {
    let (conv, _) = load_role(&state.db, conversation_id, claims.sub).await?;
    if conv.kind != "group" {
        return Err(
            ChatError::validation("polls are only available in group conversations").into(),
        );
    }

    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err(ChatError::validation("poll question is required").into());
    }
    let labels: Vec<String> = req
        .options
        .iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if labels.len() < MIN_OPTIONS || labels.len() > MAX_OPTIONS {
        return Err(ChatError::validation("a poll needs between 2 and 10 options").into());
    }
    if req.expires_at.is_some_and(|at| at <= Utc::now()) {
        return Err(ChatError::validation("poll expiry must be in the future").into());
    }

    let poll_id = Uuid::new_v4();
    let poll_key = poll_id.to_string();
    let conv_key = conversation_id.to_string();
    let creator_key = claims.sub.to_string();
    let expires_at = req.expires_at.map(|at| at.to_rfc3339());
    with_store(&state.db, move |db| {
        let now = Utc::now().to_rfc3339();
        db.create_poll(
            &poll_key,
            &conv_key,
            &creator_key,
            &question,
            &labels,
            expires_at.as_deref(),
            &now,
        )
    })
    .await?;

    let poll = poll_response(&state.db, poll_id).await?;
    Ok((StatusCode::CREATED, Json(poll)))
}

/// GET /conversations/{conversation_id}/polls — newest first.
pub async fn list_polls(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Poll>>> {
    state.router.require_member(conversation_id, claims.sub).await?;

    let conv_key = conversation_id.to_string();
    let loaded = with_store(&state.db, move |db| {
        let rows = db.polls_for_conversation(&conv_key)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let options = db.poll_options(&row.id)?;
            let votes = db.poll_votes(&row.id)?;
            out.push((row, options, votes));
        }
        Ok(out)
    })
    .await?;

    Ok(Json(
        loaded
            .into_iter()
            .map(|(row, options, votes)| assemble_poll(row, options, votes))
            .collect(),
    ))
}

/// POST /conversations/{conversation_id}/polls/{poll_id}/vote — voting
/// again moves the caller's vote; closed polls reject.
pub async fn vote(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((conversation_id, poll_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<Json<Poll>> {
    state.router.require_member(conversation_id, claims.sub).await?;

    let poll = poll_response(&state.db, poll_id).await?;
    if poll.conversation_id != conversation_id {
        return Err(ChatError::NotFound("poll").into());
    }
    if poll.is_closed(Utc::now()) {
        return Err(ChatError::validation("poll is closed").into());
    }
    if req.option_index >= poll.options.len() {
        return Err(ChatError::validation("poll option does not exist").into());
    }

    let poll_key = poll_id.to_string();
    let voter_key = claims.sub.to_string();
    with_store(&state.db, move |db| {
        db.cast_vote(&poll_key, &voter_key, req.option_index as i64)
    })
    .await?;

    Ok(Json(poll_response(&state.db, poll_id).await?))
}

/// Fetch and assemble one poll with its options and votes.
async fn poll_response(db: &Arc<Database>, poll_id: Uuid) -> Result<Poll, ApiError> {
    let key = poll_id.to_string();
    let loaded = with_store(db, move |db| {
        let Some(row) = db.get_poll(&key)? else {
            return Ok(None);
        };
        let options = db.poll_options(&key)?;
        let votes = db.poll_votes(&key)?;
        Ok(Some((row, options, votes)))
    })
    .await?;

    let (row, options, votes) = loaded.ok_or(ChatError::NotFound("poll"))?;
    Ok(assemble_poll(row, options, votes))
}

fn assemble_poll(row: PollRow, options: Vec<PollOptionRow>, votes: Vec<PollVoteRow>) -> Poll {
    let mut votes_by_option: HashMap<i64, Vec<Uuid>> = HashMap::new();
    for vote in votes {
        if let Some(voter) = hydrate::parse_uuid(&vote.voter_id, "poll voter") {
            votes_by_option
                .entry(vote.option_index)
                .or_default()
                .push(voter);
        }
    }

    Poll {
        id: hydrate::parse_uuid(&row.id, "poll").unwrap_or_default(),
        conversation_id: hydrate::parse_uuid(&row.conversation_id, "poll conversation")
            .unwrap_or_default(),
        created_by: hydrate::parse_uuid(&row.created_by, "poll creator").unwrap_or_default(),
        question: row.question,
        options: options
            .into_iter()
            .map(|o| PollOption {
                label: o.label,
                votes: votes_by_option.remove(&o.option_index).unwrap_or_default(),
            })
            .collect(),
        expires_at: hydrate::parse_ts_opt(row.expires_at.as_deref(), "poll expires_at"),
        created_at: hydrate::parse_ts(&row.created_at, "poll created_at"),
    }
}
