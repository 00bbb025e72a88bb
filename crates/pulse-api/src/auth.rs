use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use pulse_core::pipeline::MessagePipeline;
use pulse_core::receipts::ReceiptTracker;
use pulse_core::router::RoomRouter;
use pulse_core::with_store;
use pulse_db::Database;
use pulse_types::ChatError;
use pulse_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::{ApiError, ApiResult};
use crate::media::MediaStore;

/// Auto-reply text a fresh account starts with. Changed through the focus
/// settings endpoint.
const DEFAULT_AUTO_REPLY: &str = "I am currently in focus mode. I will get back to you soon.";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub router: RoomRouter,
    pub pipeline: MessagePipeline,
    pub receipts: ReceiptTracker,
    pub media: Arc<dyn MediaStore>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    // Validate input
    let name = req.name.trim().to_string();
    if name.is_empty() || name.chars().count() > 64 {
        return Err(ChatError::validation("name must be between 1 and 64 characters").into());
    }
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ChatError::validation("a valid email is required").into());
    }
    if req.password.len() < 8 {
        return Err(ChatError::validation("password must be at least 8 characters").into());
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| ChatError::Internal("password hashing failed".into()))?
        .to_string();

    let participant_id = Uuid::new_v4();

    // Existence check and insert share one closure so a concurrent register
    // with the same email cannot slip between them.
    let created = {
        let name = name.clone();
        let email = email.clone();
        let id_key = participant_id.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        with_store(&state.db, move |db| {
            if db.get_participant_by_email(&email)?.is_some() {
                return Ok(false);
            }
            db.create_participant(&id_key, &name, &email, &password_hash, DEFAULT_AUTO_REPLY, &now)?;
            Ok(true)
        })
        .await?
    };
    if !created {
        return Err(ApiError::Conflict("email already registered"));
    }

    let token = create_token(&state.jwt_secret, participant_id, &name)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            participant_id,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = req.email.trim().to_lowercase();
    let row = with_store(&state.db, move |db| db.get_participant_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&row.password)
        .map_err(|_| ChatError::Internal("stored password hash is corrupt".into()))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let participant_id: Uuid = row
        .id
        .parse()
        .map_err(|_| ChatError::Internal("stored participant id is corrupt".into()))?;

    let token = create_token(&state.jwt_secret, participant_id, &row.name)?;

    Ok(Json(LoginResponse {
        participant_id,
        name: row.name,
        token,
    }))
}

fn create_token(secret: &str, participant_id: Uuid, name: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: participant_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::decode_token;

    #[test]
    fn tokens_round_trip_through_the_middleware_decoder() {
        let id = Uuid::new_v4();
        let token = create_token("test-secret", id, "dana").unwrap();

        let claims = decode_token("test-secret", &token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.name, "dana");

        assert!(decode_token("other-secret", &token).is_err());
    }
}
