use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use pulse_api::auth::{self, AppState, AppStateInner};
use pulse_api::media::LocalMediaStore;
use pulse_api::middleware::{decode_token, require_auth};
use pulse_api::{conversations, media, messages, participants, polls};
use pulse_core::enrichment::{Enricher, HttpEnricher, KeywordEnricher};
use pulse_core::pipeline::MessagePipeline;
use pulse_core::presence::PresenceRegistry;
use pulse_core::receipts::ReceiptTracker;
use pulse_core::router::RoomRouter;
use pulse_core::sweeper;
use pulse_gateway::{GatewayContext, connection};

#[derive(Clone)]
struct ServerState {
    gateway: GatewayContext,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PULSE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PULSE_DB_PATH").unwrap_or_else(|_| "pulse.db".into());
    let host = std::env::var("PULSE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PULSE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let media_dir = std::env::var("PULSE_MEDIA_DIR").unwrap_or_else(|_| "./media".into());
    let media_base = std::env::var("PULSE_MEDIA_BASE_URL").unwrap_or_else(|_| "/media".into());
    let sweep_secs: u64 = std::env::var("PULSE_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);

    // Init database
    let db = Arc::new(pulse_db::Database::open(&PathBuf::from(&db_path))?);

    // Enrichment collaborator: remote endpoint when configured, keyword
    // fallback otherwise
    let enricher: Arc<dyn Enricher> = match std::env::var("PULSE_ENRICHMENT_URL") {
        Ok(url) if !url.is_empty() => {
            let timeout_ms: u64 = std::env::var("PULSE_ENRICHMENT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000);
            info!("Enrichment endpoint: {}", url);
            Arc::new(HttpEnricher::new(url, timeout_ms)?)
        }
        _ => {
            info!("No enrichment endpoint configured, using keyword fallback");
            Arc::new(KeywordEnricher)
        }
    };

    // Shared engine
    let registry = PresenceRegistry::new();
    let router = RoomRouter::new(Arc::clone(&db), registry.clone());
    let receipts = ReceiptTracker::new(Arc::clone(&db), registry.clone());
    let pipeline = MessagePipeline::new(
        Arc::clone(&db),
        registry.clone(),
        router.clone(),
        receipts.clone(),
        enricher,
    );

    // Background sweep for expired messages
    tokio::spawn(sweeper::run_sweep_loop(Arc::clone(&db), sweep_secs));

    let gateway = GatewayContext {
        db: Arc::clone(&db),
        registry,
        router: router.clone(),
        pipeline: pipeline.clone(),
        receipts: receipts.clone(),
    };

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        router,
        pipeline,
        receipts,
        media: Arc::new(LocalMediaStore::new(media_dir, media_base)),
    });

    let state = ServerState { gateway, jwt_secret };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/participants/me", get(participants::me))
        .route("/participants/me/profile", put(participants::update_profile))
        .route("/participants/me/privacy", put(participants::update_privacy))
        .route("/participants/me/focus", put(participants::update_focus))
        .route("/participants/search", get(participants::search))
        .route("/participants/{participant_id}", get(participants::get_participant))
        .route("/conversations", post(conversations::create_direct).get(conversations::list))
        .route("/conversations/group", post(conversations::create_group))
        .route("/conversations/{conversation_id}", get(conversations::get).put(conversations::update_group))
        .route("/conversations/{conversation_id}/members", post(conversations::add_members))
        .route(
            "/conversations/{conversation_id}/members/{participant_id}",
            delete(conversations::remove_member),
        )
        .route("/conversations/{conversation_id}/expiry", put(conversations::update_expiry))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/conversations/{conversation_id}/seen", put(messages::mark_seen))
        .route(
            "/conversations/{conversation_id}/polls",
            post(polls::create_poll).get(polls::list_polls),
        )
        .route("/conversations/{conversation_id}/polls/{poll_id}/vote", post(polls::vote))
        .route("/messages/search", get(messages::search_messages))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/messages/{message_id}/pin", put(messages::toggle_pin))
        .route("/media", post(media::upload))
        .layer(DefaultBodyLimit::max(media::MAX_MEDIA_SIZE))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Pulse server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: String,
}

/// Pre-authenticated upgrade: the token rides a query parameter because
/// browser WebSocket clients cannot set an Authorization header.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let claims =
        decode_token(&state.jwt_secret, &query.token).map_err(|_| StatusCode::UNAUTHORIZED)?;

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.gateway, claims.sub, claims.name)
    }))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
