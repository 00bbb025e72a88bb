use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use pulse_core::pipeline::MessageDraft;
use pulse_core::presence::{announce_offline, announce_online, visible_online_roster};
use pulse_types::events::{ClientCommand, GatewayEvent};
use pulse_types::models::MessageKind;

use crate::GatewayContext;

/// Ping cadence. A connection that misses two consecutive Pongs (~30s of
/// silence) is considered dead and dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection. The JWT was already
/// validated at the HTTP upgrade layer, so this goes straight to Ready and
/// the event loop.
pub async fn handle_connection(
    socket: WebSocket,
    ctx: GatewayContext,
    participant_id: Uuid,
    name: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", name, participant_id);

    let ready = GatewayEvent::Ready {
        participant_id,
        name: name.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Register the targeted channel, then show this client who is already
    // online (filtered by each subject's own visibility settings).
    let (conn_id, mut user_rx, first) = ctx.registry.connect(participant_id).await;

    match visible_online_roster(&ctx.db, &ctx.registry, participant_id).await {
        Ok(roster) => {
            for subject in roster {
                let event = GatewayEvent::UserOnline {
                    participant_id: subject,
                };
                if sender
                    .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
                    .await
                    .is_err()
                {
                    ctx.registry.disconnect(participant_id, conn_id).await;
                    return;
                }
            }
        }
        Err(e) => warn!("Online roster for {} failed: {}", participant_id, e),
    }

    // Announce before subscribing so our own online event never echoes back
    // to this connection.
    if first {
        if let Err(e) = announce_online(&ctx.db, &ctx.registry, participant_id).await {
            warn!("Online announce for {} failed: {}", participant_id, e);
        }
    }
    let mut presence_rx = ctx.registry.subscribe();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward presence frames + targeted events to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = presence_rx.recv() => {
                    let frame = match result {
                        Ok(frame) => frame,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Presence receiver lagged by {} frames", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !frame.audience.allows(participant_id) {
                        continue;
                    }
                    let text = serde_json::to_string(&frame.event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("no pong after {} pings, closing connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client.
    let ctx_recv = ctx.clone();
    let name_recv = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&ctx_recv, conn_id, participant_id, &name_recv, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) sent an unparseable command: {} (raw: {})",
                            name_recv,
                            participant_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                        ctx_recv
                            .registry
                            .send_to_connection(
                                conn_id,
                                GatewayEvent::Error {
                                    message: format!("unrecognized command: {e}"),
                                },
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever half closes first takes the other down with it
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    ctx.router.leave_all(conn_id).await;
    let last = ctx.registry.disconnect(participant_id, conn_id).await;
    if last {
        if let Err(e) = announce_offline(&ctx.db, &ctx.registry, participant_id).await {
            warn!("Offline announce for {} failed: {}", participant_id, e);
        }
    }
    info!("{} ({}) disconnected from gateway", name, participant_id);
}

async fn handle_command(
    ctx: &GatewayContext,
    conn_id: Uuid,
    participant_id: Uuid,
    name: &str,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::Join { conversation_id } => {
            match ctx.router.join(conn_id, participant_id, conversation_id).await {
                Ok(()) => {
                    info!("{} ({}) joined conversation {}", name, participant_id, conversation_id);
                }
                Err(e) => send_error(ctx, conn_id, &e.to_string()).await,
            }
        }

        ClientCommand::Leave { conversation_id } => {
            ctx.router.leave(conn_id, conversation_id).await;
            info!("{} ({}) left conversation {}", name, participant_id, conversation_id);
        }

        ClientCommand::Send {
            conversation_id,
            text,
            media_url,
            media_kind,
            reply_to,
        } => {
            let draft = MessageDraft {
                conversation_id,
                sender_id: participant_id,
                kind: media_kind.unwrap_or(MessageKind::Text),
                text,
                media_url,
                reply_to,
                origin_conn: Some(conn_id),
            };
            if let Err(e) = ctx.pipeline.submit(draft).await {
                warn!("{} ({}) send failed: {}", name, participant_id, e);
                send_error(ctx, conn_id, &e.to_string()).await;
            }
        }

        // Typing stays in memory: only connections currently joined to the
        // conversation hear it, and the origin never gets its own echo.
        ClientCommand::TypingStart { conversation_id } => {
            ctx.router
                .send_to_joined(
                    conversation_id,
                    GatewayEvent::UserTyping {
                        conversation_id,
                        participant_id,
                        name: name.to_string(),
                    },
                    Some(conn_id),
                )
                .await;
        }

        ClientCommand::TypingStop { conversation_id } => {
            ctx.router
                .send_to_joined(
                    conversation_id,
                    GatewayEvent::UserStopTyping {
                        conversation_id,
                        participant_id,
                    },
                    Some(conn_id),
                )
                .await;
        }

        ClientCommand::MarkSeen {
            conversation_id,
            message_ids,
        } => {
            if let Err(e) = ctx
                .receipts
                .mark_seen(conversation_id, participant_id, message_ids)
                .await
            {
                warn!("{} ({}) mark seen failed: {}", name, participant_id, e);
                send_error(ctx, conn_id, &e.to_string()).await;
            }
        }

        // Call signaling is an opaque relay between the two ends.
        ClientCommand::CallInitiate {
            conversation_id,
            to,
            payload,
        } => {
            info!("{} ({}) calling {}", name, participant_id, to);
            ctx.registry
                .send_to_participant(
                    to,
                    GatewayEvent::CallIncoming {
                        conversation_id,
                        from: participant_id,
                        from_name: name.to_string(),
                        payload,
                    },
                )
                .await;
        }

        ClientCommand::CallAccept { to, payload } => {
            ctx.registry
                .send_to_participant(
                    to,
                    GatewayEvent::CallAccepted {
                        from: participant_id,
                        payload,
                    },
                )
                .await;
        }

        ClientCommand::CallReject { to } => {
            ctx.registry
                .send_to_participant(
                    to,
                    GatewayEvent::CallRejected {
                        from: participant_id,
                    },
                )
                .await;
        }

        ClientCommand::CallEnd { to } => {
            ctx.registry
                .send_to_participant(
                    to,
                    GatewayEvent::CallEnded {
                        from: participant_id,
                    },
                )
                .await;
        }
    }
}

async fn send_error(ctx: &GatewayContext, conn_id: Uuid, message: &str) {
    ctx.registry
        .send_to_connection(
            conn_id,
            GatewayEvent::Error {
                message: message.to_string(),
            },
        )
        .await;
}
