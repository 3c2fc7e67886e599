//! WebSocket transport for the live-session authority, grounded on the
//! teacher's `WsAudioSession`/`audio_ws_handler` pair: a thin adapter that
//! turns `actix_ws::Message`s into authority calls and authority output
//! into socket writes.

use std::sync::Arc;
use std::time::Instant;

use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures_util::StreamExt;
use keyboardia_core::ClientMessage;
use tokio::sync::mpsc;

use crate::authority::{SessionRegistry, ToClient};

#[derive(serde::Deserialize)]
pub struct ConnectQuery {
    pub player_id: String,
    pub session_id: String,
}

pub async fn session_ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<ConnectQuery>,
    registry: web::Data<Arc<SessionRegistry>>,
) -> Result<HttpResponse, Error> {
    let (response, session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let player_id = query.player_id.clone();
    let session_id = query.session_id.clone();
    let registry = registry.get_ref().clone();

    actix_web::rt::spawn(async move {
        let authority = match registry.get_or_load(&session_id).await {
            Ok(authority) => authority,
            Err(e) => {
                log::warn!("failed to load session {session_id}: {e}");
                return;
            }
        };

        let (to_client_tx, mut to_client_rx) = mpsc::unbounded_channel::<ToClient>();
        let (player_id_for_identity, identity_color, identity_name, snapshot) = {
            let mut authority = authority.lock().await;
            let (color, name, snapshot) = authority.connect(&player_id, to_client_tx, Instant::now());
            (player_id.clone(), color, name, snapshot)
        };

        let mut write_session = session.clone();
        let identity = keyboardia_core::ServerMessage::Identity {
            player_id: player_id_for_identity,
            color: identity_color,
            name: identity_name,
        };
        let _ = send_json(&mut write_session, &identity).await;
        let _ = send_json(&mut write_session, &snapshot).await;

        let writer_session = session.clone();
        let writer = actix_web::rt::spawn(async move {
            let mut writer_session = writer_session;
            while let Some(out) = to_client_rx.recv().await {
                match out {
                    ToClient::Message(msg) => {
                        if send_json(&mut writer_session, &msg).await.is_err() {
                            break;
                        }
                    }
                    ToClient::Close { code, reason } => {
                        let close_code = if code == 1000 { actix_ws::CloseCode::Normal } else { actix_ws::CloseCode::Away };
                        let _ = writer_session
                            .close(Some(actix_ws::CloseReason { code: close_code, description: Some(reason.to_string()) }))
                            .await;
                        break;
                    }
                }
            }
        });

        while let Some(Ok(msg)) = msg_stream.next().await {
            let now = Instant::now();
            match msg {
                Message::Text(text) => {
                    let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                        log::debug!("ignoring malformed client message from {player_id}");
                        continue;
                    };
                    let mut authority = authority.lock().await;
                    authority.prune_stale(now);
                    match client_msg {
                        ClientMessage::Hello { .. } => {}
                        ClientMessage::Heartbeat => authority.record_heartbeat(&player_id, now),
                        ClientMessage::Mutate { seq, mutation } => {
                            authority.handle_mutate(&player_id, seq, mutation, now);
                        }
                    }
                }
                Message::Close(_) => break,
                Message::Ping(bytes) => {
                    let _ = session.clone().pong(&bytes).await;
                }
                _ => {}
            }
        }

        writer.abort();
        authority.lock().await.disconnect(&player_id);
    });

    Ok(response)
}

async fn send_json(session: &mut actix_ws::Session, msg: &keyboardia_core::ServerMessage) -> Result<(), ()> {
    let text = serde_json::to_string(msg).map_err(|_| ())?;
    session.text(text).await.map_err(|_| ())
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws/session", web::get().to(session_ws_handler));
}
