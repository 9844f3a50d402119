//! Per-client connection lifecycle for the game server.
//!
//! Each accepted socket gets its own task and one player identity for its
//! lifetime. Frames are newline-delimited JSON; a dedicated writer task
//! drains an unbounded channel so room broadcasts and direct replies never
//! interleave partial lines on the socket.

use std::{net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::MAX_LINE_LEN,
    dto::{action::ClientAction, response::ServerReply},
    services::registry::GameRegistry,
};

/// Fallback payload used when a reply itself fails to serialize.
const SERVER_ERROR_LINE: &str = r#"{"success":false,"message":"Server error"}"#;

/// Drive one client connection from accept to disconnect.
pub async fn handle_connection(registry: Arc<GameRegistry>, stream: TcpStream, peer: SocketAddr) {
    let player_id = Uuid::new_v4();
    info!(%peer, player = %player_id, "client connected");

    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (mut sink, mut frames) = framed.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    // Writer task keeps broadcasts flowing even while we await inbound frames.
    let writer_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(line) = outbound_rx.recv().await {
            if sink.send(line).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(err) => {
                warn!(player = %player_id, error = %err, "closing connection after framing error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match parse_action(&line) {
            Ok(action) => dispatch(&registry, player_id, &outbound_tx, action).await,
            Err(reply) => reply,
        };
        if !send_reply(&outbound_tx, &reply) {
            break;
        }
    }

    registry.cleanup(player_id).await;
    drop(outbound_tx);
    let _ = writer_task.await;
    info!(%peer, player = %player_id, "client disconnected");
}

/// Parse one request line, mapping malformed input to a failure reply.
fn parse_action(line: &str) -> Result<ClientAction, ServerReply> {
    match serde_json::from_str::<ClientAction>(line) {
        Ok(action) => Ok(action),
        Err(err) if err.to_string().starts_with("unknown variant") => {
            Err(ServerReply::failure("Unknown action"))
        }
        Err(_) => Err(ServerReply::failure("Invalid JSON")),
    }
}

/// Route a parsed action through the registry and build the direct reply.
///
/// Every error is resolved here into a failure reply; nothing propagates out
/// to tear down the connection worker.
async fn dispatch(
    registry: &Arc<GameRegistry>,
    connection_id: Uuid,
    outbound_tx: &mpsc::UnboundedSender<String>,
    action: ClientAction,
) -> ServerReply {
    if let Err(err) = action.validate() {
        return ServerReply::failure(format!("Invalid request: {err}"));
    }

    match action {
        ClientAction::CreateRoom(payload) => {
            let room_id = registry.create_room(payload.level);
            match registry
                .register_player(
                    &room_id,
                    connection_id,
                    payload.player_name,
                    outbound_tx.clone(),
                )
                .await
            {
                Ok(game_state) => ServerReply::joined(room_id, connection_id, game_state),
                Err(err) => err.into(),
            }
        }
        ClientAction::JoinRoom(payload) => {
            match registry
                .register_player(
                    &payload.room_id,
                    connection_id,
                    payload.player_name,
                    outbound_tx.clone(),
                )
                .await
            {
                Ok(game_state) => ServerReply::joined(payload.room_id, connection_id, game_state),
                Err(err) => err.into(),
            }
        }
        ClientAction::RevealCard(payload) => {
            let acting = payload.player_id.unwrap_or(connection_id);
            match registry.reveal(acting, payload.card_id).await {
                Ok((outcome, game_state)) => ServerReply::reveal(outcome.as_result(), game_state),
                Err(err) => err.into(),
            }
        }
        ClientAction::GetGameState(payload) => {
            let subject = payload.player_id.unwrap_or(connection_id);
            match registry.snapshot_for(subject).await {
                Ok(game_state) => ServerReply::state(game_state),
                Err(err) => err.into(),
            }
        }
    }
}

/// Queue a reply line for the writer task. Returns false once the writer is
/// gone and the connection should wind down.
fn send_reply<T>(outbound_tx: &mpsc::UnboundedSender<String>, reply: &T) -> bool
where
    T: ?Sized + Serialize,
{
    let line = match serde_json::to_string(reply) {
        Ok(line) => line,
        Err(err) => {
            warn!(error = %err, "failed to serialize reply");
            SERVER_ERROR_LINE.to_string()
        }
    };
    outbound_tx.send(line).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn test_registry() -> Arc<GameRegistry> {
        GameRegistry::new(ServerConfig {
            pairs: 2,
            ..ServerConfig::default()
        })
    }

    #[test]
    fn malformed_and_unknown_lines_map_to_distinct_failures() {
        let unknown = parse_action(r#"{"action":"fly"}"#).unwrap_err();
        let garbage = parse_action("{not json").unwrap_err();

        let unknown = serde_json::to_value(&unknown).unwrap();
        let garbage = serde_json::to_value(&garbage).unwrap();
        assert_eq!(unknown["message"], "Unknown action");
        assert_eq!(garbage["message"], "Invalid JSON");
    }

    #[tokio::test]
    async fn create_room_round_trip_through_dispatch() {
        let registry = test_registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();

        let action = parse_action(r#"{"action":"create_room","player_name":"Alice"}"#).unwrap();
        let reply = dispatch(&registry, connection_id, &tx, action).await;

        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["player_id"], connection_id.to_string());
        assert_eq!(value["game_state"]["state"], "waiting");

        // The creator received their own player_joined broadcast.
        let broadcast: serde_json::Value =
            serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(broadcast["type"], "player_joined");
    }

    #[tokio::test]
    async fn oversized_player_name_is_rejected_before_dispatch() {
        let registry = test_registry();
        let (tx, _rx) = mpsc::unbounded_channel();

        let raw = format!(
            r#"{{"action":"create_room","player_name":"{}"}}"#,
            "x".repeat(64)
        );
        let action = parse_action(&raw).unwrap();
        let reply = dispatch(&registry, Uuid::new_v4(), &tx, action).await;
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn reveal_without_joining_fails_politely() {
        let registry = test_registry();
        let (tx, _rx) = mpsc::unbounded_channel();

        let action = parse_action(r#"{"action":"reveal_card","card_id":0}"#).unwrap();
        let reply = dispatch(&registry, Uuid::new_v4(), &tx, action).await;
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["message"], "Not in a game");
    }
}
