//! Server-to-client replies and room broadcasts.
//!
//! Every reply carries `success`; failure replies additionally carry a
//! human-readable `message` that doubles as the machine reason code.

use serde::Serialize;
use uuid::Uuid;

use crate::error::GameError;

use super::snapshot::GameStateView;

/// A card echoed face-up in a reveal result.
#[derive(Debug, Clone, Serialize)]
pub struct CardFace {
    /// Deck position of the card.
    pub id: usize,
    /// Pair value printed on the card.
    pub value: String,
}

/// Result portion of a reveal, shared by the direct reply and the broadcast.
///
/// `match` and `continue_turn` only appear once a second card completed the
/// pick and the pair was resolved.
#[derive(Debug, Clone, Serialize)]
pub struct RevealResult {
    /// Always true; failed reveals are reported as [`ServerReply::Failure`].
    pub success: bool,
    /// The card the acting player just flipped.
    pub card: CardFace,
    /// Whether the two face-up cards formed a pair.
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub matched: Option<bool>,
    /// Whether the acting player keeps the turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_turn: Option<bool>,
}

/// Direct reply to a single client request.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ServerReply {
    /// Any rejected or failed request.
    Failure {
        /// Always false.
        success: bool,
        /// Human-readable reason.
        message: String,
    },
    /// Successful `create_room` or `join_room`.
    Joined {
        /// Always true.
        success: bool,
        /// Code of the room that was created or joined.
        room_id: String,
        /// Identity allocated to (or confirmed for) the requesting player.
        player_id: Uuid,
        /// Snapshot taken right after the join.
        game_state: GameStateView,
    },
    /// Successful `reveal_card`.
    Reveal {
        /// Outcome of the reveal.
        #[serde(flatten)]
        result: RevealResult,
        /// Snapshot taken right after the reveal resolved.
        game_state: GameStateView,
    },
    /// Successful `get_game_state`.
    State {
        /// Always true.
        success: bool,
        /// Current snapshot of the player's room.
        game_state: GameStateView,
    },
}

impl ServerReply {
    /// Build a failure reply from a reason string.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            success: false,
            message: message.into(),
        }
    }

    /// Build the reply for a successful room creation or join.
    pub fn joined(room_id: String, player_id: Uuid, game_state: GameStateView) -> Self {
        Self::Joined {
            success: true,
            room_id,
            player_id,
            game_state,
        }
    }

    /// Build the reply for a successful reveal.
    pub fn reveal(result: RevealResult, game_state: GameStateView) -> Self {
        Self::Reveal { result, game_state }
    }

    /// Build the reply for a state query.
    pub fn state(game_state: GameStateView) -> Self {
        Self::State {
            success: true,
            game_state,
        }
    }
}

impl From<GameError> for ServerReply {
    fn from(err: GameError) -> Self {
        Self::failure(err.to_string())
    }
}

/// Unsolicited messages pushed to every member of a room.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Broadcast {
    /// A new player entered the room.
    PlayerJoined {
        /// Snapshot taken right after the join.
        game_state: GameStateView,
    },
    /// The room state changed (reveal, timer hide, game start).
    GameUpdate {
        /// What triggered the update.
        result: UpdateResult,
        /// Snapshot taken right after the triggering mutation.
        game_state: GameStateView,
    },
}

/// The `result` payload of a `game_update` broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum UpdateResult {
    /// A player's reveal triggered the update.
    Reveal(RevealResult),
    /// A server-side transition triggered the update.
    Note {
        /// Short tag naming the transition.
        update: String,
    },
}

impl UpdateResult {
    /// Tag for updates caused by the game starting.
    pub fn game_started() -> Self {
        Self::Note {
            update: "game_started".into(),
        }
    }

    /// Tag for the easy-mode preview window elapsing.
    pub fn preview_finished() -> Self {
        Self::Note {
            update: "preview_finished".into(),
        }
    }

    /// Tag for a mismatched pair being hidden after its grace window.
    pub fn cards_hidden() -> Self {
        Self::Note {
            update: "cards_hidden_after_mismatch".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reply_shape() {
        let value = serde_json::to_value(ServerReply::failure("Room is full")).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["message"], "Room is full");
    }

    #[test]
    fn reveal_result_renames_match_and_omits_pending_fields() {
        let single = RevealResult {
            success: true,
            card: CardFace {
                id: 4,
                value: "card_2".into(),
            },
            matched: None,
            continue_turn: None,
        };
        let value = serde_json::to_value(&single).unwrap();
        assert!(value.get("match").is_none());
        assert!(value.get("continue_turn").is_none());

        let resolved = RevealResult {
            matched: Some(true),
            continue_turn: Some(true),
            ..single
        };
        let value = serde_json::to_value(&resolved).unwrap();
        assert_eq!(value["match"], true);
        assert_eq!(value["continue_turn"], true);
        assert!(value.get("matched").is_none());
    }

    #[test]
    fn broadcast_carries_type_tag() {
        let update = Broadcast::GameUpdate {
            result: UpdateResult::cards_hidden(),
            game_state: sample_state(),
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "game_update");
        assert_eq!(value["result"]["update"], "cards_hidden_after_mismatch");
    }

    fn sample_state() -> GameStateView {
        use crate::state::session::{GamePhase, Level};
        GameStateView {
            room_id: "AAAAAA".into(),
            level: Level::Normal,
            state: GamePhase::Waiting,
            current_player: None,
            players: Default::default(),
            cards: Vec::new(),
        }
    }
}
