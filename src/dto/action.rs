//! Client-to-server actions, tagged by the `action` field.

use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::state::session::Level;

use super::validation::{validate_player_name, validate_room_code};

/// Every request a client can send over the wire.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    /// Create a fresh room and join it as the first player.
    CreateRoom(CreateRoom),
    /// Join an existing room by its code.
    JoinRoom(JoinRoom),
    /// Reveal one card as part of the acting player's turn.
    RevealCard(RevealCard),
    /// Fetch the current snapshot of the player's room.
    GetGameState(GetGameState),
}

impl ClientAction {
    /// Run field validation for the payload variants that carry client input.
    pub fn validate(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            ClientAction::CreateRoom(payload) => payload.validate(),
            ClientAction::JoinRoom(payload) => payload.validate(),
            ClientAction::RevealCard(_) | ClientAction::GetGameState(_) => Ok(()),
        }
    }
}

/// Payload of the `create_room` action.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoom {
    /// Requested difficulty; unknown values fall back to normal.
    #[serde(default)]
    pub level: Level,
    /// Display name for the creating player; empty picks a generated one.
    #[serde(default)]
    #[validate(custom(function = "validate_player_name"))]
    pub player_name: String,
}

/// Payload of the `join_room` action.
#[derive(Debug, Deserialize, Validate)]
pub struct JoinRoom {
    /// Code of the room to join.
    #[validate(custom(function = "validate_room_code"))]
    pub room_id: String,
    /// Display name for the joining player; empty picks a generated one.
    #[serde(default)]
    #[validate(custom(function = "validate_player_name"))]
    pub player_name: String,
}

/// Payload of the `reveal_card` action.
#[derive(Debug, Deserialize)]
pub struct RevealCard {
    /// Acting player; defaults to the identity bound to the connection.
    #[serde(default)]
    pub player_id: Option<Uuid>,
    /// Index of the card to flip.
    pub card_id: usize,
}

/// Payload of the `get_game_state` action.
#[derive(Debug, Deserialize)]
pub struct GetGameState {
    /// Player whose room to snapshot; defaults to the connection identity.
    #[serde(default)]
    pub player_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_room_parses_with_defaults() {
        let action: ClientAction = serde_json::from_str(r#"{"action":"create_room"}"#).unwrap();
        let ClientAction::CreateRoom(payload) = action else {
            panic!("expected create_room");
        };
        assert_eq!(payload.level, Level::Normal);
        assert!(payload.player_name.is_empty());
    }

    #[test]
    fn unknown_level_falls_back_to_normal() {
        let action: ClientAction =
            serde_json::from_str(r#"{"action":"create_room","level":"nightmare"}"#).unwrap();
        let ClientAction::CreateRoom(payload) = action else {
            panic!("expected create_room");
        };
        assert_eq!(payload.level, Level::Normal);
    }

    #[test]
    fn join_room_validation_rejects_bad_code() {
        let action: ClientAction = serde_json::from_str(
            r#"{"action":"join_room","room_id":"nope","player_name":"Alice"}"#,
        )
        .unwrap();
        assert!(action.validate().is_err());
    }

    #[test]
    fn reveal_card_parses_player_and_card() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"action":"reveal_card","player_id":"{id}","card_id":3}}"#);
        let action: ClientAction = serde_json::from_str(&raw).unwrap();
        let ClientAction::RevealCard(payload) = action else {
            panic!("expected reveal_card");
        };
        assert_eq!(payload.player_id, Some(id));
        assert_eq!(payload.card_id, 3);
    }

    #[test]
    fn unknown_action_is_a_parse_error() {
        assert!(serde_json::from_str::<ClientAction>(r#"{"action":"teleport"}"#).is_err());
    }
}
