//! Serialized views of room state pushed to clients.
//!
//! The snapshot is the confidentiality boundary: a card's value only ever
//! appears on the wire once the card is revealed or matched.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::session::{GamePhase, Level};

/// Full room snapshot, the `game_state` field of responses and broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateView {
    /// Six-character room code.
    pub room_id: String,
    /// Difficulty the room was created with.
    pub level: Level,
    /// Lifecycle phase of the room.
    pub state: GamePhase,
    /// Identifier of the player currently holding the turn, if any.
    pub current_player: Option<Uuid>,
    /// Players keyed by identifier, in join order.
    pub players: IndexMap<Uuid, PlayerView>,
    /// Every card of the deck, hidden values withheld.
    pub cards: Vec<CardView>,
}

/// Per-player slice of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    /// Display name.
    pub name: String,
    /// Number of pairs this player has matched.
    pub score: u32,
    /// Whether it is currently this player's turn.
    pub is_turn: bool,
}

/// Per-card slice of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardView {
    /// Position of the card in the deck.
    pub id: usize,
    /// Whether the card is currently face-up (revealed or matched).
    pub revealed: bool,
    /// The card value, present only when the card is face-up.
    pub value: Option<String>,
    /// Whether the card belongs to a resolved pair.
    pub matched: bool,
}
