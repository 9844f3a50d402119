//! Per-room game session state machine.
//!
//! A session owns one room's players, deck, turn pointer, and lifecycle
//! phase. It is always mutated under the room's mutex; timer-driven
//! transitions (preview expiry, mismatch hide) re-acquire that same lock, so
//! every mutation of a room is linearized. Side effects (timers to schedule,
//! broadcasts to send) are returned as values and performed by the registry
//! layer, never from inside the session itself.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    dto::{
        response::{CardFace, RevealResult},
        snapshot::{CardView, GameStateView, PlayerView},
    },
    error::GameError,
    state::deck::{self, Card},
};

/// Hard cap on room membership.
pub const MAX_PLAYERS: usize = 4;
/// The game starts automatically once this many players have joined.
pub const MIN_PLAYERS_TO_START: usize = 2;

/// Difficulty variant of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Level {
    /// Standard rules: cards start face-down.
    #[default]
    Normal,
    /// The whole deck is previewed for a fixed window at game start.
    Easy,
}

impl From<String> for Level {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "easy" => Level::Easy,
            _ => Level::Normal,
        }
    }
}

/// Lifecycle phase of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Accepting joins; no reveals yet.
    Waiting,
    /// Reveals accepted from the current-turn player.
    InProgress,
    /// Terminal; every mutating action is rejected.
    Finished,
}

/// One participant of a room.
#[derive(Debug)]
pub struct Player {
    /// Display name.
    pub name: String,
    /// Number of pairs matched so far.
    pub score: u32,
    /// Whether this player currently holds the turn.
    pub is_turn: bool,
    /// Outbound channel feeding this player's connection writer task.
    pub tx: mpsc::UnboundedSender<String>,
}

/// What a successful join changed, for the registry to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The join flipped the room from waiting to in-progress.
    pub started: bool,
    /// The easy-mode preview was revealed; its expiry timer must be scheduled.
    pub preview: bool,
}

/// Outcome of a pair resolution, produced when a second card goes face-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// The two face-up cards shared a value.
    pub matched: bool,
    /// The acting player keeps the turn (always true on a match).
    pub continue_turn: bool,
    /// Mismatched card indices to hide once the grace window elapses.
    pub hide: Option<[usize; 2]>,
    /// Every card is now matched; the room reached its terminal phase.
    pub finished: bool,
}

/// Outcome of a successful reveal.
#[derive(Debug, Clone)]
pub struct RevealOutcome {
    /// The card the player just flipped.
    pub card: CardFace,
    /// Present only when this reveal completed a pair.
    pub resolution: Option<Resolution>,
}

impl RevealOutcome {
    /// Wire-level result shared by the direct reply and the room broadcast.
    pub fn as_result(&self) -> RevealResult {
        RevealResult {
            success: true,
            card: self.card.clone(),
            matched: self.resolution.map(|r| r.matched),
            continue_turn: self.resolution.map(|r| r.continue_turn),
        }
    }
}

/// Authoritative in-memory state of one room.
#[derive(Debug)]
pub struct GameSession {
    room_id: String,
    level: Level,
    players: IndexMap<Uuid, Player>,
    cards: Vec<Card>,
    phase: GamePhase,
    current_player: Option<Uuid>,
    /// Face-up, not-yet-resolved card indices; length 0 or 1 outside the
    /// atomic pair resolution.
    unresolved: Vec<usize>,
    created_at: OffsetDateTime,
    last_activity: Instant,
}

impl GameSession {
    /// Create a fresh room with a newly shuffled deck.
    pub fn new(room_id: String, level: Level, pairs: usize) -> Self {
        Self {
            room_id,
            level,
            players: IndexMap::new(),
            cards: deck::build_deck(pairs),
            phase: GamePhase::Waiting,
            current_player: None,
            unresolved: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
            last_activity: Instant::now(),
        }
    }

    /// Room code.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Difficulty the room was created with.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Number of joined players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// True once the last player left.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Whether the given player belongs to this room.
    pub fn contains_player(&self, player_id: &Uuid) -> bool {
        self.players.contains_key(player_id)
    }

    /// Time since the last mutating action.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Wall-clock age of the room, for teardown logging.
    pub fn age(&self) -> time::Duration {
        OffsetDateTime::now_utc() - self.created_at
    }

    /// Add a player, auto-starting the game when the minimum is reached.
    ///
    /// Late joins into an in-progress room are allowed up to [`MAX_PLAYERS`];
    /// joins into a finished room are rejected. The start transition fires at
    /// most once per room.
    pub fn add_player(
        &mut self,
        player_id: Uuid,
        name: String,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<JoinOutcome, GameError> {
        if self.phase == GamePhase::Finished {
            return Err(GameError::GameFinished);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(GameError::RoomFull);
        }

        let name = if name.trim().is_empty() {
            format!("Player_{}", &player_id.simple().to_string()[..8])
        } else {
            name
        };
        self.players.insert(
            player_id,
            Player {
                name,
                score: 0,
                is_turn: false,
                tx,
            },
        );
        self.touch();

        let mut outcome = JoinOutcome {
            started: false,
            preview: false,
        };
        if self.phase == GamePhase::Waiting && self.players.len() >= MIN_PLAYERS_TO_START {
            outcome = self.start();
        }
        Ok(outcome)
    }

    /// Waiting -> InProgress: pick a random first turn, and in easy mode
    /// reveal the whole deck for the preview window.
    fn start(&mut self) -> JoinOutcome {
        self.phase = GamePhase::InProgress;

        let index = rand::rng().random_range(0..self.players.len());
        if let Some((&player_id, player)) = self.players.get_index_mut(index) {
            player.is_turn = true;
            self.current_player = Some(player_id);
        }

        let preview = self.level == Level::Easy;
        if preview {
            for card in &mut self.cards {
                card.revealed = true;
            }
        }

        JoinOutcome {
            started: true,
            preview,
        }
    }

    /// Flip one card for the acting player and resolve the pair if this was
    /// the second pick.
    pub fn reveal(&mut self, card_id: usize, player_id: Uuid) -> Result<RevealOutcome, GameError> {
        if self.phase != GamePhase::InProgress || self.current_player != Some(player_id) {
            return Err(GameError::NotYourTurn);
        }

        let valid = self
            .cards
            .get(card_id)
            .is_some_and(|card| !card.revealed && !card.matched);
        if !valid {
            return Err(GameError::InvalidSelection);
        }

        let card = &mut self.cards[card_id];
        card.revealed = true;
        let face = CardFace {
            id: card.id,
            value: card.value.clone(),
        };
        self.unresolved.push(card_id);
        self.touch();

        let resolution = (self.unresolved.len() == 2).then(|| self.resolve_pair(player_id));
        Ok(RevealOutcome {
            card: face,
            resolution,
        })
    }

    /// Atomic resolution of the two face-up cards. Callers hold the room
    /// lock, so no other action for this room can interleave.
    fn resolve_pair(&mut self, player_id: Uuid) -> Resolution {
        let [first, second] = [self.unresolved[0], self.unresolved[1]];
        self.unresolved.clear();

        let matched = self.cards[first].value == self.cards[second].value;
        let hide = if matched {
            self.cards[first].matched = true;
            self.cards[second].matched = true;
            if let Some(player) = self.players.get_mut(&player_id) {
                player.score += 1;
            }
            None
        } else {
            self.switch_turn();
            Some([first, second])
        };

        let finished = self.cards.iter().all(|card| card.matched);
        if finished {
            self.phase = GamePhase::Finished;
        }

        Resolution {
            matched,
            continue_turn: matched,
            hide,
            finished,
        }
    }

    /// Pass the turn to the next player in join order, wrapping around.
    fn switch_turn(&mut self) {
        let Some(current) = self.current_player else {
            return;
        };
        let Some(index) = self.players.get_index_of(&current) else {
            return;
        };

        if let Some(player) = self.players.get_mut(&current) {
            player.is_turn = false;
        }
        let next_index = (index + 1) % self.players.len();
        if let Some((&next_id, next)) = self.players.get_index_mut(next_index) {
            next.is_turn = true;
            self.current_player = Some(next_id);
        }
    }

    /// Turn the given cards face-down again unless they got matched.
    /// Invoked by the mismatch-hide timer under the room lock.
    pub fn hide_cards(&mut self, card_ids: &[usize]) {
        for &card_id in card_ids {
            if let Some(card) = self.cards.get_mut(card_id) {
                if !card.matched {
                    card.revealed = false;
                }
            }
        }
        self.touch();
    }

    /// Turn every unmatched card face-down. Invoked when the easy-mode
    /// preview window elapses.
    pub fn hide_unmatched(&mut self) {
        for card in &mut self.cards {
            if !card.matched {
                card.revealed = false;
            }
        }
        self.touch();
    }

    /// Remove a player, handing the turn onward first when they held it.
    /// Returns false when the player was not a member.
    pub fn remove_player(&mut self, player_id: &Uuid) -> bool {
        if !self.players.contains_key(player_id) {
            return false;
        }

        if self.current_player == Some(*player_id)
            && self.phase == GamePhase::InProgress
            && self.players.len() > 1
        {
            self.switch_turn();
        }
        self.players.shift_remove(player_id);
        if self.current_player == Some(*player_id) {
            self.current_player = None;
        }
        self.touch();
        true
    }

    /// Players ranked by score descending; ties keep join order.
    pub fn final_ranking(&self) -> Vec<(Uuid, u32)> {
        let mut ranking: Vec<(Uuid, u32)> = self
            .players
            .iter()
            .map(|(&id, player)| (id, player.score))
            .collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1));
        ranking
    }

    /// Serialize the room for the wire, withholding hidden card values.
    pub fn snapshot(&self) -> GameStateView {
        GameStateView {
            room_id: self.room_id.clone(),
            level: self.level,
            state: self.phase,
            current_player: self.current_player,
            players: self
                .players
                .iter()
                .map(|(&id, player)| {
                    (
                        id,
                        PlayerView {
                            name: player.name.clone(),
                            score: player.score,
                            is_turn: player.is_turn,
                        },
                    )
                })
                .collect(),
            cards: self
                .cards
                .iter()
                .map(|card| {
                    let visible = card.revealed || card.matched;
                    CardView {
                        id: card.id,
                        revealed: visible,
                        value: visible.then(|| card.value.clone()),
                        matched: card.matched,
                    }
                })
                .collect(),
        }
    }

    /// Outbound channels of every current member, captured under the room
    /// lock so the registry can fan out after releasing it.
    pub fn recipients(&self) -> Vec<(Uuid, mpsc::UnboundedSender<String>)> {
        self.players
            .iter()
            .map(|(&id, player)| (id, player.tx.clone()))
            .collect()
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Test hook: hand the turn to a specific player.
    #[cfg(test)]
    pub(crate) fn set_turn(&mut self, player_id: Uuid) {
        for (id, player) in self.players.iter_mut() {
            player.is_turn = *id == player_id;
        }
        self.current_player = Some(player_id);
    }

    /// Test hook: the deck values in position order, face-up or not.
    #[cfg(test)]
    pub(crate) fn card_values(&self) -> Vec<String> {
        self.cards.iter().map(|card| card.value.clone()).collect()
    }
}
