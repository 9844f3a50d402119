//! Process-wide table of rooms and the player-to-room back-references.
//!
//! The registry is the sole owner of every [`GameSession`]; connection
//! handlers refer to rooms by code and players by identifier only. Structural
//! mutations (create, register, cleanup) touch the sharded tables briefly,
//! while game mutations serialize on the per-room mutex. Broadcast fan-out
//! snapshots the recipient channels under the room lock and sends after
//! releasing it, so one slow client cannot stall the room.

use std::sync::Arc;

use dashmap::{DashMap, Entry};
use rand::Rng;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::ServerConfig,
    dto::{
        response::{Broadcast, UpdateResult},
        snapshot::GameStateView,
        validation::ROOM_CODE_LEN,
    },
    error::GameError,
    state::session::{GameSession, Level, RevealOutcome},
};

/// Alphabet room codes are drawn from.
const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

type SharedSession = Arc<Mutex<GameSession>>;

/// Registry of all live rooms, constructed once at process start.
pub struct GameRegistry {
    rooms: DashMap<String, SharedSession>,
    player_rooms: DashMap<Uuid, String>,
    config: ServerConfig,
}

impl GameRegistry {
    /// Build an empty registry wrapped in an [`Arc`] for cheap sharing.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            player_rooms: DashMap::new(),
            config,
        })
    }

    /// Number of live rooms, for startup and sweep logging.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Create a new room with a fresh collision-checked code.
    pub fn create_room(&self, level: Level) -> String {
        loop {
            let code = generate_room_code();
            match self.rooms.entry(code.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Mutex::new(GameSession::new(
                        code.clone(),
                        level,
                        self.config.pairs,
                    ))));
                    info!(room = %code, ?level, "created room");
                    return code;
                }
            }
        }
    }

    /// Add a player to a room, wiring their outbound channel for broadcasts.
    ///
    /// Returns the post-join snapshot. Fires the start transition (and the
    /// easy-mode preview timer) when this join brought the room to the
    /// starting count.
    pub async fn register_player(
        self: &Arc<Self>,
        room_id: &str,
        player_id: Uuid,
        name: String,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<GameStateView, GameError> {
        let session = self.shared_session(room_id).ok_or(GameError::RoomNotFound)?;

        let mut guard = session.lock().await;
        let outcome = guard.add_player(player_id, name, tx)?;
        self.player_rooms.insert(player_id, room_id.to_string());
        let snapshot = guard.snapshot();
        let recipients = guard.recipients();
        drop(guard);

        info!(room = %room_id, player = %player_id, "player joined");
        broadcast(
            &recipients,
            &Broadcast::PlayerJoined {
                game_state: snapshot.clone(),
            },
        );

        if outcome.started {
            info!(room = %room_id, "game started");
            broadcast(
                &recipients,
                &Broadcast::GameUpdate {
                    result: UpdateResult::game_started(),
                    game_state: snapshot.clone(),
                },
            );
        }
        if outcome.preview {
            self.schedule_preview_expiry(Arc::clone(&session));
        }

        Ok(snapshot)
    }

    /// Reveal a card on behalf of a player, resolving via their room
    /// back-reference. Broadcasts the update and schedules the mismatch-hide
    /// timer when the pick completed a pair that did not match.
    pub async fn reveal(
        self: &Arc<Self>,
        player_id: Uuid,
        card_id: usize,
    ) -> Result<(RevealOutcome, GameStateView), GameError> {
        let room_id = self
            .player_rooms
            .get(&player_id)
            .map(|entry| entry.value().clone())
            .ok_or(GameError::NotInGame)?;
        let session = self.shared_session(&room_id).ok_or(GameError::NotInGame)?;

        let mut guard = session.lock().await;
        let outcome = guard.reveal(card_id, player_id)?;
        if let Some(resolution) = outcome.resolution {
            if let Some(pair) = resolution.hide {
                self.schedule_hide(Arc::clone(&session), pair);
            }
            if resolution.finished {
                info!(room = %room_id, ranking = ?guard.final_ranking(), "game finished");
            }
        }
        let snapshot = guard.snapshot();
        let recipients = guard.recipients();
        drop(guard);

        broadcast(
            &recipients,
            &Broadcast::GameUpdate {
                result: UpdateResult::Reveal(outcome.as_result()),
                game_state: snapshot.clone(),
            },
        );

        Ok((outcome, snapshot))
    }

    /// Snapshot the room the given player belongs to.
    pub async fn snapshot_for(&self, player_id: Uuid) -> Result<GameStateView, GameError> {
        let room_id = self
            .player_rooms
            .get(&player_id)
            .map(|entry| entry.value().clone())
            .ok_or(GameError::NotInGame)?;
        let session = self.shared_session(&room_id).ok_or(GameError::NotInGame)?;
        let guard = session.lock().await;
        Ok(guard.snapshot())
    }

    /// Remove a player from their room, destroying the room when it empties.
    /// Idempotent: unknown players are a no-op.
    pub async fn cleanup(&self, player_id: Uuid) {
        let Some((_, room_id)) = self.player_rooms.remove(&player_id) else {
            return;
        };
        let Some(session) = self.shared_session(&room_id) else {
            return;
        };

        let mut guard = session.lock().await;
        guard.remove_player(&player_id);
        let empty = guard.is_empty();
        let age = guard.age();
        drop(guard);

        info!(room = %room_id, player = %player_id, "player left");
        if empty {
            self.rooms.remove(&room_id);
            info!(room = %room_id, ?age, "removed empty room");
        }
    }

    /// Periodically reap rooms idle beyond the configured ttl. Players of a
    /// reaped room learn about it on their next request ("Not in a game").
    pub fn spawn_idle_sweep(self: Arc<Self>) -> JoinHandle<()> {
        let ttl = self.config.room_idle_ttl;
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let candidates: Vec<(String, SharedSession)> = self
                    .rooms
                    .iter()
                    .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
                    .collect();

                for (room_id, session) in candidates {
                    let idle = session.lock().await.idle_for();
                    if idle < ttl {
                        continue;
                    }
                    self.rooms.remove(&room_id);
                    self.player_rooms.retain(|_, room| room != &room_id);
                    info!(room = %room_id, ?idle, "reaped idle room");
                }
                debug!(rooms = self.room_count(), "idle sweep pass complete");
            }
        })
    }

    /// One-shot timer hiding a mismatched pair after the grace window.
    /// The callback re-acquires the room lock, exactly as a request would.
    fn schedule_hide(self: &Arc<Self>, session: SharedSession, pair: [usize; 2]) {
        let delay = self.config.mismatch_hide;
        tokio::spawn(async move {
            sleep(delay).await;
            let mut guard = session.lock().await;
            guard.hide_cards(&pair);
            let snapshot = guard.snapshot();
            let recipients = guard.recipients();
            drop(guard);

            broadcast(
                &recipients,
                &Broadcast::GameUpdate {
                    result: UpdateResult::cards_hidden(),
                    game_state: snapshot,
                },
            );
        });
    }

    /// One-shot timer ending the easy-mode preview window.
    fn schedule_preview_expiry(self: &Arc<Self>, session: SharedSession) {
        let delay = self.config.preview;
        tokio::spawn(async move {
            sleep(delay).await;
            let mut guard = session.lock().await;
            guard.hide_unmatched();
            let snapshot = guard.snapshot();
            let recipients = guard.recipients();
            drop(guard);

            broadcast(
                &recipients,
                &Broadcast::GameUpdate {
                    result: UpdateResult::preview_finished(),
                    game_state: snapshot,
                },
            );
        });
    }

    fn shared_session(&self, room_id: &str) -> Option<SharedSession> {
        self.rooms
            .get(room_id)
            .map(|entry| Arc::clone(entry.value()))
    }
}

/// Deliver a broadcast to every recipient, skipping dead channels.
/// A failed delivery to one player never blocks the others.
fn broadcast(recipients: &[(Uuid, mpsc::UnboundedSender<String>)], message: &Broadcast) {
    let line = match serde_json::to_string(message) {
        Ok(line) => line,
        Err(err) => {
            warn!(error = %err, "failed to serialize broadcast; dropping it");
            return;
        }
    };

    for (player_id, tx) in recipients {
        if tx.send(line.clone()).is_err() {
            warn!(player = %player_id, "skipping broadcast to disconnected player");
        }
    }
}

/// Random six-character room code over A-Z and 0-9.
fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let index = rng.random_range(0..ROOM_CODE_CHARSET.len());
            ROOM_CODE_CHARSET[index] as char
        })
        .collect()
}
