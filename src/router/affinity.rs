//! Session-affinity tables pinning rooms to the backend that owns them.
//!
//! Entries are created exactly once, when a successful room-creation or join
//! response is observed in transit, and only removed when a backend is
//! explicitly dropped from the pool. Room state is not replicated, so losing
//! a pinned backend loses its rooms; the policy below only decides whether
//! requests for such rooms still target the pinned address or fail over
//! immediately.

use std::{net::SocketAddr, str::FromStr};

use dashmap::DashMap;
use thiserror::Error;

/// How requests pinned to an unhealthy backend are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AffinityPolicy {
    /// Keep routing to the pinned backend even while probes fail; the room
    /// state lives nowhere else and probes can be transient.
    #[default]
    Stale,
    /// Treat an unhealthy pinned backend as gone and fail over right away,
    /// accepting that the room's state is lost.
    Failover,
}

/// Error returned for an unrecognized affinity policy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown affinity policy `{0}`; expected stale or failover")]
pub struct UnknownPolicy(String);

impl FromStr for AffinityPolicy {
    type Err = UnknownPolicy;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "stale" => Ok(Self::Stale),
            "failover" => Ok(Self::Failover),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// Room-to-backend pins plus the player-to-room back-references used to
/// resolve requests that only carry a player identifier.
#[derive(Debug, Default)]
pub struct AffinityTable {
    rooms: DashMap<String, SocketAddr>,
    players: DashMap<String, String>,
}

impl AffinityTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a room to a backend. First assignment wins; returns true when a
    /// new entry was created.
    pub fn record_room(&self, room_id: &str, addr: SocketAddr) -> bool {
        let mut created = false;
        self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            created = true;
            addr
        });
        created
    }

    /// Remember which room a player belongs to.
    pub fn link_player(&self, player_id: &str, room_id: &str) {
        self.players
            .insert(player_id.to_string(), room_id.to_string());
    }

    /// Backend pinned for a room, if any.
    pub fn backend_for_room(&self, room_id: &str) -> Option<SocketAddr> {
        self.rooms.get(room_id).map(|entry| *entry.value())
    }

    /// Resolve a request's backend: room identifier first, then the player's
    /// room. `None` means the request carries no affinity (room creation).
    pub fn resolve(&self, room_id: Option<&str>, player_id: Option<&str>) -> Option<SocketAddr> {
        if let Some(addr) = room_id.and_then(|room| self.backend_for_room(room)) {
            return Some(addr);
        }
        player_id
            .and_then(|player| self.players.get(player).map(|entry| entry.value().clone()))
            .and_then(|room| self.backend_for_room(&room))
    }

    /// Drop every room pinned to a removed backend, returning how many
    /// entries were purged. Player links are kept; they dangle harmlessly
    /// until the player joins a new room.
    pub fn purge_backend(&self, addr: SocketAddr) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, pinned| *pinned != addr);
        before - self.rooms.len()
    }

    /// Number of pinned rooms, for admin logging.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn first_assignment_wins() {
        let table = AffinityTable::new();
        assert!(table.record_room("ROOM01", addr(1)));
        assert!(!table.record_room("ROOM01", addr(2)));
        assert_eq!(table.backend_for_room("ROOM01"), Some(addr(1)));
    }

    #[test]
    fn resolve_prefers_room_over_player() {
        let table = AffinityTable::new();
        table.record_room("ROOM01", addr(1));
        table.record_room("ROOM02", addr(2));
        table.link_player("player-a", "ROOM02");

        // The explicit room wins even when the player points elsewhere.
        assert_eq!(
            table.resolve(Some("ROOM01"), Some("player-a")),
            Some(addr(1))
        );
        assert_eq!(table.resolve(None, Some("player-a")), Some(addr(2)));
        assert_eq!(table.resolve(None, None), None);
        assert_eq!(table.resolve(Some("NOROOM"), None), None);
    }

    #[test]
    fn purge_drops_only_the_dead_backends_rooms() {
        let table = AffinityTable::new();
        table.record_room("ROOM01", addr(1));
        table.record_room("ROOM02", addr(2));
        table.record_room("ROOM03", addr(1));

        assert_eq!(table.purge_backend(addr(1)), 2);
        assert_eq!(table.room_count(), 1);
        assert_eq!(table.backend_for_room("ROOM02"), Some(addr(2)));
    }

    #[test]
    fn policy_names_parse() {
        assert_eq!(
            "stale".parse::<AffinityPolicy>().unwrap(),
            AffinityPolicy::Stale
        );
        assert_eq!(
            "failover".parse::<AffinityPolicy>().unwrap(),
            AffinityPolicy::Failover
        );
        assert!("sticky".parse::<AffinityPolicy>().is_err());
    }
}
