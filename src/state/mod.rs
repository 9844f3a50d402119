//! In-memory room state: the card deck and the per-room game session.

pub mod deck;
pub mod session;
