//! Session-affinity request router fronting a pool of game backends.

pub mod admin;
pub mod affinity;
pub mod health;
pub mod pool;
pub mod proxy;
pub mod strategy;
