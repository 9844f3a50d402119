//! Library crate for memoria-back, exposing modules for the server and router
//! binaries as well as integration tests.

pub mod config;
pub mod dto;
pub mod error;
pub mod router;
pub mod services;
pub mod state;
