//! Connection handling and the process-wide session registry.

pub mod connection;
pub mod registry;
