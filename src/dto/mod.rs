//! Wire-level data transfer objects for the newline-delimited JSON protocol.

pub mod action;
pub mod response;
pub mod snapshot;
pub mod validation;
