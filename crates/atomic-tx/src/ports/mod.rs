//! # Ports Module
//!
//! Outbound dependencies of the atomic transaction model.

pub mod outbound;

pub use outbound::*;
