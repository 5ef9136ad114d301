//! # Shared Types Crate
//!
//! Identifiers, addresses and hashing helpers used by both the atomic
//! transaction model (`atomic-tx`) and the block builder (`block-builder`).
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Every crate names chains, assets, blocks and
//!   transactions with the types defined here.
//! - **Fixed-width**: Identifiers are plain byte arrays wrapped in newtypes so
//!   they can be copied, hashed and ordered without allocation.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
