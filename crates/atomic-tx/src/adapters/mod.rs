//! # Adapters Layer (Hexagonal Architecture)
//!
//! In-memory implementations of the outbound ports.

mod memory_state;
mod shared_memory;

pub use memory_state::MemoryState;
pub use shared_memory::MemorySharedMemory;
