//! Adapters (hexagonal architecture implementations)

pub mod database;
pub mod memory_engine;
pub mod timer;

pub use database::MemoryDatabase;
pub use memory_engine::{MemoryEngineFactory, MemoryExecutionEngine};
pub use timer::BlockDelayTimer;
