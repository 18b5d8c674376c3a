//! Shared types used across the saga orchestration crates.

mod types;

pub use types::{EventId, SagaId};
