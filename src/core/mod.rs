//! Core deterministic primitives.
//!
//! Seeded randomness and state hashing. Everything the rules engine draws or
//! verifies goes through these two modules.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::DeterministicRng;
pub use hash::{compute_state_hash, StateHash};
