//! Weight Calculation
//!
//! Scores each backend from its latest sample and derives per-pool integer
//! traffic weights that always sum to 100 while any server is active.

mod engine;

pub use engine::{compute_pool, score_breakdown, DEFAULT_WEIGHT, MIN_VIABLE_SCORE};
