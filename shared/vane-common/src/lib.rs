//! Vane Common Library
//!
//! Shared domain types used by the control-plane daemon and its API clients.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
