//! Shared types for the Flock session client workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
