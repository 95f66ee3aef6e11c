//! Shared types for the Collaboratory authenticator workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
