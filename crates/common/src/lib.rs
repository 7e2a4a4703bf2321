//! Common types shared by the relay pool crates and the daemon

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
