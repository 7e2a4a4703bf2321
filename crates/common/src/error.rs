//! Common error types

use std::path::PathBuf;

use thiserror::Error;

/// Failures loading and validating on-disk configuration
#[derive(Error, Debug)]
pub enum Error {
    /// A value parsed but is not usable
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
