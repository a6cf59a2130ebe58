//! Shared error type for the agent's ambient stack (config/logging boundaries).

use thiserror::Error;

/// Core error type shared by every crate in the workspace for concerns that
/// don't belong to a single component (config loading, generic I/O).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Generic error with a message, used at binary boundaries.
    #[error("core error: {0}")]
    Generic(String),

    /// Underlying I/O failure (config file read, secure-dir access, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file failed to parse as TOML.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Convenience alias for core-level results.
pub type CoreResult<T> = Result<T, CoreError>;
