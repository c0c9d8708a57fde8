use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors surfaced by persistence collaborators
///
/// The dispatch pipeline never propagates these to callers: lookup failures
/// abort the pass with a logged warning and history-write failures are
/// logged and swallowed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Lookup failed: {0}")]
    LookupFailed(String),

    #[error("Failed to write history entry: {0}")]
    WriteFailed(String),
}
