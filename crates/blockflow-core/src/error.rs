use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(
        "resource limit exceeded: requested {requested} bytes, limit {limit}, used {used}"
    )]
    ResourceLimitExceeded {
        requested: usize,
        limit: usize,
        used: usize,
    },

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}
