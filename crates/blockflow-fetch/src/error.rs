use thiserror::Error;

pub type Result<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Block(#[from] blockflow_block::Error),

    #[error("upstream failure: {0}")]
    Upstream(String),
}
