use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Resource(#[from] blockflow_core::Error),

    #[error("malformed serialized block: {0}")]
    MalformedBlock(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedBlock(msg.into())
    }
}
