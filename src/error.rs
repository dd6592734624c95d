use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to fetch feed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("failed to parse feed: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("run already in progress")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, IngestError>;
