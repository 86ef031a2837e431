use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Review session closed before replying")]
    Disconnected,

    #[error("Batch returned {got} results for {expected} items")]
    BatchShortfall { expected: usize, got: usize },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TallyError>;
