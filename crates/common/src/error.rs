use thiserror::Error;

#[derive(Debug, Error)]
pub enum PunchsyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type PunchsyncResult<T> = Result<T, PunchsyncError>;
