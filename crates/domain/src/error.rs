/// Shared error type used across all wabridge crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("template: {0}")]
    Template(String),

    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
}

pub type Result<T> = std::result::Result<T, Error>;
