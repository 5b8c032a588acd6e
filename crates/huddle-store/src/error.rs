use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The username is already registered.
    #[error("User already exists: {0}")]
    AlreadyExists(String),

    /// Empty fields, or characters the record format cannot hold.
    #[error("Invalid credential: {0}")]
    InvalidCredential(&'static str),

    /// Reading or appending to a backing file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
