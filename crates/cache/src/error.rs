use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Value for '{key}' is too large to cache: {size} > {limit} bytes")]
    TooLarge {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
