use sstable::SSTableError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed table file: {0}")]
    Malformed(String),
    #[error("{0} is not supported on an on-disk table")]
    NotSupported(&'static str),
}

impl From<SSTableError> for StoreError {
    fn from(e: SSTableError) -> Self {
        match e {
            SSTableError::Io(e) => StoreError::Io(e),
            SSTableError::Malformed(m) => StoreError::Malformed(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
