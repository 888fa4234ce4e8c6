//! Storage errors.

use std::fmt;

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Object store call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Put,
    Get,
    Delete,
    List,
    Sign,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageOp::Put => "put",
            StorageOp::Get => "get",
            StorageOp::Delete => "delete",
            StorageOp::List => "list",
            StorageOp::Sign => "sign",
        })
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage not configured: {0}")]
    Config(String),

    /// No object lives at the path.
    #[error("no object at {0}")]
    NotFound(String),

    #[error("{op} {path}: {message}")]
    Backend {
        op: StorageOp,
        path: String,
        message: String,
    },
}

impl StorageError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn backend(op: StorageOp, path: &str, err: impl fmt::Display) -> Self {
        Self::Backend {
            op,
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    /// Operation that failed, if a backend call was involved.
    pub fn op(&self) -> Option<StorageOp> {
        match self {
            Self::Backend { op, .. } => Some(*op),
            _ => None,
        }
    }
}
