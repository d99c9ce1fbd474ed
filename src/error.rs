
use std::path::PathBuf;
use ndarray_npy::{ReadNpyError, ReadNpzError, WriteNpyError, WriteNpzError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the reduction pipeline, one variant per error kind.
#[derive(Debug, Error)]
pub enum Error {
    #[error("compute device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("unsupported normalization method: {0}")]
    UnsupportedMethod(String),

    #[error("reduction to d={d} failed for matrix of shape {shape:?}: {reason}")]
    ReductionFailed {
        d: usize,
        shape: (usize, usize),
        reason: String,
    },

    #[error("i/o failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("manifest already holds an entry for key {0}")]
    DuplicateEntry(String),

    #[error(transparent)]
    Stats(#[from] ndarray_stats::errors::MinMaxError),
}

impl Error {

    pub fn io(path: impl Into<PathBuf>, source: impl Into<StorageError>) -> Self {
        Error::Io { path: path.into(), source: source.into() }
    }

    /// Errors that only affect a single (window, method, d) combination.
    /// Everything else invalidates the whole run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::ReductionFailed { .. } | Error::Io { .. })
    }
}

/// The underlying cause of an `Error::Io`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    ReadNpz(#[from] ReadNpzError),

    #[error(transparent)]
    WriteNpz(#[from] WriteNpzError),

    #[error(transparent)]
    ReadNpy(#[from] ReadNpyError),

    #[error(transparent)]
    WriteNpy(#[from] WriteNpyError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("malformed sparse archive: {0}")]
    Malformed(String),
}


#[cfg(test)]
mod tests {

    use super::{Error, StorageError};

    #[test]
    fn recoverable_kinds() {

        let reduce = Error::ReductionFailed { d: 10, shape: (5, 5), reason: "rank".to_string() };
        let io = Error::io("x.npz", StorageError::Malformed("no indptr".to_string()));
        assert!(reduce.is_recoverable());
        assert!(io.is_recoverable());

        assert!(!Error::DeviceUnavailable("gone".to_string()).is_recoverable());
        assert!(!Error::UnsupportedMethod("foo".to_string()).is_recoverable());
        assert!(!Error::DuplicateEntry("w3_ppmi_d2".to_string()).is_recoverable());
    }

    #[test]
    fn messages_carry_context() {

        let e = Error::UnsupportedMethod("foo".to_string());
        assert_eq!(e.to_string(), "unsupported normalization method: foo");

        let e = Error::ReductionFailed { d: 7, shape: (4, 4), reason: "d must be below 4".to_string() };
        assert!(e.to_string().contains("d=7"));
        assert!(e.to_string().contains("(4, 4)"));
    }
}
