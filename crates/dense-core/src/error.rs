use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("{path:?} line {line}: {message}")]
    DataFormat {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Invalid training config: {0}")]
    InvalidConfig(String),

    #[error("Corrupt checkpoint {path:?}: {message}")]
    CorruptCheckpoint { path: PathBuf, message: String },

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Loss diverged to {loss} at minibatch {step}")]
    NumericalDivergence { step: usize, loss: f64 },

    #[error("Backend error: {0}")]
    Backend(#[from] tch::TchError),

    #[error("Training step requested before an optimizer was bound")]
    OptimizerUnbound,
}

impl ClassifierError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptCheckpoint {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
