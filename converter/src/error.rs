// error.rs — Conversion failures that abort a translation
//
// Recoverable conditions are diagnostics (see `diag`); only the cases below
// stop the conversion. No file is written for a section in progress when one
// of them is raised.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// A recognised record lacks a required numeric field.
    #[error("line {line}: {message}")]
    Structural { line: usize, message: String },

    /// Reading the source or writing an output file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A pass ran before the pass producing its input.
    #[error("pass `{pass}` ran without the output of `{needs}`")]
    MissingArtifact {
        pass: &'static str,
        needs: &'static str,
    },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConvertError {
    pub fn structural(line: usize, message: impl Into<String>) -> Self {
        ConvertError::Structural {
            line,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            source,
        }
    }
}
