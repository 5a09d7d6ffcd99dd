// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors that can occur while analysing a model
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Missing, unsupported, empty or malformed model
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Above the configured size cap; never estimated from metadata
    #[error("Model file is {size} bytes, limit is {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    /// Sampling requested for a format that has no sampler
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Read or open failure while streaming
    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AnalysisError {
    /// Whether a metadata estimate may stand in for this failure
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AnalysisError::InvalidModel(_) | AnalysisError::IoFailure(_))
    }
}

impl From<meshquote_core::Error> for AnalysisError {
    fn from(err: meshquote_core::Error) -> Self {
        match err {
            meshquote_core::Error::Io(io) => AnalysisError::IoFailure(io),
            meshquote_core::Error::NotStreamable(ft) => {
                AnalysisError::UnsupportedFormat(format!("{ft} cannot be streamed"))
            }
            other => AnalysisError::InvalidModel(other.to_string()),
        }
    }
}
