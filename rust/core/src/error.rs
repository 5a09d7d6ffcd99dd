// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::format::FileType;

/// Result type for reader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading model files
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Truncated input: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("{0} files cannot be streamed triangle by triangle")]
    NotStreamable(FileType),
}

impl Error {
    /// Shorthand for [`Error::InvalidContent`]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidContent(msg.into())
    }

    /// True for failures of the underlying byte source rather than its content
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => Error::Io(io),
            other => Error::Archive(other.to_string()),
        }
    }
}
