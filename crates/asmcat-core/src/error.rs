//! Error types for the asmcat-core library.
//!
//! This module provides error handling using the `thiserror` crate. Failures
//! reported by the metadata reader are folded into image and signature
//! variants so that callers can tell unreadable inputs from real faults.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for asmcat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all asmcat operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The input is not a well-formed PE image or metadata block
    #[error("invalid image: {details}")]
    InvalidImage {
        /// Detailed description of the issue
        details: String,
    },

    /// The PE image carries no CLI header
    #[error("image is not a managed assembly (no CLI header)")]
    NotManagedAssembly,

    /// A required metadata stream is absent
    #[error("metadata stream '{name}' not found")]
    MissingStream {
        /// Stream name, e.g. `#Strings`
        name: &'static str,
    },

    /// A row index or heap offset points outside its table or heap
    #[error("index {index} out of range for {table}")]
    InvalidIndex {
        /// Table or heap name
        table: &'static str,
        /// The offending index
        index: u32,
    },

    /// Malformed signature blob
    #[error("invalid signature: {details}")]
    InvalidSignature {
        /// Detailed description of the issue
        details: String,
    },

    /// Failed to serialize the report
    #[error("failed to write report: {0}")]
    Csv(#[from] csv::Error),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new image format error
    pub fn invalid_image(details: impl Into<String>) -> Self {
        Self::InvalidImage {
            details: details.into(),
        }
    }

    /// Wraps a metadata reader failure met while loading an image
    pub fn load(err: dotscope::Error) -> Self {
        match err {
            dotscope::Error::NotSupported => Self::NotManagedAssembly,
            other => Self::invalid_image(other.to_string()),
        }
    }

    /// Creates a new out-of-range index error
    pub fn invalid_index(table: &'static str, index: u32) -> Self {
        Self::InvalidIndex { table, index }
    }

    /// Creates a new signature decoding error
    pub fn invalid_signature(details: impl Into<String>) -> Self {
        Self::InvalidSignature {
            details: details.into(),
        }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if the input simply is not a readable managed assembly.
    ///
    /// Used when probing reference directories, where native DLLs and
    /// resource files sit next to assemblies and are skipped.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidImage { .. } | Self::NotManagedAssembly | Self::MissingStream { .. }
        )
    }
}
