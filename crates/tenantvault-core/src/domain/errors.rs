//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including container validation failures and metadata decoding errors.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Container is missing its identifier
    #[error("Container missing ID")]
    MissingContainerId,

    /// Container is missing its display name
    #[error("Container {0} missing display name")]
    MissingDisplayName(String),

    /// Container has neither a parent reference nor a known path
    #[error("Container {0} missing parent ID")]
    MissingParentId(String),

    /// A known path was supplied but it has no elements
    #[error("Container {0} supplied an empty path")]
    EmptyPath(String),

    /// Unknown resource category name
    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    /// A metadata file for a category was seen more than once
    #[error("Multiple versions of {file} metadata for category {category}")]
    DuplicateMetadata {
        /// Category the metadata belongs to
        category: String,
        /// Metadata file name
        file: String,
    },

    /// A metadata file could not be decoded
    #[error("Invalid metadata in {file}: {reason}")]
    InvalidMetadata {
        /// Metadata file name
        file: String,
        /// Decoder failure description
        reason: String,
    },
}
