//! Common error types for msgplane.
//!
//! This module provides shared error types that are used across multiple crates.

use crate::ids::AddressSpaceId;
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the msgplane system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An address space with the specified ID was not found.
    #[error("address space not found: {0}")]
    SpaceNotFound(AddressSpaceId),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
