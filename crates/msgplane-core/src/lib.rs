//! Core types and utilities for msgplane.
//!
//! This crate provides the foundational types used throughout the msgplane platform:
//!
//! - **Identifiers**: Strongly-typed IDs for address spaces and their infrastructure
//! - **Resource costs**: The broker/router/aggregate cost vector shared by plans and quotas
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use msgplane_core::{AddressSpaceId, InfraId, ResourceCost};
//!
//! let space_id = AddressSpaceId::generate();
//! let infra_id = InfraId::derive("tenant-a", "orders");
//!
//! let cost = ResourceCost::for_address(0.2, 0.1);
//! assert!(cost.fits_within(&ResourceCost::new(1.0, 1.0, 2.0)));
//! # let _ = (space_id, infra_id);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod resources;

pub use error::{CoreError, Result};
pub use ids::{AddressSpaceId, IdError, InfraId};
pub use resources::{Dimension, ResourceCost, COST_EPSILON};
