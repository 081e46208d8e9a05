//! Kubernetes infrastructure layer for msgplane address spaces.
//!
//! This crate provides the [`Infra`] trait and the [`K8sInfra`] implementation
//! the reconciliation engine uses to realize its decisions. It handles:
//!
//! - One single-replica `StatefulSet` per broker, with a storage claim
//! - Router and admin `Deployment`s and their services
//! - Readiness tracking through a watcher-fed cache
//! - Drain statistics read from each broker's management port
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Reconciliation Engine                         │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          K8sInfra                                │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────────┐   │
//! │  │  Ensure /   │ │  Drain      │ │    Watcher              │   │
//! │  │  Scale      │ │  Stats      │ │    (readiness events)   │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────────┘   │
//! │                         │                                       │
//! │               ┌─────────┴─────────┐                            │
//! │               ▼                   ▼                            │
//! │        ┌───────────┐       ┌───────────┐                       │
//! │        │ Readiness │       │  Object   │                       │
//! │        │ Cache     │       │  Builders │                       │
//! │        └───────────┘       └───────────┘                       │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Kubernetes API Server                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use msgplane_infra::{Infra, InfraOwner, InfraSettings, K8sInfra};
//! use msgplane_core::{AddressSpaceId, InfraId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let infra = K8sInfra::new(InfraSettings::from_env()).await?;
//!
//! let owner = InfraOwner::new(AddressSpaceId::generate(), InfraId::derive("tenant", "orders"));
//! if infra.routers_ready(&owner).await? {
//!     println!("router mesh ready");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a real Kubernetes cluster, enable the `test-utils` feature
//! and use [`MockInfra`], which keeps workloads in memory and lets tests script
//! readiness and drain statistics.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod error;
pub mod k8s;
pub mod objects;
pub mod types;

pub use error::{InfraError, Result};
pub use k8s::{Infra, K8sInfra};
pub use types::{DrainStats, InfraEvent, InfraOwner, InfraSettings, Readiness};

#[cfg(any(test, feature = "test-utils"))]
pub use k8s::mock::MockInfra;
