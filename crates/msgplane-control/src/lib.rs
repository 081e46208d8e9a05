//! Address scheduling and lifecycle reconciliation engine for msgplane.
//!
//! This crate decides where the addresses of every address space live and
//! whether they are ready. Admission validates changes against the plan
//! catalog and the space quota; reconciliation passes then place addresses
//! on brokers, size the router mesh, drain moved addresses and publish
//! per-address status.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  API layer (HTTP, api.rs)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ControlPlaneService                      │
//! │        Plan Catalog  ·  Resource Accountant  ·  quota       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ ReconcileTrigger
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Dispatcher → one worker per space                │
//! │  ┌───────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────┐   │
//! │  │  Broker   │ │  Router  │ │  Drain   │ │    Status    │   │
//! │  │ Scheduler │ │  Sizer   │ │  Orch.   │ │  Aggregator  │   │
//! │  └───────────┘ └──────────┘ └──────────┘ └──────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │  Store   │   │  Infra   │   │  Status  │
//!        │ (RocksDB)│   │  (K8s)   │   │  Board   │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use msgplane_control::{
//!     ControlPlane, ControlPlaneService, CreateAddressRequest, CreateAddressSpaceRequest,
//!     PlanCatalog,
//! };
//! use msgplane_store::{AddressType, RocksStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/msgplane")?);
//! let catalog = Arc::new(PlanCatalog::load("/etc/msgplane/plans.json")?);
//! let control = ControlPlaneService::with_defaults(store, catalog);
//!
//! let space = control
//!     .create_address_space(CreateAddressSpaceRequest::standard("tenant", "orders", "standard-small"))
//!     .await?;
//! let address = control
//!     .create_address(
//!         &space.space_id,
//!         CreateAddressRequest::new("invoices", AddressType::Queue, "small-queue"),
//!     )
//!     .await?;
//!
//! println!("Admitted {} in phase {:?}", address.name, address.status.phase);
//! # Ok(())
//! # }
//! ```
//!
//! # Phases
//!
//! Addresses move through a strict phase machine:
//!
//! - `Pending` → `Configuring`, `Active`, `Terminating` or `Failed`
//! - `Configuring` → `Active`, `Pending`, `Terminating` or `Failed`
//! - `Active` → `Configuring`, `Pending`, `Terminating` or `Failed`
//! - `Failed` → `Pending`, `Configuring`, `Active` or `Terminating`
//! - `Terminating` is final
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod accountant;
pub mod api;
pub mod budget;
pub mod catalog;
pub mod drain;
pub mod error;
pub mod lifecycle;
pub mod placement;
pub mod reconcile;
pub mod router;
pub mod service;
pub mod slot;
pub mod status;
pub mod types;
pub mod worker;

pub use accountant::{QuotaDecision, QuotaUsage};
pub use catalog::{CatalogDocument, CatalogSnapshot, PlanCatalog};
pub use error::{ControlError, Result};
pub use reconcile::{PassOutcome, Reconciler};
pub use service::{ControlPlane, ControlPlaneService};
pub use status::{AddressStatus, SpaceStatus, StatusBoard};
pub use types::{
    ControlConfig, CreateAddressRequest, CreateAddressSpaceRequest, ReplaceAddressPlanRequest,
    ReplaceSpacePlanRequest,
};
pub use worker::{Dispatcher, NoopTrigger, ReconcileTrigger, Trigger};

// Re-export commonly used types from dependencies for convenience
pub use msgplane_core::{AddressSpaceId, InfraId, ResourceCost};
pub use msgplane_store::{Address, AddressSpace, BrokerState, Phase, Status};
