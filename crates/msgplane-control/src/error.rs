//! Error types for the control plane.
//!
//! Admission rejections (`UnknownPlan`, `QuotaExceeded`, `Conflict`) are
//! returned synchronously to the caller of a mutating operation and are never
//! partially applied. Everything that goes wrong inside a reconciliation pass
//! is retried on the next pass.

use msgplane_core::{AddressSpaceId, CoreError, Dimension};
use msgplane_store::{BrokerState, Phase};
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested address space was not found.
    #[error("address space not found: {0}")]
    SpaceNotFound(AddressSpaceId),

    /// An address space with the same namespace and name already exists.
    #[error("address space {namespace}/{name} already exists")]
    SpaceExists {
        /// Tenant namespace.
        namespace: String,
        /// Space name.
        name: String,
    },

    /// The address space is being deleted and accepts no new addresses.
    #[error("address space {0} is being deleted")]
    SpaceDeleting(AddressSpaceId),

    /// The requested address was not found.
    #[error("address {name} not found in space {space_id}")]
    AddressNotFound {
        /// Owning space.
        space_id: AddressSpaceId,
        /// Address name.
        name: String,
    },

    /// An address with the same name already exists in the space.
    #[error("address {name} already exists in space {space_id}")]
    AddressExists {
        /// Owning space.
        space_id: AddressSpaceId,
        /// Address name.
        name: String,
    },

    /// The referenced plan is absent from the catalog or not permitted here.
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    /// Admitting the request would exceed the space quota.
    #[error("quota exceeded on {dimension}: requested {requested}, available {available}")]
    QuotaExceeded {
        /// First violated dimension (broker, router, aggregate order).
        dimension: Dimension,
        /// Quota left on that dimension.
        available: f64,
        /// Cost requested on that dimension.
        requested: f64,
    },

    /// The caller's version token is stale.
    #[error("version conflict: expected {expected}, actual {actual}")]
    Conflict {
        /// Version supplied by the caller.
        expected: u64,
        /// Current version.
        actual: u64,
    },

    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A phase change the address state machine does not allow.
    #[error("invalid phase transition for address {address}: {from:?} to {to:?}")]
    InvalidPhase {
        /// Address name.
        address: String,
        /// The current phase.
        from: Phase,
        /// The requested phase.
        to: Phase,
    },

    /// A broker state change the drain state machine does not allow.
    #[error("invalid state transition for broker {cluster_id}: {from:?} to {to:?}")]
    InvalidBrokerState {
        /// Broker cluster name.
        cluster_id: String,
        /// The current state.
        from: BrokerState,
        /// The requested state.
        to: BrokerState,
    },

    /// The plan catalog document is invalid or unreadable.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Identifier or other shared error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] msgplane_store::StoreError),

    /// Infrastructure layer error.
    #[error("infrastructure error: {0}")]
    Infra(#[from] msgplane_infra::InfraError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::SpaceNotFound(_) | Self::AddressNotFound { .. } => 404,
            Self::SpaceExists { .. }
            | Self::SpaceDeleting(_)
            | Self::AddressExists { .. }
            | Self::Conflict { .. } => 409,
            Self::UnknownPlan(_) => 422,
            Self::QuotaExceeded { .. } => 429,
            Self::InvalidRequest(_) => 400,
            Self::Core(e) => match e {
                CoreError::SpaceNotFound(_) => 404,
                CoreError::InvalidId(_) => 400,
                CoreError::Internal(_) => 500,
            },
            Self::Infra(e) => e.http_status_code(),
            Self::InvalidPhase { .. }
            | Self::InvalidBrokerState { .. }
            | Self::Catalog(_)
            | Self::Store(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Returns a stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SpaceNotFound(_) => "SPACE_NOT_FOUND",
            Self::SpaceExists { .. } => "SPACE_EXISTS",
            Self::SpaceDeleting(_) => "SPACE_DELETING",
            Self::AddressNotFound { .. } => "ADDRESS_NOT_FOUND",
            Self::AddressExists { .. } => "ADDRESS_EXISTS",
            Self::UnknownPlan(_) => "UNKNOWN_PLAN",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::Conflict { .. } => "CONFLICT",
            Self::InvalidRequest(_) | Self::Core(_) => "BAD_REQUEST",
            Self::Infra(_) => "INFRA_UNAVAILABLE",
            Self::InvalidPhase { .. }
            | Self::InvalidBrokerState { .. }
            | Self::Catalog(_)
            | Self::Store(_)
            | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Store(_) | Self::Internal(_) => true,
            Self::Infra(e) => e.is_retriable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let space_id = AddressSpaceId::from_bytes([1u8; 16]);

        assert_eq!(ControlError::SpaceNotFound(space_id).http_status_code(), 404);
        assert_eq!(
            ControlError::AddressNotFound {
                space_id,
                name: "orders".to_string()
            }
            .http_status_code(),
            404
        );
        assert_eq!(
            ControlError::UnknownPlan("huge".to_string()).http_status_code(),
            422
        );
        assert_eq!(
            ControlError::QuotaExceeded {
                dimension: Dimension::Broker,
                available: 0.4,
                requested: 0.6
            }
            .http_status_code(),
            429
        );
        assert_eq!(
            ControlError::Conflict {
                expected: 1,
                actual: 2
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            ControlError::Core(CoreError::InvalidId(msgplane_core::IdError::InvalidUuid))
                .http_status_code(),
            400
        );
    }

    #[test]
    fn quota_rejection_names_the_dimension() {
        let err = ControlError::QuotaExceeded {
            dimension: Dimension::Router,
            available: 0.1,
            requested: 0.2,
        };
        assert!(err.to_string().contains("router"));
        assert_eq!(err.code(), "QUOTA_EXCEEDED");
        assert!(!err.is_retriable());
    }

    #[test]
    fn storage_errors_are_retriable() {
        let err = ControlError::Store(msgplane_store::StoreError::Database("busy".to_string()));
        assert!(err.is_retriable());
        assert_eq!(err.http_status_code(), 500);
    }
}
