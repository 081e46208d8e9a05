//! Address phase and broker drain state machines.
//!
//! The status aggregator is the only component that moves an address between
//! phases; this module says which moves are legal. Broker instances and
//! per-address broker assignments follow the drain state machine.
//!
//! # Address Phases
//!
//! ```text
//!     ┌─────────┐   placement    ┌─────────────┐   infra ready   ┌──────────┐
//!     │ Pending │───────────────▶│ Configuring │────────────────▶│  Active  │
//!     └─────────┘◀───────────────└─────────────┘◀────────────────└──────────┘
//!          │       capacity lost        │        plan/infra change     │
//!          │                            │                              │
//!          │            ┌────────┐      │                              │
//!          └───────────▶│ Failed │◀─────┴──────────────────────────────┤
//!                       └────────┘   (unknown plan; leaves when fixed) │
//!                                                                      │
//!     any phase ──── delete ────▶ ┌─────────────┐                      │
//!                                 │ Terminating │  (absorbing)         │
//!                                 └─────────────┘                      │
//! ```
//!
//! An Active address whose replaced plan fits on no broker drops straight
//! back to Pending.
//!
//! # Broker Drain
//!
//! ```text
//!     ┌────────┐  decommission / move  ┌──────────┐  zero in-flight  ┌─────────┐
//!     │ Active │──────────────────────▶│ Draining │─────────────────▶│ Drained │──▶ removed
//!     └────────┘                       └──────────┘                  └─────────┘
//! ```

use msgplane_store::{BrokerState, Phase};

use crate::error::{ControlError, Result};

/// Validates a phase change and returns the target phase if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidPhase` if the transition is not allowed.
pub fn validate_transition(address: &str, from: Phase, to: Phase) -> Result<Phase> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidPhase {
            address: address.to_string(),
            from,
            to,
        })
    }
}

/// Check if a phase change is valid according to the state machine.
///
/// Staying in the same phase is always valid.
#[must_use]
pub const fn is_valid_transition(from: Phase, to: Phase) -> bool {
    use Phase::{Active, Configuring, Failed, Pending, Terminating};

    matches!(
        (from, to),
        (Pending, Pending)
            | (Configuring, Configuring)
            | (Active, Active)
            | (Failed, Failed)
            | (Terminating, Terminating)
            // Deletion is possible from everywhere and never undone
            | (Pending | Configuring | Active | Failed, Terminating)
            // Unknown plan reported
            | (Pending | Configuring | Active, Failed)
            // Placement found; zero-broker addresses go straight to Active
            | (Pending, Configuring | Active)
            | (Configuring, Active | Pending)
            // Plan, infra or broker health changed; Pending when the new
            // plan found no room at all
            | (Active, Configuring | Pending)
            // Plan fixed
            | (Failed, Pending | Configuring | Active)
    )
}

/// Returns the list of valid target phases from the given phase.
#[must_use]
pub fn valid_transitions_from(phase: Phase) -> Vec<Phase> {
    use Phase::{Active, Configuring, Failed, Pending, Terminating};

    match phase {
        Pending => vec![Configuring, Active, Failed, Terminating],
        Configuring => vec![Active, Pending, Failed, Terminating],
        Active => vec![Configuring, Pending, Failed, Terminating],
        Failed => vec![Pending, Configuring, Active, Terminating],
        Terminating => vec![],
    }
}

/// Validates a broker state change and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidBrokerState` if the transition is not allowed.
pub fn validate_broker_transition(
    cluster_id: &str,
    from: BrokerState,
    to: BrokerState,
) -> Result<BrokerState> {
    if is_valid_broker_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidBrokerState {
            cluster_id: cluster_id.to_string(),
            from,
            to,
        })
    }
}

/// Check if a broker state change is valid.
///
/// A move that is abandoned before its successor exists reverts a Draining
/// assignment to Active.
#[must_use]
pub const fn is_valid_broker_transition(from: BrokerState, to: BrokerState) -> bool {
    use BrokerState::{Active, Drained, Draining};

    matches!(
        (from, to),
        (Active, Draining) | (Draining, Drained | Active)
    )
}

/// Returns true if the broker still holds messages.
#[must_use]
pub const fn holds_messages(state: BrokerState) -> bool {
    matches!(state, BrokerState::Active | BrokerState::Draining)
}

/// Returns true if the address is past the point of accepting plan changes.
#[must_use]
pub const fn is_terminal(phase: Phase) -> bool {
    matches!(phase, Phase::Terminating)
}
