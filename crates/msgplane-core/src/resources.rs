//! Resource cost vectors.
//!
//! Every address costs something on three dimensions: broker capacity, router
//! capacity, and the aggregate of both. Address space plans cap the sum of
//! those costs per dimension. Addition and comparison are componentwise.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Tolerance used when comparing accumulated floating point costs.
pub const COST_EPSILON: f64 = 1e-9;

/// A named dimension of the resource cost vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Broker capacity, in fractions of one broker.
    Broker,
    /// Router capacity, in fractions of one router.
    Router,
    /// Sum of broker and router usage.
    Aggregate,
}

impl Dimension {
    /// All dimensions in the order quota checks report them.
    pub const ALL: [Self; 3] = [Self::Broker, Self::Router, Self::Aggregate];

    /// The wire name of the dimension.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Broker => "broker",
            Self::Router => "router",
            Self::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-negative cost on each [`Dimension`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceCost {
    /// Broker share.
    #[serde(default)]
    pub broker: f64,
    /// Router share.
    #[serde(default)]
    pub router: f64,
    /// Aggregate share.
    #[serde(default)]
    pub aggregate: f64,
}

impl ResourceCost {
    /// The zero vector.
    pub const ZERO: Self = Self {
        broker: 0.0,
        router: 0.0,
        aggregate: 0.0,
    };

    /// Create a cost vector with every dimension given explicitly.
    ///
    /// Negative inputs are clamped to zero.
    #[must_use]
    pub fn new(broker: f64, router: f64, aggregate: f64) -> Self {
        Self {
            broker: broker.max(0.0),
            router: router.max(0.0),
            aggregate: aggregate.max(0.0),
        }
    }

    /// Create the cost of a single address: the aggregate is broker + router.
    #[must_use]
    pub fn for_address(broker: f64, router: f64) -> Self {
        let broker = broker.max(0.0);
        let router = router.max(0.0);
        Self {
            broker,
            router,
            aggregate: broker + router,
        }
    }

    /// Value on one dimension.
    #[must_use]
    pub const fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Broker => self.broker,
            Dimension::Router => self.router,
            Dimension::Aggregate => self.aggregate,
        }
    }

    /// Returns the first dimension (broker, router, aggregate) on which `self`
    /// exceeds `limit`, if any.
    #[must_use]
    pub fn first_exceeding(&self, limit: &Self) -> Option<Dimension> {
        Dimension::ALL
            .into_iter()
            .find(|d| self.get(*d) > limit.get(*d) + COST_EPSILON)
    }

    /// Returns true if every dimension of `self` is within `limit`.
    #[must_use]
    pub fn fits_within(&self, limit: &Self) -> bool {
        self.first_exceeding(limit).is_none()
    }

    /// Returns true if every dimension is (approximately) zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        Dimension::ALL
            .into_iter()
            .all(|d| self.get(d).abs() <= COST_EPSILON)
    }
}

impl Add for ResourceCost {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            broker: self.broker + rhs.broker,
            router: self.router + rhs.router,
            aggregate: self.aggregate + rhs.aggregate,
        }
    }
}

impl AddAssign for ResourceCost {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Saturating subtraction; no dimension drops below zero.
impl Sub for ResourceCost {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.broker - rhs.broker,
            self.router - rhs.router,
            self.aggregate - rhs.aggregate,
        )
    }
}

impl std::iter::Sum for ResourceCost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}
