//! # Amounts — Integer Minor Units
//!
//! Prices and trade totals are counted in minor currency units (cents).
//! Floats never appear in a price, a total, or a signed ledger request.

use serde::{Deserialize, Serialize};

/// A non-negative amount in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    /// The zero amount.
    pub const ZERO: Self = Self(0);

    /// Wrap a count of minor units.
    pub fn from_minor(units: u64) -> Self {
        Self(units)
    }

    /// The count of minor units.
    pub fn minor_units(&self) -> u64 {
        self.0
    }

    /// Whether this amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Price × quantity, or `None` on overflow.
    pub fn checked_times(&self, quantity: u64) -> Option<Self> {
        self.0.checked_mul(quantity).map(Self)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}
