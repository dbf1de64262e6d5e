use crate::error::LedgerError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A wallet or pool balance.
///
/// Wraps `rust_decimal::Decimal` so that balances can only grow by an [`Amount`]
/// through [`Balance::checked_add`] and can only shrink through
/// [`Balance::checked_sub`], which refuses to go below zero. Deserialization
/// rejects negative values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Balance(Decimal);

/// A strictly positive monetary amount moved by a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(LedgerError::Validation(format!(
                "Amount must be positive, got {value}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Subtracts `amount`, or returns `InsufficientFunds` leaving `self` untouched.
    pub fn checked_sub(self, amount: Amount) -> Result<Self, LedgerError> {
        if amount.0 > self.0 {
            return Err(LedgerError::InsufficientFunds {
                balance: self.0,
                requested: amount.0,
            });
        }
        Ok(Self(self.0 - amount.0))
    }

    /// Adds `amount`, or returns `AmountTooLarge` if the sum does not fit.
    pub fn checked_add(self, amount: Amount) -> Result<Self, LedgerError> {
        self.0
            .checked_add(amount.0)
            .map(Self)
            .ok_or_else(|| LedgerError::AmountTooLarge(format!("{} + {}", self.0, amount.0)))
    }

    /// Returns `amount` as a multiple: used to size a full pool.
    pub fn times(amount: Amount, count: usize) -> Result<Self, LedgerError> {
        amount
            .0
            .checked_mul(Decimal::from(count))
            .map(Self)
            .ok_or_else(|| LedgerError::AmountTooLarge(format!("{} x {count}", amount.0)))
    }
}

impl TryFrom<Decimal> for Balance {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "Balance must not be negative, got {value}"
            )));
        }
        Ok(Self(value))
    }
}

impl From<Balance> for Decimal {
    fn from(balance: Balance) -> Self {
        balance.0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
