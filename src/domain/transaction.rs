use super::money::Amount;
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

/// Immutable record of one wallet balance change.
///
/// Only ever produced by [`Wallet::credit`](super::wallet::Wallet::credit) or
/// [`Wallet::debit`](super::wallet::Wallet::debit), and committed in the same
/// change set as the balance it explains.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub user: UserId,
    pub r#type: TransactionType,
    pub amount: Amount,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// The amount with the sign of its effect on the balance.
    pub fn signed_amount(&self) -> rust_decimal::Decimal {
        match self.r#type {
            TransactionType::Credit => self.amount.value(),
            TransactionType::Debit => -self.amount.value(),
        }
    }
}
