use super::money::{Amount, Balance};
use super::transaction::{Transaction, TransactionType};
use super::user::UserId;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's wallet.
///
/// The balance is only mutated through [`Wallet::credit`] and [`Wallet::debit`],
/// each of which hands back the matching [`Transaction`] so callers commit both
/// together.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wallet {
    /// The owner of the wallet.
    pub user: UserId,
    /// Current balance, never negative.
    pub balance: Balance,
    /// ISO currency code, e.g. "NGN".
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user: UserId, currency: impl Into<String>) -> Self {
        Self {
            user,
            balance: Balance::ZERO,
            currency: currency.into(),
            updated_at: Utc::now(),
        }
    }

    /// Adds funds.
    ///
    /// On `AmountTooLarge` the wallet is left unchanged.
    pub fn credit(
        &mut self,
        amount: Amount,
        description: impl Into<String>,
    ) -> Result<Transaction, LedgerError> {
        self.balance = self.balance.checked_add(amount)?;
        Ok(self.record(TransactionType::Credit, amount, description.into()))
    }

    /// Removes funds if the balance covers `amount`.
    ///
    /// On `InsufficientFunds` the wallet is left unchanged.
    pub fn debit(
        &mut self,
        amount: Amount,
        description: impl Into<String>,
    ) -> Result<Transaction, LedgerError> {
        self.balance = self.balance.checked_sub(amount)?;
        Ok(self.record(TransactionType::Debit, amount, description.into()))
    }

    fn record(&mut self, r#type: TransactionType, amount: Amount, description: String) -> Transaction {
        let now = Utc::now();
        self.updated_at = now;
        Transaction {
            user: self.user,
            r#type,
            amount,
            description,
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(value: rust_decimal::Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[test]
    fn test_wallet_credit() {
        let mut wallet = Wallet::new(UserId(1), "NGN");
        let tx = wallet.credit(amount(dec!(10.0)), "Wallet funding").unwrap();
        assert_eq!(wallet.balance.value(), dec!(10.0));
        assert_eq!(tx.r#type, TransactionType::Credit);
        assert_eq!(tx.user, UserId(1));
        assert_eq!(tx.description, "Wallet funding");
    }

    #[test]
    fn test_wallet_debit_success() {
        let mut wallet = Wallet::new(UserId(1), "NGN");
        wallet.credit(amount(dec!(10.0)), "Wallet funding").unwrap();

        let tx = wallet.debit(amount(dec!(4.0)), "Wallet withdrawal").unwrap();
        assert_eq!(wallet.balance.value(), dec!(6.0));
        assert_eq!(tx.r#type, TransactionType::Debit);
        assert_eq!(tx.amount.value(), dec!(4.0));
    }

    #[test]
    fn test_wallet_debit_insufficient() {
        let mut wallet = Wallet::new(UserId(1), "NGN");
        wallet.credit(amount(dec!(3000)), "Wallet funding").unwrap();
        let before = wallet.clone();

        let result = wallet.debit(amount(dec!(10000)), "Wallet withdrawal");
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
        assert_eq!(wallet, before);
    }

    #[test]
    fn test_wallet_credit_overflow() {
        let mut wallet = Wallet::new(UserId(1), "NGN");
        let max = amount(rust_decimal::Decimal::MAX);
        wallet.credit(max, "Wallet funding").unwrap();
        let before = wallet.clone();

        let result = wallet.credit(max, "Wallet funding");
        assert!(matches!(result, Err(LedgerError::AmountTooLarge(_))));
        assert_eq!(wallet, before);
    }
}
