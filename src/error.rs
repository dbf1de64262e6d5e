use crate::domain::group::GroupId;
use crate::domain::user::UserId;
use rust_decimal::Decimal;
use thiserror::Error;

/// Every way an engine operation can fail.
///
/// Validation kinds are terminal for the request and leave no effect behind.
/// `Conflict` is transient storage contention; see [`LedgerError::is_retryable`].
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },
    #[error("User {0} is not KYC verified")]
    Unverified(UserId),
    #[error("User {user} is not a member of group {group}")]
    NotMember { group: GroupId, user: UserId },
    #[error("Wrong contribution amount: expected {expected}, got {got}")]
    WrongAmount { expected: Decimal, got: Decimal },
    #[error("Group {0} is not accepting new members")]
    GroupNotJoinable(GroupId),
    #[error("User {user} does not own group {group}")]
    NotOwner { group: GroupId, user: UserId },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("User {user} is already a member of group {group}")]
    AlreadyMember { group: GroupId, user: UserId },
    #[error("User {user} already contributed to cycle {cycle} of group {group}")]
    AlreadyContributed {
        group: GroupId,
        user: UserId,
        cycle: u32,
    },
    #[error("Amount too large: {0} overflows")]
    AmountTooLarge(String),
    #[error("Concurrent modification detected, request may be resubmitted")]
    Conflict,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl LedgerError {
    /// True when resubmitting the same logical request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        LedgerError::Internal(Box::new(std::io::Error::other(message.into())))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        LedgerError::Internal(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(LedgerError::Conflict.is_retryable());
        assert!(!LedgerError::Unverified(UserId(1)).is_retryable());
        assert!(!LedgerError::InvalidState("closed".to_string()).is_retryable());
    }
}
