use super::group::GroupId;
use super::money::Amount;
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-chosen idempotency key for a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Movement {
    Contribution,
    Payout,
}

/// Immutable audit record of money entering or leaving a cycle's pool.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AjoLedgerEntry {
    pub group: GroupId,
    pub user: UserId,
    pub cycle_number: u32,
    pub movement: Movement,
    pub amount: Amount,
    /// Present on contributions; payouts are keyed by their cycle instead.
    pub request: Option<RequestId>,
    pub timestamp: DateTime<Utc>,
}

impl AjoLedgerEntry {
    pub fn contribution(
        group: GroupId,
        user: UserId,
        cycle_number: u32,
        amount: Amount,
        request: RequestId,
    ) -> Self {
        Self {
            group,
            user,
            cycle_number,
            movement: Movement::Contribution,
            amount,
            request: Some(request),
            timestamp: Utc::now(),
        }
    }

    pub fn payout(group: GroupId, user: UserId, cycle_number: u32, amount: Amount) -> Self {
        Self {
            group,
            user,
            cycle_number,
            movement: Movement::Payout,
            amount,
            request: None,
            timestamp: Utc::now(),
        }
    }
}
