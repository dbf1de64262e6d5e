//! Read-only audit of the ledger against cycle and wallet state.
//!
//! Not on the hot path: meant for tests and for a periodic external audit job.

use crate::domain::group::GroupId;
use crate::domain::ledger::Movement;
use crate::domain::ports::{CycleRecord, LedgerStoreRef};
use crate::domain::user::UserId;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use std::fmt;
use tracing::{info, warn};

/// A broken audit invariant.
#[derive(Debug, Clone, PartialEq)]
pub enum Discrepancy {
    /// Contribution entries do not add up to the cycle's pool.
    PoolMismatch {
        group: GroupId,
        cycle: u32,
        pool: Decimal,
        contributions: Decimal,
    },
    /// A paid-out cycle without exactly one payout entry.
    PayoutCount {
        group: GroupId,
        cycle: u32,
        count: usize,
    },
    /// The payout entry disagrees with the cycle's pool or recipient.
    PayoutMismatch {
        group: GroupId,
        cycle: u32,
        expected_user: UserId,
        actual_user: UserId,
        expected_amount: Decimal,
        actual_amount: Decimal,
    },
    /// A cycle still open but with a payout recorded against it.
    PayoutOnOpenCycle { group: GroupId, cycle: u32 },
    /// More than one open cycle in a group.
    MultipleOpenCycles { group: GroupId, cycles: Vec<u32> },
    /// Wallet balance differs from the sum of its transaction log.
    BalanceMismatch {
        user: UserId,
        balance: Decimal,
        logged: Decimal,
    },
    /// Wallet balance below zero.
    NegativeBalance { user: UserId, balance: Decimal },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::PoolMismatch {
                group,
                cycle,
                pool,
                contributions,
            } => write!(
                f,
                "group {group} cycle {cycle}: pool {pool} != contributions {contributions}"
            ),
            Discrepancy::PayoutCount {
                group,
                cycle,
                count,
            } => write!(f, "group {group} cycle {cycle}: {count} payout entries"),
            Discrepancy::PayoutMismatch {
                group,
                cycle,
                expected_user,
                actual_user,
                expected_amount,
                actual_amount,
            } => write!(
                f,
                "group {group} cycle {cycle}: payout {actual_amount} to {actual_user}, \
                 expected {expected_amount} to {expected_user}"
            ),
            Discrepancy::PayoutOnOpenCycle { group, cycle } => {
                write!(f, "group {group} cycle {cycle}: payout recorded on open cycle")
            }
            Discrepancy::MultipleOpenCycles { group, cycles } => {
                write!(f, "group {group}: open cycles {cycles:?}")
            }
            Discrepancy::BalanceMismatch {
                user,
                balance,
                logged,
            } => write!(f, "wallet {user}: balance {balance} != logged {logged}"),
            Discrepancy::NegativeBalance { user, balance } => {
                write!(f, "wallet {user}: negative balance {balance}")
            }
        }
    }
}

pub struct Reconciler {
    store: LedgerStoreRef,
}

impl Reconciler {
    pub fn new(store: LedgerStoreRef) -> Self {
        Self { store }
    }

    /// Checks one cycle's pool and payout entries.
    pub async fn audit_cycle(
        &self,
        group: GroupId,
        cycle_number: u32,
    ) -> Result<Vec<Discrepancy>> {
        let record = self
            .store
            .cycle_with_entries(group, cycle_number)
            .await?
            .ok_or_else(|| {
                LedgerError::NotFound(format!("cycle {cycle_number} of group {group}"))
            })?;
        Ok(check_cycle(&record))
    }

    /// Checks every cycle of a group and the single-open-cycle rule.
    pub async fn audit_group(&self, group: GroupId) -> Result<Vec<Discrepancy>> {
        if self.store.group(group).await?.is_none() {
            return Err(LedgerError::NotFound(format!("group {group}")));
        }
        let records = self.store.cycles_with_entries(group).await?;
        let mut found = Vec::new();

        let open: Vec<u32> = records
            .iter()
            .filter(|r| !r.cycle.value.paid_out)
            .map(|r| r.cycle.value.cycle_number)
            .collect();
        if open.len() > 1 {
            found.push(Discrepancy::MultipleOpenCycles { group, cycles: open });
        }
        for record in &records {
            found.extend(check_cycle(record));
        }
        Ok(found)
    }

    /// Checks that the wallet balance equals its signed transaction log.
    ///
    /// Wallets start at zero, so the log alone must explain the balance.
    pub async fn audit_wallet(&self, user: UserId) -> Result<Vec<Discrepancy>> {
        let record = self
            .store
            .wallet_with_log(user)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("wallet of user {user}")))?;
        let logged: Decimal = record.transactions.iter().map(|t| t.signed_amount()).sum();

        let balance = record.wallet.value.balance.value();
        let mut found = Vec::new();
        if balance != logged {
            found.push(Discrepancy::BalanceMismatch {
                user,
                balance,
                logged,
            });
        }
        if balance < Decimal::ZERO {
            found.push(Discrepancy::NegativeBalance { user, balance });
        }
        Ok(found)
    }

    /// Audits every group and wallet in the store.
    pub async fn audit_all(&self) -> Result<Vec<Discrepancy>> {
        let mut found = Vec::new();
        for group in self.store.groups().await? {
            found.extend(self.audit_group(group.id).await?);
        }
        for wallet in self.store.wallets().await? {
            found.extend(self.audit_wallet(wallet.user).await?);
        }

        if found.is_empty() {
            info!("Ledger audit passed");
        } else {
            for discrepancy in &found {
                warn!(%discrepancy, "Ledger audit discrepancy");
            }
        }
        Ok(found)
    }
}

fn check_cycle(record: &CycleRecord) -> Vec<Discrepancy> {
    let cycle = &record.cycle.value;
    let entries = &record.entries;
    let mut found = Vec::new();

    let contributions: Decimal = entries
        .iter()
        .filter(|e| e.movement == Movement::Contribution)
        .map(|e| e.amount.value())
        .sum();
    if contributions != cycle.pool_amount.value() {
        found.push(Discrepancy::PoolMismatch {
            group: cycle.group,
            cycle: cycle.cycle_number,
            pool: cycle.pool_amount.value(),
            contributions,
        });
    }

    let payouts: Vec<_> = entries
        .iter()
        .filter(|e| e.movement == Movement::Payout)
        .collect();
    if !cycle.paid_out {
        if !payouts.is_empty() {
            found.push(Discrepancy::PayoutOnOpenCycle {
                group: cycle.group,
                cycle: cycle.cycle_number,
            });
        }
    } else if let [payout] = payouts.as_slice() {
        if payout.user != cycle.payout_user
            || payout.amount.value() != cycle.pool_amount.value()
        {
            found.push(Discrepancy::PayoutMismatch {
                group: cycle.group,
                cycle: cycle.cycle_number,
                expected_user: cycle.payout_user,
                actual_user: payout.user,
                expected_amount: cycle.pool_amount.value(),
                actual_amount: payout.amount.value(),
            });
        }
    } else {
        found.push(Discrepancy::PayoutCount {
            group: cycle.group,
            cycle: cycle.cycle_number,
            count: payouts.len(),
        });
    }

    found
}
