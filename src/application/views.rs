//! Read-only projections for presentation and admin collaborators.
//!
//! Nothing here takes locks or writes. A wallet view reads the wallet and
//! its log from one consistent state; group views are assembled from
//! independent reads and may be momentarily stale.

use super::engine::AjoEngine;
use crate::domain::cycle::AjoCycle;
use crate::domain::group::{AjoGroup, AjoMember, GroupId, GroupStatus};
use crate::domain::money::Balance;
use crate::domain::transaction::Transaction;
use crate::domain::user::UserId;
use crate::domain::wallet::Wallet;
use crate::error::{LedgerError, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WalletView {
    pub wallet: Wallet,
    /// Most recent first.
    pub recent_transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupView {
    pub group: AjoGroup,
    /// Ordered by position.
    pub members: Vec<AjoMember>,
    /// Newest cycle first.
    pub cycles: Vec<AjoCycle>,
    pub open_cycle: Option<AjoCycle>,
    /// Recipient of the open cycle, or of the cycle the next contribution opens.
    pub next_payout: Option<AjoMember>,
    /// Pool size at which the open cycle can be paid out.
    pub target_pool: Balance,
}

impl AjoEngine {
    /// The user's wallet with its latest transactions.
    pub async fn wallet_view(&self, user: UserId) -> Result<WalletView> {
        let record = self
            .store()
            .wallet_with_log(user)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("wallet of user {user}")))?;
        let wallet = record.wallet.value;
        let mut recent_transactions = record.transactions;
        recent_transactions.reverse();
        recent_transactions.truncate(self.config().recent_transactions_limit);
        Ok(WalletView {
            wallet,
            recent_transactions,
        })
    }

    pub async fn group_view(&self, group: GroupId) -> Result<GroupView> {
        let group_value = self
            .store()
            .group(group)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("group {group}")))?
            .value;
        let members = self.store().members(group).await?;
        let mut cycles: Vec<AjoCycle> = self
            .store()
            .cycles(group)
            .await?
            .into_iter()
            .map(|c| c.value)
            .collect();
        cycles.reverse();

        let open_cycle = cycles.iter().find(|c| !c.paid_out).cloned();
        let next_payout = self
            .upcoming_recipient(group)
            .await?
            .and_then(|user| members.iter().find(|m| m.user == user).copied());
        let target_pool = Balance::times(group_value.contribution_amount, members.len())?;

        Ok(GroupView {
            group: group_value,
            members,
            cycles,
            open_cycle,
            next_payout,
            target_pool,
        })
    }

    /// Groups the user belongs to, in group id order.
    pub async fn groups_for_user(&self, user: UserId) -> Result<Vec<AjoGroup>> {
        let mut groups = Vec::new();
        for membership in self.store().memberships(user).await? {
            if let Some(group) = self.store().group(membership.group).await? {
                groups.push(group.value);
            }
        }
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    /// Groups still in planning, awaiting activation.
    pub async fn pending_groups(&self) -> Result<Vec<AjoGroup>> {
        Ok(self
            .store()
            .groups()
            .await?
            .into_iter()
            .filter(|g| g.status == GroupStatus::Planning)
            .collect())
    }

    /// Current cycles of every group, for reporting.
    pub async fn all_cycles(&self) -> Result<Vec<AjoCycle>> {
        let mut all = Vec::new();
        for group in self.store().groups().await? {
            all.extend(self.store().cycles(group.id).await?.into_iter().map(|c| c.value));
        }
        Ok(all)
    }

    pub async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        self.store().wallets().await
    }
}
