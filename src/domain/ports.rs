use super::changeset::{ChangeSet, Versioned};
use super::cycle::AjoCycle;
use super::group::{AjoGroup, AjoMember, GroupId};
use super::ledger::{AjoLedgerEntry, RequestId};
use super::transaction::Transaction;
use super::user::{KycStatus, UserId};
use super::wallet::Wallet;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A wallet and its transaction log, read from one consistent state.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletRecord {
    pub wallet: Versioned<Wallet>,
    /// Oldest first.
    pub transactions: Vec<Transaction>,
}

/// A cycle and its ledger entries, read from one consistent state.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub cycle: Versioned<AjoCycle>,
    pub entries: Vec<AjoLedgerEntry>,
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn wallet(&self, user: UserId) -> Result<Option<Versioned<Wallet>>>;
    async fn wallets(&self) -> Result<Vec<Wallet>>;
    /// The user's transaction log, oldest first.
    async fn transactions(&self, user: UserId) -> Result<Vec<Transaction>>;
    /// The wallet together with its log; no commit lands between the two.
    async fn wallet_with_log(&self, user: UserId) -> Result<Option<WalletRecord>>;
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Reserves a fresh group id. Ids are never reused, even if the group is
    /// never committed.
    async fn next_group_id(&self) -> Result<GroupId>;
    async fn group(&self, id: GroupId) -> Result<Option<Versioned<AjoGroup>>>;
    async fn groups(&self) -> Result<Vec<AjoGroup>>;
    /// Members ordered by position.
    async fn members(&self, group: GroupId) -> Result<Vec<AjoMember>>;
    async fn memberships(&self, user: UserId) -> Result<Vec<AjoMember>>;
}

#[async_trait]
pub trait CycleStore: Send + Sync {
    /// Cycles ordered by cycle number, oldest first.
    async fn cycles(&self, group: GroupId) -> Result<Vec<Versioned<AjoCycle>>>;
    async fn open_cycle(&self, group: GroupId) -> Result<Option<Versioned<AjoCycle>>>;
    async fn ledger_entries(&self, group: GroupId, cycle_number: u32)
    -> Result<Vec<AjoLedgerEntry>>;
    async fn entry_for_request(&self, request: RequestId) -> Result<Option<AjoLedgerEntry>>;
    /// One cycle with its ledger entries, read from one consistent state.
    async fn cycle_with_entries(
        &self,
        group: GroupId,
        cycle_number: u32,
    ) -> Result<Option<CycleRecord>>;
    /// Every cycle of the group with its entries, oldest first, read from one
    /// consistent state.
    async fn cycles_with_entries(&self, group: GroupId) -> Result<Vec<CycleRecord>>;
}

/// Full storage port of the engine.
#[async_trait]
pub trait LedgerStore: WalletStore + GroupStore + CycleStore {
    /// Applies every write in `changes` atomically, or none of them.
    ///
    /// Fails with `Conflict` when any guarded version is stale or a storage
    /// invariant would be broken.
    async fn commit(&self, changes: ChangeSet) -> Result<()>;
}

/// Source of KYC facts, owned by the profile collaborator.
#[async_trait]
pub trait KycDirectory: Send + Sync {
    async fn kyc_status(&self, user: UserId) -> Result<KycStatus>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type KycDirectoryRef = Arc<dyn KycDirectory>;
