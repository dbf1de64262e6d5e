use crate::domain::changeset::{ChangeSet, StateView, Versioned};
use crate::domain::cycle::AjoCycle;
use crate::domain::group::{AjoGroup, AjoMember, GroupId};
use crate::domain::ledger::{AjoLedgerEntry, RequestId};
use crate::domain::ports::{
    CycleRecord, CycleStore, GroupStore, KycDirectory, LedgerStore, WalletRecord, WalletStore,
};
use crate::domain::transaction::Transaction;
use crate::domain::user::{KycStatus, UserId};
use crate::domain::wallet::Wallet;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    wallets: BTreeMap<UserId, Versioned<Wallet>>,
    transactions: HashMap<UserId, Vec<Transaction>>,
    groups: BTreeMap<GroupId, Versioned<AjoGroup>>,
    members: BTreeMap<GroupId, Vec<AjoMember>>,
    cycles: BTreeMap<(GroupId, u32), Versioned<AjoCycle>>,
    ledger: BTreeMap<(GroupId, u32), Vec<AjoLedgerEntry>>,
    requests: HashMap<RequestId, (GroupId, u32)>,
}

impl StateView for State {
    fn wallet_version(&self, user: UserId) -> Result<Option<u64>> {
        Ok(self.wallets.get(&user).map(|w| w.version))
    }

    fn group_version(&self, group: GroupId) -> Result<Option<u64>> {
        Ok(self.groups.get(&group).map(|g| g.version))
    }

    fn members(&self, group: GroupId) -> Result<Vec<AjoMember>> {
        Ok(self.members.get(&group).cloned().unwrap_or_default())
    }

    fn cycle_version(&self, group: GroupId, cycle_number: u32) -> Result<Option<u64>> {
        Ok(self.cycles.get(&(group, cycle_number)).map(|c| c.version))
    }

    fn open_cycles(&self, group: GroupId) -> Result<Vec<u32>> {
        Ok(self
            .cycles
            .range((group, 0)..=(group, u32::MAX))
            .filter(|(_, c)| !c.value.paid_out)
            .map(|((_, n), _)| *n)
            .collect())
    }

    fn has_request(&self, request: RequestId) -> Result<bool> {
        Ok(self.requests.contains_key(&request))
    }
}

impl State {
    fn cycle_record(&self, key: (GroupId, u32), cycle: &Versioned<AjoCycle>) -> CycleRecord {
        CycleRecord {
            cycle: cycle.clone(),
            entries: self.ledger.get(&key).cloned().unwrap_or_default(),
        }
    }

    fn apply(&mut self, changes: ChangeSet) {
        for write in changes.wallets {
            let version = write.next_version();
            self.wallets
                .insert(write.value.user, Versioned::new(write.value, version));
        }
        for tx in changes.transactions {
            self.transactions.entry(tx.user).or_default().push(tx);
        }
        for write in changes.groups {
            let version = write.next_version();
            self.groups
                .insert(write.value.id, Versioned::new(write.value, version));
        }
        for member in changes.members {
            let roster = self.members.entry(member.group).or_default();
            roster.push(member);
            roster.sort_by_key(|m| m.position);
        }
        for write in changes.cycles {
            let version = write.next_version();
            let key = (write.value.group, write.value.cycle_number);
            self.cycles.insert(key, Versioned::new(write.value, version));
        }
        for entry in changes.ledger {
            let key = (entry.group, entry.cycle_number);
            if let Some(request) = entry.request {
                self.requests.insert(request, key);
            }
            self.ledger.entry(key).or_default().push(entry);
        }
    }
}

/// A thread-safe in-memory ledger store.
///
/// All records live behind one `tokio::sync::RwLock`; a commit validates and
/// applies its change set under the write lock, so readers never observe a
/// partially applied change set.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<State>>,
    group_counter: Arc<AtomicU64>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryLedgerStore {
    async fn wallet(&self, user: UserId) -> Result<Option<Versioned<Wallet>>> {
        let state = self.state.read().await;
        Ok(state.wallets.get(&user).cloned())
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        let state = self.state.read().await;
        Ok(state.wallets.values().map(|w| w.value.clone()).collect())
    }

    async fn transactions(&self, user: UserId) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(&user).cloned().unwrap_or_default())
    }

    async fn wallet_with_log(&self, user: UserId) -> Result<Option<WalletRecord>> {
        let state = self.state.read().await;
        Ok(state.wallets.get(&user).map(|wallet| WalletRecord {
            wallet: wallet.clone(),
            transactions: state.transactions.get(&user).cloned().unwrap_or_default(),
        }))
    }
}

#[async_trait]
impl GroupStore for InMemoryLedgerStore {
    async fn next_group_id(&self) -> Result<GroupId> {
        Ok(GroupId(self.group_counter.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn group(&self, id: GroupId) -> Result<Option<Versioned<AjoGroup>>> {
        let state = self.state.read().await;
        Ok(state.groups.get(&id).cloned())
    }

    async fn groups(&self) -> Result<Vec<AjoGroup>> {
        let state = self.state.read().await;
        Ok(state.groups.values().map(|g| g.value.clone()).collect())
    }

    async fn members(&self, group: GroupId) -> Result<Vec<AjoMember>> {
        let state = self.state.read().await;
        StateView::members(&*state, group)
    }

    async fn memberships(&self, user: UserId) -> Result<Vec<AjoMember>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .values()
            .flatten()
            .filter(|m| m.user == user)
            .copied()
            .collect())
    }
}

#[async_trait]
impl CycleStore for InMemoryLedgerStore {
    async fn cycles(&self, group: GroupId) -> Result<Vec<Versioned<AjoCycle>>> {
        let state = self.state.read().await;
        Ok(state
            .cycles
            .range((group, 0)..=(group, u32::MAX))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn open_cycle(&self, group: GroupId) -> Result<Option<Versioned<AjoCycle>>> {
        let state = self.state.read().await;
        Ok(state
            .cycles
            .range((group, 0)..=(group, u32::MAX))
            .map(|(_, c)| c)
            .find(|c| !c.value.paid_out)
            .cloned())
    }

    async fn ledger_entries(
        &self,
        group: GroupId,
        cycle_number: u32,
    ) -> Result<Vec<AjoLedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .get(&(group, cycle_number))
            .cloned()
            .unwrap_or_default())
    }

    async fn entry_for_request(&self, request: RequestId) -> Result<Option<AjoLedgerEntry>> {
        let state = self.state.read().await;
        Ok(state.requests.get(&request).and_then(|key| {
            state
                .ledger
                .get(key)
                .and_then(|entries| entries.iter().find(|e| e.request == Some(request)))
                .cloned()
        }))
    }

    async fn cycle_with_entries(
        &self,
        group: GroupId,
        cycle_number: u32,
    ) -> Result<Option<CycleRecord>> {
        let state = self.state.read().await;
        let key = (group, cycle_number);
        Ok(state
            .cycles
            .get(&key)
            .map(|cycle| state.cycle_record(key, cycle)))
    }

    async fn cycles_with_entries(&self, group: GroupId) -> Result<Vec<CycleRecord>> {
        let state = self.state.read().await;
        Ok(state
            .cycles
            .range((group, 0)..=(group, u32::MAX))
            .map(|(key, cycle)| state.cycle_record(*key, cycle))
            .collect())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        changes.check(&*state)?;
        state.apply(changes);
        Ok(())
    }
}

/// In-memory stand-in for the profile collaborator's KYC records.
///
/// The admin-facing transitions (`submit`, `verify`, `reject`) are external
/// writes from the engine's point of view; unknown users are `Unverified`.
#[derive(Default, Clone)]
pub struct InMemoryKycDirectory {
    statuses: Arc<RwLock<HashMap<UserId, KycStatus>>>,
}

impl InMemoryKycDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_status(&self, user: UserId, status: KycStatus) {
        self.statuses.write().await.insert(user, status);
    }

    /// User submitted their KYC form.
    pub async fn submit(&self, user: UserId) {
        self.set_status(user, KycStatus::Pending).await;
    }

    /// Operator approved the submission.
    pub async fn verify(&self, user: UserId) {
        self.set_status(user, KycStatus::Verified).await;
    }

    /// Operator rejected the submission; the user may submit again.
    pub async fn reject(&self, user: UserId) {
        self.set_status(user, KycStatus::Unverified).await;
    }

    /// Users whose submission awaits review.
    pub async fn pending(&self) -> Vec<UserId> {
        let statuses = self.statuses.read().await;
        let mut pending: Vec<UserId> = statuses
            .iter()
            .filter(|(_, status)| **status == KycStatus::Pending)
            .map(|(user, _)| *user)
            .collect();
        pending.sort();
        pending
    }
}

#[async_trait]
impl KycDirectory for InMemoryKycDirectory {
    async fn kyc_status(&self, user: UserId) -> Result<KycStatus> {
        let statuses = self.statuses.read().await;
        Ok(statuses.get(&user).copied().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::changeset::Guarded;
    use crate::domain::money::Amount;
    use crate::error::LedgerError;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_wallet_versions_increment() {
        let store = InMemoryLedgerStore::new();
        let mut wallet = Wallet::new(UserId(1), "NGN");
        let tx = wallet.credit(Amount::new(dec!(100)).unwrap(), "Wallet funding").unwrap();

        store
            .commit(ChangeSet {
                wallets: vec![Guarded::insert(wallet.clone())],
                transactions: vec![tx],
                ..Default::default()
            })
            .await
            .unwrap();

        let stored = store.wallet(UserId(1)).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.value, wallet);
        assert_eq!(store.transactions(UserId(1)).await.unwrap().len(), 1);

        store
            .commit(ChangeSet {
                wallets: vec![Guarded::from(&stored)],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.wallet(UserId(1)).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_rejected_commit_leaves_no_trace() {
        let store = InMemoryLedgerStore::new();
        let mut wallet = Wallet::new(UserId(1), "NGN");
        let tx = wallet.credit(Amount::new(dec!(100)).unwrap(), "Wallet funding").unwrap();

        // Guarded update of a wallet that was never stored.
        let result = store
            .commit(ChangeSet {
                wallets: vec![Guarded::update(wallet, 4)],
                transactions: vec![tx],
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Conflict)));
        assert!(store.wallet(UserId(1)).await.unwrap().is_none());
        assert!(store.transactions(UserId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_pair_state_with_its_log() {
        let store = InMemoryLedgerStore::new();
        assert!(store.wallet_with_log(UserId(1)).await.unwrap().is_none());

        let mut wallet = Wallet::new(UserId(1), "NGN");
        let five = Amount::new(dec!(5)).unwrap();
        let tx = wallet.credit(five, "Wallet funding").unwrap();
        let mut cycle = AjoCycle::open(GroupId(1), 1, UserId(1));
        cycle.add_contribution(five).unwrap();
        store
            .commit(ChangeSet {
                wallets: vec![Guarded::insert(wallet)],
                transactions: vec![tx],
                cycles: vec![Guarded::insert(cycle)],
                ledger: vec![AjoLedgerEntry::contribution(
                    GroupId(1),
                    UserId(1),
                    1,
                    five,
                    RequestId(1),
                )],
                ..Default::default()
            })
            .await
            .unwrap();

        let record = store.wallet_with_log(UserId(1)).await.unwrap().unwrap();
        assert_eq!(record.wallet.version, 1);
        assert_eq!(record.transactions.len(), 1);

        let records = store.cycles_with_entries(GroupId(1)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entries.len(), 1);
        let single = store.cycle_with_entries(GroupId(1), 1).await.unwrap();
        assert_eq!(single.as_ref(), records.first());
        assert!(store.cycle_with_entries(GroupId(1), 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_group_ids_are_monotonic() {
        let store = InMemoryLedgerStore::new();
        assert_eq!(store.next_group_id().await.unwrap(), GroupId(1));
        assert_eq!(store.next_group_id().await.unwrap(), GroupId(2));
    }

    #[tokio::test]
    async fn test_kyc_directory_transitions() {
        let kyc = InMemoryKycDirectory::new();
        assert_eq!(
            kyc.kyc_status(UserId(1)).await.unwrap(),
            KycStatus::Unverified
        );

        kyc.submit(UserId(1)).await;
        assert_eq!(kyc.pending().await, vec![UserId(1)]);

        kyc.verify(UserId(1)).await;
        assert!(kyc.kyc_status(UserId(1)).await.unwrap().is_verified());
        assert!(kyc.pending().await.is_empty());

        kyc.reject(UserId(1)).await;
        assert_eq!(
            kyc.kyc_status(UserId(1)).await.unwrap(),
            KycStatus::Unverified
        );
    }
}
