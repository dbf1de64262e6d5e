#![allow(dead_code)]

use ajo_ledger::application::engine::{AjoEngine, ContributionRequest};
use ajo_ledger::config::{EngineConfig, RetryConfig};
use ajo_ledger::domain::changeset::{ChangeSet, Versioned};
use ajo_ledger::domain::cycle::AjoCycle;
use ajo_ledger::domain::group::{AjoGroup, AjoMember, Frequency, GroupId};
use ajo_ledger::domain::ledger::{AjoLedgerEntry, RequestId};
use ajo_ledger::domain::money::Amount;
use ajo_ledger::domain::ports::{
    CycleRecord, CycleStore, GroupStore, LedgerStore, WalletRecord, WalletStore,
};
use ajo_ledger::domain::transaction::Transaction;
use ajo_ledger::domain::user::UserId;
use ajo_ledger::domain::wallet::Wallet;
use ajo_ledger::error::{LedgerError, Result};
use ajo_ledger::infrastructure::in_memory::{InMemoryKycDirectory, InMemoryLedgerStore};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

/// Retries without sleeping so tests stay fast.
pub fn fast_config(max_attempts: u32) -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 2.0,
        },
        ..EngineConfig::default()
    }
}

pub async fn verified_kyc(users: impl IntoIterator<Item = u64>) -> InMemoryKycDirectory {
    let kyc = InMemoryKycDirectory::new();
    for user in users {
        kyc.verify(UserId(user)).await;
    }
    kyc
}

pub fn contribution(request: u64, group: GroupId, user: u64, value: Decimal) -> ContributionRequest {
    ContributionRequest {
        request: RequestId(request),
        group,
        user: UserId(user),
        amount: value,
    }
}

/// Creates a group owned by `users[0]` with the rest joined in order, funds
/// every member with `funding` and activates it.
pub async fn funded_group(
    engine: &AjoEngine,
    users: &[u64],
    contribution_amount: Decimal,
    funding: Decimal,
) -> GroupId {
    let group = engine
        .create_group(
            UserId(users[0]),
            "Market women",
            amount(contribution_amount),
            Frequency::Weekly,
        )
        .await
        .unwrap();
    for user in &users[1..] {
        engine.join(group.id, UserId(*user)).await.unwrap();
    }
    for user in users {
        engine.fund(UserId(*user), amount(funding)).await.unwrap();
    }
    engine.activate(group.id, UserId(users[0])).await.unwrap();
    group.id
}

/// Store wrapper that injects `Conflict` failures into `commit`.
///
/// `reject_next` commits fail without touching state. `drop_ack_next`
/// commits are applied and then reported as `Conflict`, as if the
/// acknowledgement had been lost. `log_delay_ms` stalls the standalone
/// `transactions` and `ledger_entries` reads, leaving room for a commit to
/// land between a record read and its log read.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryLedgerStore,
    pub reject_next: AtomicU32,
    pub drop_ack_next: AtomicU32,
    pub commits: AtomicU32,
    pub log_delay_ms: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, times: u32) {
        self.reject_next.store(times, Ordering::SeqCst);
    }

    pub fn drop_ack(&self, times: u32) {
        self.drop_ack_next.store(times, Ordering::SeqCst);
    }

    pub fn slow_log_reads(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap();
        self.log_delay_ms.store(millis, Ordering::SeqCst);
    }

    async fn log_read_pause(&self) {
        let millis = self.log_delay_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl WalletStore for FlakyStore {
    async fn wallet(&self, user: UserId) -> Result<Option<Versioned<Wallet>>> {
        self.inner.wallet(user).await
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        self.inner.wallets().await
    }

    async fn transactions(&self, user: UserId) -> Result<Vec<Transaction>> {
        self.log_read_pause().await;
        self.inner.transactions(user).await
    }

    async fn wallet_with_log(&self, user: UserId) -> Result<Option<WalletRecord>> {
        self.inner.wallet_with_log(user).await
    }
}

#[async_trait]
impl GroupStore for FlakyStore {
    async fn next_group_id(&self) -> Result<GroupId> {
        self.inner.next_group_id().await
    }

    async fn group(&self, id: GroupId) -> Result<Option<Versioned<AjoGroup>>> {
        self.inner.group(id).await
    }

    async fn groups(&self) -> Result<Vec<AjoGroup>> {
        self.inner.groups().await
    }

    async fn members(&self, group: GroupId) -> Result<Vec<AjoMember>> {
        self.inner.members(group).await
    }

    async fn memberships(&self, user: UserId) -> Result<Vec<AjoMember>> {
        self.inner.memberships(user).await
    }
}

#[async_trait]
impl CycleStore for FlakyStore {
    async fn cycles(&self, group: GroupId) -> Result<Vec<Versioned<AjoCycle>>> {
        self.inner.cycles(group).await
    }

    async fn open_cycle(&self, group: GroupId) -> Result<Option<Versioned<AjoCycle>>> {
        self.inner.open_cycle(group).await
    }

    async fn ledger_entries(
        &self,
        group: GroupId,
        cycle_number: u32,
    ) -> Result<Vec<AjoLedgerEntry>> {
        self.log_read_pause().await;
        self.inner.ledger_entries(group, cycle_number).await
    }

    async fn entry_for_request(&self, request: RequestId) -> Result<Option<AjoLedgerEntry>> {
        self.inner.entry_for_request(request).await
    }

    async fn cycle_with_entries(
        &self,
        group: GroupId,
        cycle_number: u32,
    ) -> Result<Option<CycleRecord>> {
        self.inner.cycle_with_entries(group, cycle_number).await
    }

    async fn cycles_with_entries(&self, group: GroupId) -> Result<Vec<CycleRecord>> {
        self.inner.cycles_with_entries(group).await
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if take(&self.reject_next) {
            return Err(LedgerError::Conflict);
        }
        self.inner.commit(changes).await?;
        if take(&self.drop_ack_next) {
            return Err(LedgerError::Conflict);
        }
        Ok(())
    }
}

pub fn flaky_engine(store: Arc<FlakyStore>, kyc: InMemoryKycDirectory, max_attempts: u32) -> AjoEngine {
    AjoEngine::new(store, Arc::new(kyc), fast_config(max_attempts))
}
