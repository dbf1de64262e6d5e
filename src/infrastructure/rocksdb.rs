use crate::domain::changeset::{ChangeSet, StateView, Versioned};
use crate::domain::cycle::AjoCycle;
use crate::domain::group::{AjoGroup, AjoMember, GroupId};
use crate::domain::ledger::{AjoLedgerEntry, RequestId};
use crate::domain::ports::{
    CycleRecord, CycleStore, GroupStore, LedgerStore, WalletRecord, WalletStore,
};
use crate::domain::transaction::Transaction;
use crate::domain::user::UserId;
use crate::domain::wallet::Wallet;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, Snapshot, WriteBatch,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for wallets, keyed by user id.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for the transaction log, keyed by user id and sequence.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for groups, keyed by group id.
pub const CF_GROUPS: &str = "groups";
/// Column Family for memberships, keyed by group id and position.
pub const CF_MEMBERS: &str = "members";
/// Column Family for cycles, keyed by group id and cycle number.
pub const CF_CYCLES: &str = "cycles";
/// Column Family for ledger entries, keyed by group, cycle and sequence.
pub const CF_LEDGER: &str = "ledger";
/// Column Family for contribution request ids and counters.
pub const CF_META: &str = "meta";

const KEY_GROUP_COUNTER: &[u8] = b"counter/group";
const KEY_SEQUENCE: &[u8] = b"counter/sequence";
const REQUEST_PREFIX: &[u8] = b"request/";

/// A persistent store implementation using RocksDB.
///
/// Each record kind lives in its own Column Family, serialized as JSON.
/// Commits are serialized through an async mutex, checked against the
/// current contents, and written as a single `WriteBatch`. Reads that pair a
/// record with its log go through one `Snapshot`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_lock: Arc<Mutex<()>>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| LedgerError::internal(format!("Serialization error: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| LedgerError::internal(format!("Deserialization error: {e}")))
}

fn group_key(group: GroupId) -> [u8; 8] {
    group.0.to_be_bytes()
}

fn group_sub_key(group: GroupId, sub: u32) -> Vec<u8> {
    let mut key = group.0.to_be_bytes().to_vec();
    key.extend_from_slice(&sub.to_be_bytes());
    key
}

fn request_key(request: RequestId) -> Vec<u8> {
    let mut key = REQUEST_PREFIX.to_vec();
    key.extend_from_slice(&request.0.to_be_bytes());
    key
}

/// Decodes iterator values until the first key outside `prefix`.
fn take_prefix<T, I>(iter: I, prefix: &[u8]) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    I: Iterator<Item = std::result::Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let mut values = Vec::new();
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        values.push(decode(&value)?);
    }
    Ok(values)
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every required column family exists.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [
            CF_WALLETS,
            CF_TRANSACTIONS,
            CF_GROUPS,
            CF_MEMBERS,
            CF_CYCLES,
            CF_LEDGER,
            CF_META,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::internal(format!("{name} column family not found")))
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Values whose key starts with `prefix`, in key order.
    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
        take_prefix(iter, prefix)
    }

    fn get_at<T: DeserializeOwned>(
        &self,
        snapshot: &Snapshot<'_>,
        cf: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        match snapshot.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_at<T: DeserializeOwned>(
        &self,
        snapshot: &Snapshot<'_>,
        cf: &str,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        let iter =
            snapshot.iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
        take_prefix(iter, prefix)
    }

    fn counter(&self, key: &[u8]) -> Result<u64> {
        Ok(self.get::<u64>(CF_META, key)?.unwrap_or(0))
    }

    fn write_batch(&self, changes: ChangeSet) -> Result<()> {
        let mut batch = WriteBatch::default();
        let mut sequence = self.counter(KEY_SEQUENCE)?;

        for write in changes.wallets {
            let version = write.next_version();
            let key = write.value.user.0.to_be_bytes();
            batch.put_cf(self.cf(CF_WALLETS)?, key, encode(&Versioned::new(write.value, version))?);
        }
        for tx in changes.transactions {
            sequence += 1;
            let mut key = tx.user.0.to_be_bytes().to_vec();
            key.extend_from_slice(&sequence.to_be_bytes());
            batch.put_cf(self.cf(CF_TRANSACTIONS)?, key, encode(&tx)?);
        }
        for write in changes.groups {
            let version = write.next_version();
            let key = group_key(write.value.id);
            batch.put_cf(self.cf(CF_GROUPS)?, key, encode(&Versioned::new(write.value, version))?);
        }
        for member in changes.members {
            let key = group_sub_key(member.group, member.position);
            batch.put_cf(self.cf(CF_MEMBERS)?, key, encode(&member)?);
        }
        for write in changes.cycles {
            let version = write.next_version();
            let key = group_sub_key(write.value.group, write.value.cycle_number);
            batch.put_cf(self.cf(CF_CYCLES)?, key, encode(&Versioned::new(write.value, version))?);
        }
        for entry in changes.ledger {
            sequence += 1;
            let mut key = group_sub_key(entry.group, entry.cycle_number);
            key.extend_from_slice(&sequence.to_be_bytes());
            let bytes = encode(&entry)?;
            if let Some(request) = entry.request {
                batch.put_cf(self.cf(CF_META)?, request_key(request), &bytes);
            }
            batch.put_cf(self.cf(CF_LEDGER)?, key, bytes);
        }

        batch.put_cf(self.cf(CF_META)?, KEY_SEQUENCE, encode(&sequence)?);
        self.db.write(batch)?;
        Ok(())
    }
}

impl StateView for RocksDBStore {
    fn wallet_version(&self, user: UserId) -> Result<Option<u64>> {
        Ok(self
            .get::<Versioned<Wallet>>(CF_WALLETS, &user.0.to_be_bytes())?
            .map(|w| w.version))
    }

    fn group_version(&self, group: GroupId) -> Result<Option<u64>> {
        Ok(self
            .get::<Versioned<AjoGroup>>(CF_GROUPS, &group_key(group))?
            .map(|g| g.version))
    }

    fn members(&self, group: GroupId) -> Result<Vec<AjoMember>> {
        self.scan(CF_MEMBERS, &group_key(group))
    }

    fn cycle_version(&self, group: GroupId, cycle_number: u32) -> Result<Option<u64>> {
        Ok(self
            .get::<Versioned<AjoCycle>>(CF_CYCLES, &group_sub_key(group, cycle_number))?
            .map(|c| c.version))
    }

    fn open_cycles(&self, group: GroupId) -> Result<Vec<u32>> {
        Ok(self
            .scan::<Versioned<AjoCycle>>(CF_CYCLES, &group_key(group))?
            .into_iter()
            .filter(|c| !c.value.paid_out)
            .map(|c| c.value.cycle_number)
            .collect())
    }

    fn has_request(&self, request: RequestId) -> Result<bool> {
        Ok(self
            .db
            .get_pinned_cf(self.cf(CF_META)?, request_key(request))?
            .is_some())
    }
}

#[async_trait]
impl WalletStore for RocksDBStore {
    async fn wallet(&self, user: UserId) -> Result<Option<Versioned<Wallet>>> {
        self.get(CF_WALLETS, &user.0.to_be_bytes())
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        Ok(self
            .scan::<Versioned<Wallet>>(CF_WALLETS, &[])?
            .into_iter()
            .map(|w| w.value)
            .collect())
    }

    async fn transactions(&self, user: UserId) -> Result<Vec<Transaction>> {
        self.scan(CF_TRANSACTIONS, &user.0.to_be_bytes())
    }

    async fn wallet_with_log(&self, user: UserId) -> Result<Option<WalletRecord>> {
        let snapshot = self.db.snapshot();
        let key = user.0.to_be_bytes();
        let Some(wallet) = self.get_at(&snapshot, CF_WALLETS, &key)? else {
            return Ok(None);
        };
        let transactions = self.scan_at(&snapshot, CF_TRANSACTIONS, &key)?;
        Ok(Some(WalletRecord {
            wallet,
            transactions,
        }))
    }
}

#[async_trait]
impl GroupStore for RocksDBStore {
    async fn next_group_id(&self) -> Result<GroupId> {
        let _guard = self.commit_lock.lock().await;
        let next = self.counter(KEY_GROUP_COUNTER)? + 1;
        self.db
            .put_cf(self.cf(CF_META)?, KEY_GROUP_COUNTER, encode(&next)?)?;
        Ok(GroupId(next))
    }

    async fn group(&self, id: GroupId) -> Result<Option<Versioned<AjoGroup>>> {
        self.get(CF_GROUPS, &group_key(id))
    }

    async fn groups(&self) -> Result<Vec<AjoGroup>> {
        Ok(self
            .scan::<Versioned<AjoGroup>>(CF_GROUPS, &[])?
            .into_iter()
            .map(|g| g.value)
            .collect())
    }

    async fn members(&self, group: GroupId) -> Result<Vec<AjoMember>> {
        StateView::members(self, group)
    }

    async fn memberships(&self, user: UserId) -> Result<Vec<AjoMember>> {
        Ok(self
            .scan::<AjoMember>(CF_MEMBERS, &[])?
            .into_iter()
            .filter(|m| m.user == user)
            .collect())
    }
}

#[async_trait]
impl CycleStore for RocksDBStore {
    async fn cycles(&self, group: GroupId) -> Result<Vec<Versioned<AjoCycle>>> {
        self.scan(CF_CYCLES, &group_key(group))
    }

    async fn open_cycle(&self, group: GroupId) -> Result<Option<Versioned<AjoCycle>>> {
        Ok(self
            .scan::<Versioned<AjoCycle>>(CF_CYCLES, &group_key(group))?
            .into_iter()
            .find(|c| !c.value.paid_out))
    }

    async fn ledger_entries(
        &self,
        group: GroupId,
        cycle_number: u32,
    ) -> Result<Vec<AjoLedgerEntry>> {
        self.scan(CF_LEDGER, &group_sub_key(group, cycle_number))
    }

    async fn entry_for_request(&self, request: RequestId) -> Result<Option<AjoLedgerEntry>> {
        self.get(CF_META, &request_key(request))
    }

    async fn cycle_with_entries(
        &self,
        group: GroupId,
        cycle_number: u32,
    ) -> Result<Option<CycleRecord>> {
        let snapshot = self.db.snapshot();
        let key = group_sub_key(group, cycle_number);
        let Some(cycle) = self.get_at(&snapshot, CF_CYCLES, &key)? else {
            return Ok(None);
        };
        let entries = self.scan_at(&snapshot, CF_LEDGER, &key)?;
        Ok(Some(CycleRecord { cycle, entries }))
    }

    async fn cycles_with_entries(&self, group: GroupId) -> Result<Vec<CycleRecord>> {
        let snapshot = self.db.snapshot();
        let cycles: Vec<Versioned<AjoCycle>> =
            self.scan_at(&snapshot, CF_CYCLES, &group_key(group))?;
        cycles
            .into_iter()
            .map(|cycle| {
                let key = group_sub_key(group, cycle.value.cycle_number);
                let entries = self.scan_at(&snapshot, CF_LEDGER, &key)?;
                Ok(CycleRecord { cycle, entries })
            })
            .collect()
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let _guard = self.commit_lock.lock().await;
        changes.check(self)?;
        self.write_batch(changes)
    }
}
