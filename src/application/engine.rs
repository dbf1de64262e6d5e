use super::locks::{KeyedLocks, LockKey};
use super::retry::with_retry;
use crate::config::EngineConfig;
use crate::domain::changeset::{ChangeSet, Guarded, Versioned};
use crate::domain::cycle::{AjoCycle, next_cycle};
use crate::domain::group::{
    AjoGroup, AjoMember, Frequency, GroupId, GroupStatus, is_last_position, next_free_position,
};
use crate::domain::ledger::{AjoLedgerEntry, Movement, RequestId};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{KycDirectoryRef, LedgerStoreRef};
use crate::domain::user::UserId;
use crate::domain::wallet::Wallet;
use crate::error::{LedgerError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

/// A member's request to pay into their group's open cycle.
///
/// `request` is chosen by the caller and identifies the logical request
/// across resubmissions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContributionRequest {
    pub request: RequestId,
    pub group: GroupId,
    pub user: UserId,
    pub amount: Decimal,
}

/// The ledger and rotation engine.
///
/// Every mutating operation runs under per-key locks (group before wallets),
/// builds a single [`ChangeSet`] from fresh reads, and commits it atomically.
/// Storage conflicts are retried with backoff according to
/// [`EngineConfig::retry`].
pub struct AjoEngine {
    store: LedgerStoreRef,
    kyc: KycDirectoryRef,
    config: EngineConfig,
    locks: KeyedLocks,
}

impl AjoEngine {
    /// Creates a new `AjoEngine` instance.
    ///
    /// # Arguments
    ///
    /// * `store` - Storage for wallets, groups, cycles and ledger entries.
    /// * `kyc` - The collaborator that reports each user's KYC status.
    /// * `config` - Engine settings.
    pub fn new(store: LedgerStoreRef, kyc: KycDirectoryRef, config: EngineConfig) -> Self {
        Self {
            store,
            kyc,
            config,
            locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &LedgerStoreRef {
        &self.store
    }

    async fn require_verified(&self, user: UserId) -> Result<()> {
        if self.kyc.kyc_status(user).await?.is_verified() {
            Ok(())
        } else {
            warn!(%user, "Rejected: user is not KYC verified");
            Err(LedgerError::Unverified(user))
        }
    }

    async fn load_group(&self, group: GroupId) -> Result<Versioned<AjoGroup>> {
        self.store
            .group(group)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("group {group}")))
    }

    async fn load_wallet(&self, user: UserId) -> Result<Versioned<Wallet>> {
        self.store
            .wallet(user)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("wallet of user {user}")))
    }

    /// The user's wallet as a guarded write, opening a new one if missing.
    async fn wallet_or_new(&self, user: UserId) -> Result<Guarded<Wallet>> {
        Ok(match self.store.wallet(user).await? {
            Some(current) => Guarded::from(&current),
            None => Guarded::insert(Wallet::new(user, self.config.currency.as_str())),
        })
    }

    // ---- Balance Store ----

    /// Opens the user's wallet if it does not exist yet.
    #[instrument(skip(self))]
    pub async fn open_wallet(&self, user: UserId) -> Result<Wallet> {
        let _locks = self.locks.acquire(vec![LockKey::Wallet(user)]).await;
        with_retry(&self.config.retry, "open_wallet", move || async move {
            if let Some(existing) = self.store.wallet(user).await? {
                return Ok(existing.value);
            }
            let wallet = Wallet::new(user, self.config.currency.as_str());
            self.store
                .commit(ChangeSet {
                    wallets: vec![Guarded::insert(wallet.clone())],
                    ..Default::default()
                })
                .await?;
            info!(%user, currency = %wallet.currency, "Wallet opened");
            Ok(wallet)
        })
        .await
    }

    /// Credits the user's wallet from an external funding source.
    ///
    /// Requires a verified KYC status. Opens the wallet on first funding.
    #[instrument(skip(self))]
    pub async fn fund(&self, user: UserId, amount: Amount) -> Result<Wallet> {
        self.require_verified(user).await?;
        let _locks = self.locks.acquire(vec![LockKey::Wallet(user)]).await;
        with_retry(&self.config.retry, "fund", move || async move {
            let mut write = self.wallet_or_new(user).await?;
            let tx = write.value.credit(amount, "Wallet funding")?;
            self.store
                .commit(ChangeSet {
                    wallets: vec![write.clone()],
                    transactions: vec![tx],
                    ..Default::default()
                })
                .await?;
            info!(%user, %amount, balance = %write.value.balance, "Wallet funded");
            Ok(write.value)
        })
        .await
    }

    /// Debits the user's wallet towards an external destination.
    #[instrument(skip(self))]
    pub async fn withdraw(&self, user: UserId, amount: Amount) -> Result<Wallet> {
        let _locks = self.locks.acquire(vec![LockKey::Wallet(user)]).await;
        with_retry(&self.config.retry, "withdraw", move || async move {
            let mut write = Guarded::from(&self.load_wallet(user).await?);
            let tx = write.value.debit(amount, "Wallet withdrawal")?;
            self.store
                .commit(ChangeSet {
                    wallets: vec![write.clone()],
                    transactions: vec![tx],
                    ..Default::default()
                })
                .await?;
            info!(%user, %amount, balance = %write.value.balance, "Wallet withdrawal");
            Ok(write.value)
        })
        .await
    }

    // ---- Group Registry ----

    /// Creates a group in `planning` with its owner enrolled at position 1.
    #[instrument(skip(self))]
    pub async fn create_group(
        &self,
        owner: UserId,
        title: &str,
        contribution_amount: Amount,
        frequency: Frequency,
    ) -> Result<AjoGroup> {
        self.require_verified(owner).await?;
        let title = title.trim();
        if title.is_empty() {
            return Err(LedgerError::Validation(
                "Group title must not be empty".to_string(),
            ));
        }

        let id = self.store.next_group_id().await?;
        let group = AjoGroup {
            id,
            owner,
            title: title.to_string(),
            contribution_amount,
            frequency,
            status: GroupStatus::Planning,
            created_at: Utc::now(),
            started_at: None,
        };
        let owner_member = AjoMember {
            group: id,
            user: owner,
            position: 1,
        };
        self.store
            .commit(ChangeSet {
                groups: vec![Guarded::insert(group.clone())],
                members: vec![owner_member],
                ..Default::default()
            })
            .await?;

        info!(group = %id, %owner, %contribution_amount, "Group created");
        Ok(group)
    }

    /// Enrolls `user` at the next free position of a `planning` group.
    #[instrument(skip(self))]
    pub async fn join(&self, group: GroupId, user: UserId) -> Result<AjoMember> {
        let _locks = self.locks.acquire(vec![LockKey::Group(group)]).await;
        with_retry(&self.config.retry, "join", move || async move {
            let current = self.load_group(group).await?;
            if !current.value.is_joinable() {
                return Err(LedgerError::GroupNotJoinable(group));
            }
            let members = self.store.members(group).await?;
            if members.iter().any(|m| m.user == user) {
                return Err(LedgerError::AlreadyMember { group, user });
            }

            let member = AjoMember {
                group,
                user,
                position: next_free_position(&members),
            };
            // Group write bumps the version; a concurrent activation conflicts.
            self.store
                .commit(ChangeSet {
                    groups: vec![Guarded::from(&current)],
                    members: vec![member],
                    ..Default::default()
                })
                .await?;

            info!(%group, %user, position = member.position, "Member joined");
            Ok(member)
        })
        .await
    }

    /// Moves a group from `planning` to `active`. Only the owner may do this.
    #[instrument(skip(self))]
    pub async fn activate(&self, group: GroupId, caller: UserId) -> Result<AjoGroup> {
        let _locks = self.locks.acquire(vec![LockKey::Group(group)]).await;
        with_retry(&self.config.retry, "activate", move || async move {
            let current = self.load_group(group).await?;
            if current.value.owner != caller {
                return Err(LedgerError::NotOwner { group, user: caller });
            }
            if current.value.status != GroupStatus::Planning {
                return Err(LedgerError::InvalidState(format!(
                    "group {group} is {:?}, expected Planning",
                    current.value.status
                )));
            }

            let mut write = Guarded::from(&current);
            write.value.status = GroupStatus::Active;
            write.value.started_at = Some(Utc::now());
            self.store
                .commit(ChangeSet {
                    groups: vec![write.clone()],
                    ..Default::default()
                })
                .await?;

            info!(%group, "Group activated");
            Ok(write.value)
        })
        .await
    }

    // ---- Cycle Engine ----

    /// Pays a member's fixed contribution into the group's open cycle,
    /// opening the next cycle in the rotation if none is open. The group must
    /// be `active`.
    ///
    /// The debit, the ledger entry and the pool increase commit together.
    /// Resubmitting an already recorded `request` returns the cycle it went
    /// into without applying anything again.
    #[instrument(skip(self))]
    pub async fn contribute(&self, request: ContributionRequest) -> Result<AjoCycle> {
        let _group_lock = self.locks.acquire(vec![LockKey::Group(request.group)]).await;

        let mut wallets = vec![LockKey::Wallet(request.user)];
        if self.config.auto_payout
            && let Some(recipient) = self.upcoming_recipient(request.group).await?
        {
            wallets.push(LockKey::Wallet(recipient));
        }
        let _wallet_locks = self.locks.acquire(wallets).await;

        with_retry(&self.config.retry, "contribute", move || {
            self.try_contribute(request)
        })
        .await
    }

    /// Recipient of the open cycle, or of the cycle the next contribution
    /// would open.
    pub(crate) async fn upcoming_recipient(&self, group: GroupId) -> Result<Option<UserId>> {
        if let Some(open) = self.store.open_cycle(group).await? {
            return Ok(Some(open.value.payout_user));
        }
        let members = self.store.members(group).await?;
        let cycles = self.cycle_history(group).await?;
        Ok(next_cycle(group, &members, &cycles).map(|c| c.payout_user))
    }

    async fn cycle_history(&self, group: GroupId) -> Result<Vec<AjoCycle>> {
        Ok(self
            .store
            .cycles(group)
            .await?
            .into_iter()
            .map(|c| c.value)
            .collect())
    }

    async fn replay(&self, request: ContributionRequest, entry: AjoLedgerEntry) -> Result<AjoCycle> {
        if entry.group != request.group || entry.user != request.user {
            return Err(LedgerError::Validation(format!(
                "request {} was already used for another contribution",
                request.request
            )));
        }
        let cycle = self
            .store
            .cycles(entry.group)
            .await?
            .into_iter()
            .find(|c| c.value.cycle_number == entry.cycle_number)
            .ok_or_else(|| {
                LedgerError::internal(format!(
                    "ledger entry for request {} points to missing cycle {}",
                    request.request, entry.cycle_number
                ))
            })?;
        info!(request = %request.request, cycle = entry.cycle_number, "Contribution already recorded");
        Ok(cycle.value)
    }

    async fn try_contribute(&self, request: ContributionRequest) -> Result<AjoCycle> {
        let ContributionRequest {
            group: group_id,
            user,
            ..
        } = request;

        if let Some(entry) = self.store.entry_for_request(request.request).await? {
            return self.replay(request, entry).await;
        }

        self.require_verified(user).await?;

        let group = self.load_group(group_id).await?;
        let members = self.store.members(group_id).await?;
        if !members.iter().any(|m| m.user == user) {
            return Err(LedgerError::NotMember {
                group: group_id,
                user,
            });
        }
        let contribution = group.value.contribution_amount;
        if request.amount != contribution.value() {
            return Err(LedgerError::WrongAmount {
                expected: contribution.value(),
                got: request.amount,
            });
        }
        if group.value.status != GroupStatus::Active {
            return Err(LedgerError::InvalidState(format!(
                "group {group_id} is {:?}, contributions need an active group",
                group.value.status
            )));
        }

        let mut cycle = match self.store.open_cycle(group_id).await? {
            Some(open) => Guarded::from(&open),
            None => {
                let history = self.cycle_history(group_id).await?;
                let fresh = next_cycle(group_id, &members, &history).ok_or_else(|| {
                    LedgerError::InvalidState(format!("group {group_id} has no members"))
                })?;
                debug!(
                    group = %group_id,
                    cycle = fresh.cycle_number,
                    payout_user = %fresh.payout_user,
                    "Opening cycle"
                );
                Guarded::insert(fresh)
            }
        };
        let cycle_number = cycle.value.cycle_number;

        let already_paid_in = self
            .store
            .ledger_entries(group_id, cycle_number)
            .await?
            .iter()
            .any(|e| e.movement == Movement::Contribution && e.user == user);
        if already_paid_in {
            return Err(LedgerError::AlreadyContributed {
                group: group_id,
                user,
                cycle: cycle_number,
            });
        }

        let mut payer = Guarded::from(&self.load_wallet(user).await?);
        let debit = payer.value.debit(
            contribution,
            format!("Ajo contribution: {} (cycle {cycle_number})", group.value.title),
        )?;

        let mut changes = ChangeSet {
            transactions: vec![debit],
            ledger: vec![AjoLedgerEntry::contribution(
                group_id,
                user,
                cycle_number,
                contribution,
                request.request,
            )],
            ..Default::default()
        };
        cycle.value.add_contribution(contribution)?;

        let target = Balance::times(contribution, members.len())?;
        let mut group_write = None;
        if self.config.auto_payout && cycle.value.is_full(target) {
            let mut group_value = group.value.clone();
            let recipient = cycle.value.payout_user;
            let completed = if recipient == user {
                stage_payout(&mut group_value, &members, &mut cycle.value, &mut payer.value, &mut changes)?
            } else {
                let mut payee = self.wallet_or_new(recipient).await?;
                let completed = stage_payout(
                    &mut group_value,
                    &members,
                    &mut cycle.value,
                    &mut payee.value,
                    &mut changes,
                )?;
                changes.wallets.push(payee);
                completed
            };
            if completed {
                group_write = Some(Guarded::update(group_value, group.version));
            }
        }

        changes.wallets.push(payer);
        changes.cycles.push(cycle.clone());
        changes.groups.extend(group_write);
        self.store.commit(changes).await?;

        info!(
            group = %group_id,
            %user,
            cycle = cycle_number,
            pool = %cycle.value.pool_amount,
            paid_out = cycle.value.paid_out,
            "Contribution recorded"
        );
        Ok(cycle.value)
    }

    /// Disburses a full cycle's pool to its payout user and closes the cycle.
    ///
    /// Fails with `InvalidState` if the cycle is already paid out or its pool
    /// holds less than one contribution per member. Closing the cycle of the
    /// last position completes an `active` group.
    #[instrument(skip(self))]
    pub async fn close_payout(&self, group: GroupId, cycle_number: u32) -> Result<AjoCycle> {
        let _group_lock = self.locks.acquire(vec![LockKey::Group(group)]).await;
        let recipient = self
            .store
            .cycles(group)
            .await?
            .into_iter()
            .find(|c| c.value.cycle_number == cycle_number)
            .map(|c| c.value.payout_user);
        let _wallet_locks = self
            .locks
            .acquire(recipient.map(LockKey::Wallet).into_iter().collect())
            .await;

        with_retry(&self.config.retry, "close_payout", move || {
            self.try_close_payout(group, cycle_number)
        })
        .await
    }

    async fn try_close_payout(&self, group_id: GroupId, cycle_number: u32) -> Result<AjoCycle> {
        let group = self.load_group(group_id).await?;
        let mut cycle = self
            .store
            .cycles(group_id)
            .await?
            .into_iter()
            .find(|c| c.value.cycle_number == cycle_number)
            .map(|c| Guarded::from(&c))
            .ok_or_else(|| {
                LedgerError::NotFound(format!("cycle {cycle_number} of group {group_id}"))
            })?;
        if cycle.value.paid_out {
            return Err(LedgerError::InvalidState(format!(
                "cycle {cycle_number} of group {group_id} is already paid out"
            )));
        }

        let members = self.store.members(group_id).await?;
        let target = Balance::times(group.value.contribution_amount, members.len())?;
        if !cycle.value.is_full(target) {
            return Err(LedgerError::InvalidState(format!(
                "cycle {cycle_number} pool {} is below target {target}",
                cycle.value.pool_amount
            )));
        }

        let mut changes = ChangeSet::default();
        let mut group_value = group.value.clone();
        let mut payee = self.wallet_or_new(cycle.value.payout_user).await?;
        let completed = stage_payout(
            &mut group_value,
            &members,
            &mut cycle.value,
            &mut payee.value,
            &mut changes,
        )?;
        changes.wallets.push(payee);
        changes.cycles.push(cycle.clone());
        if completed {
            changes
                .groups
                .push(Guarded::update(group_value, group.version));
        }
        self.store.commit(changes).await?;

        info!(
            group = %group_id,
            cycle = cycle_number,
            payout_user = %cycle.value.payout_user,
            amount = %cycle.value.pool_amount,
            completed,
            "Cycle paid out"
        );
        Ok(cycle.value)
    }
}

/// Adds the payout of `cycle` to `changes`: credits `payee`, records the
/// payout ledger entry and marks the cycle paid.
///
/// Returns true when this payout exhausts the rotation of an active group,
/// in which case `group` has been moved to `Completed`.
fn stage_payout(
    group: &mut AjoGroup,
    members: &[AjoMember],
    cycle: &mut AjoCycle,
    payee: &mut Wallet,
    changes: &mut ChangeSet,
) -> Result<bool> {
    let pool = Amount::new(cycle.pool_amount.value())?;
    let credit = payee.credit(
        pool,
        format!("Ajo payout: {} (cycle {})", group.title, cycle.cycle_number),
    )?;
    changes.transactions.push(credit);
    changes.ledger.push(AjoLedgerEntry::payout(
        group.id,
        cycle.payout_user,
        cycle.cycle_number,
        pool,
    ));
    cycle.mark_paid();

    let last_stop = members
        .iter()
        .find(|m| m.user == cycle.payout_user)
        .is_some_and(|m| is_last_position(members, m.position));
    if group.status == GroupStatus::Active && last_stop {
        group.status = GroupStatus::Completed;
        return Ok(true);
    }
    Ok(false)
}
