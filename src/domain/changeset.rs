//! Units of work handed to the store.
//!
//! Every state change the engine makes is described as a [`ChangeSet`] and
//! committed in one step. The store checks the set against its current state
//! with [`ChangeSet::check`] and applies all of it or none of it.

use super::cycle::AjoCycle;
use super::group::{AjoGroup, AjoMember, GroupId};
use super::ledger::{AjoLedgerEntry, RequestId};
use super::transaction::Transaction;
use super::user::UserId;
use super::wallet::Wallet;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A stored value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }
}

/// A write guarded by the version the caller last observed.
///
/// `expected == None` means the record must not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded<T> {
    pub value: T,
    pub expected: Option<u64>,
}

impl<T> Guarded<T> {
    pub fn insert(value: T) -> Self {
        Self {
            value,
            expected: None,
        }
    }

    pub fn update(value: T, expected: u64) -> Self {
        Self {
            value,
            expected: Some(expected),
        }
    }

    /// Version the record will carry once committed.
    pub fn next_version(&self) -> u64 {
        self.expected.map_or(1, |v| v + 1)
    }
}

impl<T: Clone> From<&Versioned<T>> for Guarded<T> {
    fn from(current: &Versioned<T>) -> Self {
        Guarded::update(current.value.clone(), current.version)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub wallets: Vec<Guarded<Wallet>>,
    pub transactions: Vec<Transaction>,
    pub groups: Vec<Guarded<AjoGroup>>,
    pub members: Vec<AjoMember>,
    pub cycles: Vec<Guarded<AjoCycle>>,
    pub ledger: Vec<AjoLedgerEntry>,
}

/// Read access a store grants to [`ChangeSet::check`] while it holds its
/// commit lock.
pub trait StateView {
    fn wallet_version(&self, user: UserId) -> Result<Option<u64>>;
    fn group_version(&self, group: GroupId) -> Result<Option<u64>>;
    fn members(&self, group: GroupId) -> Result<Vec<AjoMember>>;
    fn cycle_version(&self, group: GroupId, cycle_number: u32) -> Result<Option<u64>>;
    /// Cycle numbers of the group's cycles with `paid_out == false`.
    fn open_cycles(&self, group: GroupId) -> Result<Vec<u32>>;
    fn has_request(&self, request: RequestId) -> Result<bool>;
}

fn guard(current: Option<u64>, expected: Option<u64>) -> Result<()> {
    if current == expected {
        Ok(())
    } else {
        Err(LedgerError::Conflict)
    }
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
            && self.transactions.is_empty()
            && self.groups.is_empty()
            && self.members.is_empty()
            && self.cycles.is_empty()
            && self.ledger.is_empty()
    }

    /// Verifies that applying this set to `view` keeps every storage invariant.
    ///
    /// Returns `Conflict` on a stale version, a duplicate member position or
    /// user, a second open cycle in a group, or an already recorded request.
    pub fn check(&self, view: &impl StateView) -> Result<()> {
        for write in &self.wallets {
            guard(view.wallet_version(write.value.user)?, write.expected)?;
        }

        let mut new_groups = HashSet::new();
        for write in &self.groups {
            guard(view.group_version(write.value.id)?, write.expected)?;
            new_groups.insert(write.value.id);
        }

        let mut rosters: BTreeMap<GroupId, Vec<AjoMember>> = BTreeMap::new();
        for member in &self.members {
            if !rosters.contains_key(&member.group) {
                if view.group_version(member.group)?.is_none() && !new_groups.contains(&member.group)
                {
                    return Err(LedgerError::NotFound(format!("group {}", member.group)));
                }
                rosters.insert(member.group, view.members(member.group)?);
            }
            let roster = rosters.entry(member.group).or_default();
            if roster
                .iter()
                .any(|m| m.position == member.position || m.user == member.user)
            {
                return Err(LedgerError::Conflict);
            }
            roster.push(*member);
        }

        let mut open: BTreeMap<GroupId, HashSet<u32>> = BTreeMap::new();
        for write in &self.cycles {
            let cycle = &write.value;
            guard(
                view.cycle_version(cycle.group, cycle.cycle_number)?,
                write.expected,
            )?;
            if !open.contains_key(&cycle.group) {
                open.insert(
                    cycle.group,
                    view.open_cycles(cycle.group)?.into_iter().collect(),
                );
            }
            let numbers = open.entry(cycle.group).or_default();
            if cycle.paid_out {
                numbers.remove(&cycle.cycle_number);
            } else {
                numbers.insert(cycle.cycle_number);
            }
        }
        if open.values().any(|numbers| numbers.len() > 1) {
            return Err(LedgerError::Conflict);
        }

        let mut requests = HashSet::new();
        for entry in &self.ledger {
            if let Some(request) = entry.request
                && (!requests.insert(request) || view.has_request(request)?)
            {
                return Err(LedgerError::Conflict);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeView {
        wallets: HashMap<UserId, u64>,
        groups: HashMap<GroupId, u64>,
        members: Vec<AjoMember>,
        cycles: HashMap<(GroupId, u32), (u64, bool)>,
        requests: HashSet<RequestId>,
    }

    impl StateView for FakeView {
        fn wallet_version(&self, user: UserId) -> Result<Option<u64>> {
            Ok(self.wallets.get(&user).copied())
        }
        fn group_version(&self, group: GroupId) -> Result<Option<u64>> {
            Ok(self.groups.get(&group).copied())
        }
        fn members(&self, group: GroupId) -> Result<Vec<AjoMember>> {
            Ok(self.members.iter().filter(|m| m.group == group).copied().collect())
        }
        fn cycle_version(&self, group: GroupId, cycle_number: u32) -> Result<Option<u64>> {
            Ok(self.cycles.get(&(group, cycle_number)).map(|(v, _)| *v))
        }
        fn open_cycles(&self, group: GroupId) -> Result<Vec<u32>> {
            Ok(self
                .cycles
                .iter()
                .filter(|((g, _), (_, paid))| *g == group && !paid)
                .map(|((_, n), _)| *n)
                .collect())
        }
        fn has_request(&self, request: RequestId) -> Result<bool> {
            Ok(self.requests.contains(&request))
        }
    }

    #[test]
    fn test_stale_wallet_version_conflicts() {
        let mut view = FakeView::default();
        view.wallets.insert(UserId(1), 3);

        let mut changes = ChangeSet::default();
        changes
            .wallets
            .push(Guarded::update(Wallet::new(UserId(1), "NGN"), 2));
        assert!(matches!(changes.check(&view), Err(LedgerError::Conflict)));

        changes.wallets[0].expected = Some(3);
        assert!(changes.check(&view).is_ok());
    }

    #[test]
    fn test_duplicate_position_conflicts() {
        let mut view = FakeView::default();
        view.groups.insert(GroupId(1), 1);
        view.members.push(AjoMember {
            group: GroupId(1),
            user: UserId(1),
            position: 1,
        });

        let changes = ChangeSet {
            members: vec![AjoMember {
                group: GroupId(1),
                user: UserId(2),
                position: 1,
            }],
            ..Default::default()
        };
        assert!(matches!(changes.check(&view), Err(LedgerError::Conflict)));
    }

    #[test]
    fn test_second_open_cycle_conflicts() {
        let mut view = FakeView::default();
        view.cycles.insert((GroupId(1), 1), (1, false));

        let changes = ChangeSet {
            cycles: vec![Guarded::insert(AjoCycle::open(GroupId(1), 2, UserId(2)))],
            ..Default::default()
        };
        assert!(matches!(changes.check(&view), Err(LedgerError::Conflict)));
    }

    #[test]
    fn test_recorded_request_conflicts() {
        let mut view = FakeView::default();
        view.requests.insert(RequestId(9));

        let entry = AjoLedgerEntry::contribution(
            GroupId(1),
            UserId(1),
            1,
            Amount::new(dec!(5)).unwrap(),
            RequestId(9),
        );
        let changes = ChangeSet {
            ledger: vec![entry],
            ..Default::default()
        };
        assert!(matches!(changes.check(&view), Err(LedgerError::Conflict)));
    }
}
