use super::group::{AjoMember, GroupId, next_in_rotation};
use super::money::{Amount, Balance};
use super::user::UserId;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One contribution-and-payout round of a group.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AjoCycle {
    pub group: GroupId,
    /// Monotonic per group, starting at 1.
    pub cycle_number: u32,
    pub payout_user: UserId,
    pub pool_amount: Balance,
    pub paid_out: bool,
    pub created_at: DateTime<Utc>,
    pub paid_out_at: Option<DateTime<Utc>>,
}

impl AjoCycle {
    pub fn open(group: GroupId, cycle_number: u32, payout_user: UserId) -> Self {
        Self {
            group,
            cycle_number,
            payout_user,
            pool_amount: Balance::ZERO,
            paid_out: false,
            created_at: Utc::now(),
            paid_out_at: None,
        }
    }

    pub fn add_contribution(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.pool_amount = self.pool_amount.checked_add(amount)?;
        Ok(())
    }

    /// True once the pool holds a full round of contributions.
    pub fn is_full(&self, target: Balance) -> bool {
        self.pool_amount >= target
    }

    pub fn mark_paid(&mut self) {
        self.paid_out = true;
        self.paid_out_at = Some(Utc::now());
    }
}

/// The cycle a group opens when a contribution arrives and none is open.
///
/// Numbers continue from the highest existing cycle. The payout goes to the
/// member following the recipient of the most recent paid-out cycle, or to
/// the first position if nothing has been paid yet. `None` when the group
/// has no members.
pub fn next_cycle(group: GroupId, members: &[AjoMember], cycles: &[AjoCycle]) -> Option<AjoCycle> {
    let cycle_number = cycles.iter().map(|c| c.cycle_number).max().unwrap_or(0) + 1;
    let previous = cycles
        .iter()
        .filter(|c| c.paid_out)
        .max_by_key(|c| c.cycle_number)
        .and_then(|last| members.iter().find(|m| m.user == last.payout_user))
        .map(|m| m.position);
    let recipient = next_in_rotation(members, previous)?;
    Some(AjoCycle::open(group, cycle_number, recipient.user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn roster(n: u32) -> Vec<AjoMember> {
        (1..=n)
            .map(|position| AjoMember {
                group: GroupId(1),
                user: UserId(u64::from(position) + 100),
                position,
            })
            .collect()
    }

    #[test]
    fn test_first_cycle_pays_position_one() {
        let cycle = next_cycle(GroupId(1), &roster(3), &[]).unwrap();
        assert_eq!(cycle.cycle_number, 1);
        assert_eq!(cycle.payout_user, UserId(101));
        assert!(!cycle.paid_out);
        assert_eq!(cycle.pool_amount, Balance::ZERO);
    }

    #[test]
    fn test_rotation_follows_last_paid_cycle() {
        let members = roster(3);
        let mut history = Vec::new();
        let mut recipients = Vec::new();
        for _ in 0..6 {
            let mut cycle = next_cycle(GroupId(1), &members, &history).unwrap();
            recipients.push(cycle.payout_user.0);
            cycle.mark_paid();
            history.push(cycle);
        }
        assert_eq!(recipients, vec![101, 102, 103, 101, 102, 103]);
        assert_eq!(history.last().unwrap().cycle_number, 6);
    }

    #[test]
    fn test_no_members_no_cycle() {
        assert!(next_cycle(GroupId(1), &[], &[]).is_none());
    }

    #[test]
    fn test_cycle_pool_fills() {
        let amount = Amount::new(dec!(5000)).unwrap();
        let target = Balance::times(amount, 2).unwrap();
        let mut cycle = AjoCycle::open(GroupId(1), 1, UserId(7));
        assert!(!cycle.is_full(target));

        cycle.add_contribution(amount).unwrap();
        cycle.add_contribution(amount).unwrap();
        assert_eq!(cycle.pool_amount.value(), dec!(10000));
        assert!(cycle.is_full(target));

        cycle.mark_paid();
        assert!(cycle.paid_out);
        assert!(cycle.paid_out_at.is_some());
    }
}
