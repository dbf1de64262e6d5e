use super::money::Amount;
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned group identifier, monotonic from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Accepting members.
    Planning,
    /// Activated by its owner; membership is frozen.
    Active,
    /// Every position has received a payout.
    Completed,
}

/// Rotating savings group configuration.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AjoGroup {
    pub id: GroupId,
    pub owner: UserId,
    pub title: String,
    pub contribution_amount: Amount,
    pub frequency: Frequency,
    pub status: GroupStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl AjoGroup {
    pub fn is_joinable(&self) -> bool {
        self.status == GroupStatus::Planning
    }
}

/// A user's enrollment in a group. Positions are fixed once assigned.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub struct AjoMember {
    pub group: GroupId,
    pub user: UserId,
    pub position: u32,
}

/// Position a new member receives: one past the highest taken, or 1.
pub fn next_free_position(members: &[AjoMember]) -> u32 {
    members.iter().map(|m| m.position).max().unwrap_or(0) + 1
}

/// Member whose turn follows the member at `previous` in payout order.
///
/// `members` may be in any order and may have gaps. With no previous recipient
/// the lowest position is chosen; after the highest position the rotation wraps.
pub fn next_in_rotation(members: &[AjoMember], previous: Option<u32>) -> Option<&AjoMember> {
    let first = members.iter().min_by_key(|m| m.position);
    match previous {
        None => first,
        Some(previous) => members
            .iter()
            .filter(|m| m.position > previous)
            .min_by_key(|m| m.position)
            .or(first),
    }
}

/// True when `position` is the last stop of the rotation.
pub fn is_last_position(members: &[AjoMember], position: u32) -> bool {
    members.iter().all(|m| m.position <= position)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(positions: &[u32]) -> Vec<AjoMember> {
        positions
            .iter()
            .map(|&position| AjoMember {
                group: GroupId(1),
                user: UserId(u64::from(position) * 10),
                position,
            })
            .collect()
    }

    #[test]
    fn test_next_free_position() {
        assert_eq!(next_free_position(&[]), 1);
        assert_eq!(next_free_position(&members(&[1, 2, 3])), 4);
        assert_eq!(next_free_position(&members(&[3, 1])), 4);
    }

    #[test]
    fn test_rotation_starts_at_first_position() {
        let all = members(&[2, 1, 3]);
        assert_eq!(next_in_rotation(&all, None).unwrap().position, 1);
    }

    #[test]
    fn test_rotation_advances_and_wraps() {
        let all = members(&[1, 2, 3]);
        assert_eq!(next_in_rotation(&all, Some(1)).unwrap().position, 2);
        assert_eq!(next_in_rotation(&all, Some(2)).unwrap().position, 3);
        assert_eq!(next_in_rotation(&all, Some(3)).unwrap().position, 1);
    }

    #[test]
    fn test_rotation_visits_every_position_once() {
        let all = members(&[1, 2, 3, 4, 5]);
        let mut previous = None;
        let mut seen = Vec::new();
        for _ in 0..all.len() {
            let next = next_in_rotation(&all, previous).unwrap().position;
            seen.push(next);
            previous = Some(next);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_rotation_skips_gaps() {
        let all = members(&[1, 4, 7]);
        assert_eq!(next_in_rotation(&all, Some(1)).unwrap().position, 4);
        assert_eq!(next_in_rotation(&all, Some(5)).unwrap().position, 7);
        assert!(next_in_rotation(&[], None).is_none());
    }

    #[test]
    fn test_is_last_position() {
        let all = members(&[1, 2, 3]);
        assert!(is_last_position(&all, 3));
        assert!(!is_last_position(&all, 2));
    }
}
