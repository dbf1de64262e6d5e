use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity reference supplied by the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// KYC status as reported by the profile collaborator.
///
/// The engine never decides this value; it only gates financial actions on
/// [`KycStatus::Verified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    #[default]
    Unverified,
    Pending,
    Verified,
}

impl KycStatus {
    pub fn is_verified(self) -> bool {
        self == KycStatus::Verified
    }
}
