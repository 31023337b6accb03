use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::UnknownVariant;

/// Verification state of an assigned task. A task with no status yet has not
/// been completed by the student.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Partial,
    Incomplete,
}

impl VerificationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Partial => "partial",
            VerificationStatus::Incomplete => "incomplete",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, VerificationStatus::Pending)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "verified" => Ok(VerificationStatus::Verified),
            "partial" => Ok(VerificationStatus::Partial),
            "incomplete" => Ok(VerificationStatus::Incomplete),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    TaskAward,
    ManualAdd,
    ManualSubtract,
    Redemption,
    StreakAward,
}

impl TransactionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            TransactionKind::TaskAward => "task_award",
            TransactionKind::ManualAdd => "manual_add",
            TransactionKind::ManualSubtract => "manual_subtract",
            TransactionKind::Redemption => "redemption",
            TransactionKind::StreakAward => "streak_award",
        }
    }

    /// Manual adjustments are typed by the sign of the amount.
    pub fn for_adjustment(amount: i32) -> Self {
        if amount < 0 {
            TransactionKind::ManualSubtract
        } else {
            TransactionKind::ManualAdd
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_award" => Ok(TransactionKind::TaskAward),
            "manual_add" => Ok(TransactionKind::ManualAdd),
            "manual_subtract" => Ok(TransactionKind::ManualSubtract),
            "redemption" => Ok(TransactionKind::Redemption),
            "streak_award" => Ok(TransactionKind::StreakAward),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjustment_kind_follows_sign() {
        assert_eq!(TransactionKind::for_adjustment(5), TransactionKind::ManualAdd);
        assert_eq!(
            TransactionKind::for_adjustment(-5),
            TransactionKind::ManualSubtract
        );
    }

    #[test]
    fn only_pending_is_open() {
        assert!(!VerificationStatus::Pending.is_terminal());
        assert!(VerificationStatus::Verified.is_terminal());
        assert!(VerificationStatus::Partial.is_terminal());
        assert!(VerificationStatus::Incomplete.is_terminal());
    }

    #[test]
    fn serde_names_match_storage_names() {
        let json = serde_json::to_string(&TransactionKind::StreakAward).unwrap();
        assert_eq!(json, "\"streak_award\"");
        let parsed: VerificationStatus = serde_json::from_str("\"partial\"").unwrap();
        assert_eq!(parsed, VerificationStatus::Partial);
    }
}
