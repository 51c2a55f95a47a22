//! Transfer Status Definitions
//!
//! Status IDs are designed for PostgreSQL storage as SMALLINT.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transfer lifecycle status
///
/// Terminal states: COMPLETED (1), FAILED (-1). The only legal transitions
/// are PENDING -> COMPLETED and PENDING -> FAILED; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Record created, ledger outcome not yet known
    Pending = 0,

    /// Terminal: ledger confirmed the transfer
    Completed = 1,

    /// Terminal: validation at the ledger, business rejection, or unavailability
    Failed = -1,
}

impl TransferStatus {
    /// Check if this is a terminal status (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    /// Get the numeric status ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL status ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferStatus::Pending),
            1 => Some(TransferStatus::Completed),
            -1 => Some(TransferStatus::Failed),
            _ => None,
        }
    }

    /// Get human-readable status name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_id_roundtrip() {
        let statuses = [
            TransferStatus::Pending,
            TransferStatus::Completed,
            TransferStatus::Failed,
        ];

        for status in statuses {
            let id = status.id();
            let recovered = TransferStatus::from_id(id).unwrap();
            assert_eq!(status, recovered);
        }
    }

    #[test]
    fn test_invalid_status_id() {
        assert!(TransferStatus::from_id(2).is_none());
        assert!(TransferStatus::from_id(-99).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferStatus::Pending.to_string(), "PENDING");
        assert_eq!(TransferStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(TransferStatus::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_serde_names_match_wire_format() {
        let json = serde_json::to_string(&TransferStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
        let back: TransferStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(back, TransferStatus::Failed);
    }
}
