//! Chain State Model (哈希链状态)

use serde::{Deserialize, Serialize};

/// Per-organization chain tail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct ChainState {
    pub org_id: String,
    pub tail_hash: String,
    pub tail_invoice_id: Option<i64>,
    /// Number of records linked so far
    pub length: i64,
    pub updated_at: i64,
}

/// Kind of chain break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Stored hash differs from the recomputed one
    HashMismatch,
    /// previous_hash does not point at the prior record
    LinkMismatch,
    /// Canonical fields can no longer be parsed
    MalformedRecord,
}

/// First break found while walking a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Position in the verified sequence
    pub index: usize,
    pub invoice_id: i64,
    pub kind: BreakKind,
    pub expected: String,
    pub actual: String,
}

/// Chain verification report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    /// Number of records checked
    pub length: usize,
    pub first_break: Option<ChainBreak>,
}

impl ChainVerification {
    pub fn intact(length: usize) -> Self {
        Self {
            valid: true,
            length,
            first_break: None,
        }
    }

    pub fn broken(length: usize, at: ChainBreak) -> Self {
        Self {
            valid: false,
            length,
            first_break: Some(at),
        }
    }

    pub fn break_index(&self) -> Option<usize> {
        self.first_break.as_ref().map(|b| b.index)
    }
}
