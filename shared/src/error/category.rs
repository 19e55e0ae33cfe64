//! Error category classification

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

/// Error category classification based on error code ranges
///
/// Categories are determined by the leading digit of the error code:
/// - 0xxx: General errors
/// - 3xxx: Certificate errors
/// - 4xxx: Invoice errors
/// - 5xxx: Chain errors
/// - 6xxx: Submission errors
/// - 9xxx: System errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// General errors (0xxx)
    General,
    /// Certificate / signing errors (3xxx)
    Certificate,
    /// Invoice errors (4xxx)
    Invoice,
    /// Chain errors (5xxx)
    Chain,
    /// Submission errors (6xxx)
    Submission,
    /// System errors (9xxx and unassigned ranges)
    System,
}

impl ErrorCategory {
    /// Determine category from error code value
    pub fn from_code(code: u16) -> Self {
        match code {
            0..1000 => Self::General,
            3000..4000 => Self::Certificate,
            4000..5000 => Self::Invoice,
            5000..6000 => Self::Chain,
            6000..7000 => Self::Submission,
            _ => Self::System,
        }
    }

    /// Get the string name for this category
    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Certificate => "certificate",
            Self::Invoice => "invoice",
            Self::Chain => "chain",
            Self::Submission => "submission",
            Self::System => "system",
        }
    }
}

impl ErrorCode {
    /// Get the category for this error code
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }
}
