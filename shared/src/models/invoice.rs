//! Invoice Record Model (Verifactu 发票登记)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// AEAT invoice type (TipoFactura)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "UPPERCASE"))]
pub enum InvoiceType {
    /// Factura completa
    #[default]
    F1,
    /// Factura simplificada (ticket)
    F2,
    /// Rectificativa (art. 80.1, 80.2, 80.6 LIVA)
    R1,
    /// Rectificativa (art. 80.3)
    R2,
    /// Rectificativa (art. 80.4)
    R3,
    /// Rectificativa (resto)
    R4,
    /// Rectificativa de simplificada
    R5,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::F1 => "F1",
            Self::F2 => "F2",
            Self::R1 => "R1",
            Self::R2 => "R2",
            Self::R3 => "R3",
            Self::R4 => "R4",
            Self::R5 => "R5",
        }
    }

    pub fn is_rectification(&self) -> bool {
        matches!(self, Self::R1 | Self::R2 | Self::R3 | Self::R4 | Self::R5)
    }
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "F1" => Ok(Self::F1),
            "F2" => Ok(Self::F2),
            "R1" => Ok(Self::R1),
            "R2" => Ok(Self::R2),
            "R3" => Ok(Self::R3),
            "R4" => Ok(Self::R4),
            "R5" => Ok(Self::R5),
            other => Err(format!("unknown invoice type: {other}")),
        }
    }
}

/// Submission lifecycle of a chained record
///
/// `pending → submitted → accepted | rejected | error`.
/// `error` records are re-queued; `accepted` / `rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "lowercase"))]
pub enum SubmissionStatus {
    #[default]
    Pending,
    Submitted,
    Accepted,
    Rejected,
    Error,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }

    /// Terminal outcomes are never overwritten
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }

    /// Whether the submission worker should pick this record up
    pub fn needs_submission(&self) -> bool {
        matches!(self, Self::Pending | Self::Error)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice draft handed over by the finalization workflow
///
/// Amounts and dates travel as strings so malformed input is reported as a
/// validation error instead of a deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub org_id: String,
    /// NIF/CIF/NIE of the issuer
    pub issuer_tax_id: String,
    pub issuer_name: String,
    /// Series prefix, e.g. "A-"
    #[serde(default)]
    pub series: String,
    pub number: String,
    /// ISO date (YYYY-MM-DD)
    pub issue_date: String,
    #[serde(default)]
    pub invoice_type: InvoiceType,
    /// Total tax (CuotaTotal), decimal string
    #[serde(default = "zero_amount")]
    pub tax_amount: String,
    /// Total amount (ImporteTotal), decimal string
    pub total_amount: String,
    #[serde(default)]
    pub recipient_tax_id: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn zero_amount() -> String {
    "0.00".to_string()
}

/// Finalized, chain-linked invoice record
///
/// Canonical fields are stored in their normalized string form. After
/// chaining only the submission columns change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct InvoiceRecord {
    pub id: i64,
    pub org_id: String,
    /// 0-based position in the organization's chain
    pub chain_index: i64,
    pub issuer_tax_id: String,
    pub issuer_name: String,
    pub series: String,
    pub number: String,
    /// ISO date (YYYY-MM-DD)
    pub issue_date: String,
    pub invoice_type: InvoiceType,
    /// Two-decimal string
    pub tax_amount: String,
    /// Two-decimal string
    pub total_amount: String,
    pub recipient_tax_id: Option<String>,
    pub recipient_name: Option<String>,
    pub description: Option<String>,
    /// Record generation timestamp (RFC 3339, seconds, with offset)
    pub generated_at: String,
    /// None only for the first record of the organization
    pub previous_hash: Option<String>,
    pub current_hash: String,
    pub qr_payload: String,
    /// Base64 detached signature
    pub signature: Option<String>,
    pub signature_fingerprint: Option<String>,
    pub submission_status: SubmissionStatus,
    pub attempts: i64,
    /// Código Seguro de Verificación returned by AEAT
    pub authority_csv: Option<String>,
    pub rejection_code: Option<String>,
    pub rejection_reason: Option<String>,
    pub submitted_at: Option<i64>,
    pub resolved_at: Option<i64>,
    pub created_at: i64,
}

impl InvoiceRecord {
    /// NumSerieFactura: series prefix + number
    pub fn invoice_number(&self) -> String {
        format!("{}{}", self.series, self.number)
    }

    pub fn is_first_in_chain(&self) -> bool {
        self.previous_hash.is_none()
    }
}

/// One submission attempt (audit log)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct SubmissionAttempt {
    pub id: i64,
    pub invoice_id: i64,
    pub attempt: i64,
    /// accepted / rejected / transient
    pub outcome: String,
    pub http_status: Option<i64>,
    pub detail: Option<String>,
    pub created_at: i64,
}

/// Per-organization submission counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub pending: i64,
    pub submitted: i64,
    pub accepted: i64,
    pub rejected: i64,
    pub error: i64,
    pub total: i64,
}

impl StatusSummary {
    pub fn add(&mut self, status: SubmissionStatus, count: i64) {
        match status {
            SubmissionStatus::Pending => self.pending += count,
            SubmissionStatus::Submitted => self.submitted += count,
            SubmissionStatus::Accepted => self.accepted += count,
            SubmissionStatus::Rejected => self.rejected += count,
            SubmissionStatus::Error => self.error += count,
        }
        self.total += count;
    }
}
