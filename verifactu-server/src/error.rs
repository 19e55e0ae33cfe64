//! Verifactu 业务错误
//!
//! [`VerifactuError`] 覆盖发票链、签名和提交的所有失败路径，
//! 在 API 边界通过 `From` 转换为 [`AppError`]。
//! 二维码渲染失败是独立的 [`crate::qr::RenderError`]，不属于业务错误。

use shared::error::{AppError, ErrorCode};
use thiserror::Error;

/// Canonical field that failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputField {
    OrgId,
    IssuerTaxId,
    IssuerName,
    RecipientTaxId,
    InvoiceNumber,
    /// (org, series, number) already chained
    DuplicateNumber,
    IssueDate,
    GeneratedAt,
    TaxAmount,
    TotalAmount,
    PreviousHash,
}

impl InputField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrgId => "org_id",
            Self::IssuerTaxId => "issuer_tax_id",
            Self::IssuerName => "issuer_name",
            Self::RecipientTaxId => "recipient_tax_id",
            Self::InvoiceNumber => "invoice_number",
            Self::DuplicateNumber => "invoice_number",
            Self::IssueDate => "issue_date",
            Self::GeneratedAt => "generated_at",
            Self::TaxAmount => "tax_amount",
            Self::TotalAmount => "total_amount",
            Self::PreviousHash => "previous_hash",
        }
    }

    fn error_code(&self) -> ErrorCode {
        match self {
            Self::IssuerTaxId | Self::RecipientTaxId => ErrorCode::InvoiceInvalidTaxId,
            Self::DuplicateNumber => ErrorCode::InvoiceDuplicateNumber,
            Self::IssueDate | Self::GeneratedAt => ErrorCode::InvoiceInvalidDate,
            Self::TaxAmount | Self::TotalAmount => ErrorCode::InvoiceInvalidAmount,
            _ => ErrorCode::ValidationFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum VerifactuError {
    #[error("Invalid {}: {reason}", field.as_str())]
    InvalidInput { field: InputField, reason: String },

    #[error("Signing certificate {fingerprint} expired at {expires_at}")]
    CertificateExpired { fingerprint: String, expires_at: i64 },

    #[error("Signing certificate {fingerprint} not valid before {not_before}")]
    CertificateNotYetValid { fingerprint: String, not_before: i64 },

    /// Unreadable or malformed certificate material
    #[error("Invalid signing certificate: {0}")]
    CertificateInvalid(String),

    #[error("No signing certificate configured for {0}")]
    CertificateMissing(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    /// Tail moved between read and commit (concurrent finalization)
    #[error("Chain conflict: {0}")]
    ChainConflict(String),

    /// Stored chain no longer verifies
    #[error("Chain integrity broken: {0}")]
    ChainIntegrity(String),

    #[error("Invoice {0} not found")]
    NotFound(i64),

    /// Authority answered with a retryable failure (5xx, 408, 429, unreadable body)
    #[error("Submission failed transiently: {0}")]
    SubmissionTransient(String),

    /// No HTTP exchange completed (connect error or timeout)
    #[error("Tax authority unreachable: {detail}")]
    AuthorityUnreachable { timed_out: bool, detail: String },

    #[error("Submission rejected [{code}]: {reason}")]
    SubmissionRejected { code: String, reason: String },

    #[error("Database error: {0}")]
    Database(String),
}

impl VerifactuError {
    pub fn invalid(field: InputField, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    /// Map a certificate-layer error, tagging validity errors with the certificate fingerprint
    pub fn from_cert(err: piano_cert::CertError, fingerprint: &str) -> Self {
        use piano_cert::CertError;
        match err {
            CertError::Expired { expires_at } => Self::CertificateExpired {
                fingerprint: fingerprint.to_string(),
                expires_at,
            },
            CertError::NotYetValid { not_before } => Self::CertificateNotYetValid {
                fingerprint: fingerprint.to_string(),
                not_before,
            },
            CertError::SigningFailed(msg) => Self::Signing(msg),
            CertError::VerificationFailed(msg) => {
                Self::Signing(format!("signature verification: {msg}"))
            }
            CertError::Rcgen(e) => Self::Signing(e.to_string()),
            other => Self::CertificateInvalid(other.to_string()),
        }
    }
}

pub type VerifactuResult<T> = Result<T, VerifactuError>;

impl From<piano_cert::CertError> for VerifactuError {
    fn from(err: piano_cert::CertError) -> Self {
        Self::from_cert(err, "")
    }
}

impl From<crate::db::repository::RepoError> for VerifactuError {
    fn from(err: crate::db::repository::RepoError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<VerifactuError> for AppError {
    fn from(err: VerifactuError) -> Self {
        let message = err.to_string();
        match err {
            VerifactuError::InvalidInput { field, .. } => {
                AppError::with_message(field.error_code(), message)
                    .with_detail("field", field.as_str())
            }
            VerifactuError::CertificateExpired {
                fingerprint,
                expires_at,
            } => AppError::with_message(ErrorCode::CertificateExpired, message)
                .with_detail("fingerprint", fingerprint)
                .with_detail("expires_at", expires_at),
            VerifactuError::CertificateNotYetValid {
                fingerprint,
                not_before,
            } => AppError::with_message(ErrorCode::CertificateInvalid, message)
                .with_detail("fingerprint", fingerprint)
                .with_detail("not_before", not_before),
            VerifactuError::CertificateInvalid(_) => {
                AppError::with_message(ErrorCode::CertificateInvalid, message)
            }
            VerifactuError::CertificateMissing(org_id) => AppError::certificate_missing(org_id),
            VerifactuError::Signing(_) => AppError::with_message(ErrorCode::SigningFailed, message),
            VerifactuError::ChainConflict(_) => {
                AppError::with_message(ErrorCode::ChainConflict, message)
            }
            VerifactuError::ChainIntegrity(_) => {
                AppError::with_message(ErrorCode::ChainIntegrityBroken, message)
            }
            VerifactuError::NotFound(id) => {
                AppError::with_message(ErrorCode::InvoiceNotFound, message)
                    .with_detail("invoice_id", id)
            }
            VerifactuError::SubmissionTransient(_) => {
                AppError::with_message(ErrorCode::SubmissionUnavailable, message)
            }
            VerifactuError::AuthorityUnreachable { timed_out: true, .. } => {
                AppError::with_message(ErrorCode::TimeoutError, message)
            }
            VerifactuError::AuthorityUnreachable { .. } => {
                AppError::with_message(ErrorCode::NetworkError, message)
            }
            VerifactuError::SubmissionRejected { code, reason } => {
                AppError::with_message(ErrorCode::SubmissionRejected, message)
                    .with_detail("authority_code", code)
                    .with_detail("authority_reason", reason)
            }
            VerifactuError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                AppError::database(msg)
            }
        }
    }
}
