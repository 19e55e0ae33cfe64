//! Unified error codes for the Verifactu integrity service
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 3xxx: Certificate / signing errors
//! - 4xxx: Invoice errors
//! - 5xxx: Chain errors
//! - 6xxx: Submission errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility (Rust, TypeScript, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Validation failed
    ValidationFailed = 2,

    // ==================== 3xxx: Certificate ====================
    /// Certificate is invalid
    CertificateInvalid = 3001,
    /// No signing certificate configured for the organization
    CertificateMissing = 3002,
    /// Signing certificate validity window has passed
    CertificateExpired = 3003,
    /// Cryptographic signing failed
    SigningFailed = 3004,

    // ==================== 4xxx: Invoice ====================
    /// Invoice not found
    InvoiceNotFound = 4001,
    /// Invoice number already used in this organization
    InvoiceDuplicateNumber = 4002,
    /// Issuer tax id is not a valid NIF/NIE/CIF
    InvoiceInvalidTaxId = 4003,
    /// Invoice amount is negative or malformed
    InvoiceInvalidAmount = 4004,
    /// Invoice issue date is malformed
    InvoiceInvalidDate = 4005,

    // ==================== 5xxx: Chain ====================
    /// Chain tail moved during finalization
    ChainConflict = 5001,
    /// Recomputed chain does not match stored hashes
    ChainIntegrityBroken = 5002,

    // ==================== 6xxx: Submission ====================
    /// Authority rejected the record
    SubmissionRejected = 6001,
    /// Authority unreachable or returned a transient failure
    SubmissionUnavailable = 6002,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Network error
    NetworkError = 9003,
    /// Operation timed out
    TimeoutError = 9004,
    /// Configuration error
    ConfigError = 9005,
    /// QR code rendering failed
    QrRenderFailed = 9101,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the default message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::ValidationFailed => "Validation failed",

            // Certificate
            ErrorCode::CertificateInvalid => "Certificate is invalid or not yet valid",
            ErrorCode::CertificateMissing => "No signing certificate configured",
            ErrorCode::CertificateExpired => "Signing certificate has expired",
            ErrorCode::SigningFailed => "Signing failed",

            // Invoice
            ErrorCode::InvoiceNotFound => "Invoice not found",
            ErrorCode::InvoiceDuplicateNumber => "Invoice number already exists",
            ErrorCode::InvoiceInvalidTaxId => "Invalid issuer tax id",
            ErrorCode::InvoiceInvalidAmount => "Invalid invoice amount",
            ErrorCode::InvoiceInvalidDate => "Invalid invoice date",

            // Chain
            ErrorCode::ChainConflict => "Invoice chain was modified concurrently",
            ErrorCode::ChainIntegrityBroken => "Invoice chain integrity check failed",

            // Submission
            ErrorCode::SubmissionRejected => "Record rejected by tax authority",
            ErrorCode::SubmissionUnavailable => "Tax authority unavailable",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::NetworkError => "Network error",
            ErrorCode::TimeoutError => "Operation timed out",
            ErrorCode::ConfigError => "Configuration error",
            ErrorCode::QrRenderFailed => "QR code rendering failed",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error returned when converting an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            2 => Ok(ErrorCode::ValidationFailed),

            // Certificate
            3001 => Ok(ErrorCode::CertificateInvalid),
            3002 => Ok(ErrorCode::CertificateMissing),
            3003 => Ok(ErrorCode::CertificateExpired),
            3004 => Ok(ErrorCode::SigningFailed),

            // Invoice
            4001 => Ok(ErrorCode::InvoiceNotFound),
            4002 => Ok(ErrorCode::InvoiceDuplicateNumber),
            4003 => Ok(ErrorCode::InvoiceInvalidTaxId),
            4004 => Ok(ErrorCode::InvoiceInvalidAmount),
            4005 => Ok(ErrorCode::InvoiceInvalidDate),

            // Chain
            5001 => Ok(ErrorCode::ChainConflict),
            5002 => Ok(ErrorCode::ChainIntegrityBroken),

            // Submission
            6001 => Ok(ErrorCode::SubmissionRejected),
            6002 => Ok(ErrorCode::SubmissionUnavailable),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::NetworkError),
            9004 => Ok(ErrorCode::TimeoutError),
            9005 => Ok(ErrorCode::ConfigError),
            9101 => Ok(ErrorCode::QrRenderFailed),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
