//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Success
            Self::Success => StatusCode::OK,

            // 404 Not Found
            Self::InvoiceNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::InvoiceDuplicateNumber | Self::ChainConflict => StatusCode::CONFLICT,

            // 412 Precondition Failed (organization not ready to sign)
            Self::CertificateMissing | Self::CertificateExpired | Self::CertificateInvalid => {
                StatusCode::PRECONDITION_FAILED
            }

            // 422 Unprocessable (authority said no, or stored chain is broken)
            Self::SubmissionRejected | Self::ChainIntegrityBroken => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // 502 Bad Gateway (upstream authority failed)
            Self::SubmissionUnavailable => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable (transient errors, client can retry)
            Self::NetworkError | Self::TimeoutError => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            Self::InternalError
            | Self::DatabaseError
            | Self::ConfigError
            | Self::SigningFailed
            | Self::QrRenderFailed => StatusCode::INTERNAL_SERVER_ERROR,

            // 400 Bad Request (default for validation errors)
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
