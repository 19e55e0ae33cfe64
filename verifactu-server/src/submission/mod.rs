//! AEAT 提交
//!
//! - [`xml`]: SOAP 报文构建、XMLDSig 封装签名与响应解析
//! - [`client`]: [`AuthorityClient`] 接口及 reqwest 实现
//! - [`retry`]: 瞬时失败的指数退避
//! - [`service`]: 单张发票的提交流程 (去重、尝试日志、终态更新)
//! - [`worker`]: 后台提交队列

pub mod client;
pub mod retry;
pub mod service;
pub mod worker;
pub mod xml;

pub use client::{AeatHttpClient, AuthorityClient};
pub use service::StatusCheck;
pub use service::SubmissionService;
pub use worker::{SubmissionQueue, SubmissionWorker};

use crate::error::VerifactuError;
use thiserror::Error;

/// Header carrying the dedup key (record hash)
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// One outbound filing
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub invoice_id: i64,
    pub org_id: String,
    /// Record hash; identical across retries of the same record
    pub dedup_key: String,
    /// SOAP envelope
    pub body: String,
    /// Client certificate for mTLS
    pub identity: Option<ClientIdentity>,
}

/// Organization certificate used as TLS client identity
#[derive(Clone)]
pub struct ClientIdentity {
    pub fingerprint: String,
    /// Certificate chain followed by the private key
    pub pem: String,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// `ConsultaFactura` lookup of one record by its IDFactura
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub invoice_id: i64,
    pub org_id: String,
    /// SOAP envelope
    pub body: String,
    pub identity: Option<ClientIdentity>,
}

/// What the authority holds for a queried record
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RegistrationStatus {
    Registered {
        csv: Option<String>,
        with_errors: bool,
    },
    NotRegistered,
}

/// Terminal acceptance from the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityResponse {
    /// Código Seguro de Verificación
    pub csv: Option<String>,
    /// HTTP status of the accepting exchange
    pub http_status: u16,
    /// Accepted with warnings (AceptadoConErrores)
    pub with_errors: bool,
    /// Record was already registered by an earlier attempt
    pub duplicate: bool,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    /// Outcome unknown (5xx, 408, 429, unreadable reply); retry with the same key
    #[error("transient failure (status {status:?}): {detail}")]
    Transient { status: Option<u16>, detail: String },

    /// No response at all (connect error or timeout); retry with the same key
    #[error("authority unreachable: {detail}")]
    Unreachable { timed_out: bool, detail: String },

    /// Terminal rejection; never retried
    #[error("rejected (status {status:?}) [{code}]: {reason}")]
    Rejected {
        status: Option<u16>,
        code: String,
        reason: String,
    },
}

impl SubmissionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Unreachable { .. })
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Rejected { status, .. } => *status,
            Self::Unreachable { .. } => None,
        }
    }
}

impl From<SubmissionError> for VerifactuError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Transient { detail, .. } => VerifactuError::SubmissionTransient(detail),
            SubmissionError::Unreachable { timed_out, detail } => {
                VerifactuError::AuthorityUnreachable { timed_out, detail }
            }
            SubmissionError::Rejected { code, reason, .. } => {
                VerifactuError::SubmissionRejected { code, reason }
            }
        }
    }
}
