//! 单张发票的提交流程
//!
//! `pending | error → submitted → accepted | rejected | error`
//!
//! - 终态记录不会再次发送 (去重)
//! - `mark_submitted` 是条件更新，同一记录同时只有一个提交者
//! - 每次尝试都写入 `submission_attempt`
//! - 每轮提交恰好落一次终态 (条件更新)
//! - `error` 记录重发前先查询 AEAT，已登记的直接对账为 `accepted`

use super::client::AuthorityClient;
use super::retry::RetryPolicy;
use super::{
    AuthorityResponse, ClientIdentity, QueryRequest, RegistrationStatus, SubmissionError,
    SubmissionRequest, xml,
};
use crate::core::config::SoftwareInfo;
use crate::db::repository::{invoice, submission_attempt};
use crate::error::{VerifactuError, VerifactuResult};
use crate::signing::CertificateStore;
use serde::Serialize;
use shared::models::{InvoiceRecord, SubmissionStatus};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Attempts after which the sweep leaves a record alone
pub const DEFAULT_MAX_SWEEP_ATTEMPTS: i64 = 30;

#[derive(Clone)]
pub struct SubmissionService {
    pool: SqlitePool,
    client: Arc<dyn AuthorityClient>,
    certs: Arc<CertificateStore>,
    software: SoftwareInfo,
    policy: RetryPolicy,
    max_sweep_attempts: i64,
}

/// Result of a `ConsultaFactura` round trip
#[derive(Debug, Clone, Serialize)]
pub struct StatusCheck {
    pub registration: RegistrationStatus,
    /// Local status moved to `accepted` by this check
    pub reconciled: bool,
    pub record: InvoiceRecord,
}

impl SubmissionService {
    pub fn new(
        pool: SqlitePool,
        client: Arc<dyn AuthorityClient>,
        certs: Arc<CertificateStore>,
        software: SoftwareInfo,
    ) -> Self {
        Self {
            pool,
            client,
            certs,
            software,
            policy: RetryPolicy::default(),
            max_sweep_attempts: DEFAULT_MAX_SWEEP_ATTEMPTS,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sweep_attempt_cap(mut self, max_attempts: i64) -> Self {
        self.max_sweep_attempts = max_attempts.max(1);
        self
    }

    /// Submit one record and persist the outcome
    ///
    /// Records that are terminal or already in flight are returned unchanged
    /// without contacting the authority. A rejection is persisted first and then
    /// returned as [`VerifactuError::SubmissionRejected`]; exhausted retries leave
    /// the record in `error` and return [`VerifactuError::SubmissionTransient`].
    pub async fn submit(&self, invoice_id: i64) -> VerifactuResult<InvoiceRecord> {
        let record = self.load(invoice_id).await?;
        if !record.submission_status.needs_submission() {
            tracing::debug!(
                invoice_id,
                status = %record.submission_status,
                "Submission skipped"
            );
            return Ok(record);
        }

        if !invoice::mark_submitted(&self.pool, invoice_id).await? {
            // another submitter won the transition
            return self.load(invoice_id).await;
        }

        let request = match self.build_request(&record).await {
            Ok(request) => request,
            Err(e) => {
                invoice::resolve_error(&self.pool, invoice_id).await?;
                return Err(e);
            }
        };

        let result = self.submit_with_retry(&request, record.attempts).await;
        self.resolve(&record, result).await
    }

    /// Submission request for a stored record
    pub async fn build_request(&self, record: &InvoiceRecord) -> VerifactuResult<SubmissionRequest> {
        let body = xml::build_registro_alta(record, &self.software)?;
        let body = self.sign_body(&record.org_id, body, xml::REGISTRO_ALTA).await;
        Ok(SubmissionRequest {
            invoice_id: record.id,
            org_id: record.org_id.clone(),
            dedup_key: record.current_hash.to_ascii_uppercase(),
            body,
            identity: self.identity_for(&record.org_id),
        })
    }

    /// `ConsultaFactura` request for a stored record
    pub async fn build_query(&self, record: &InvoiceRecord) -> VerifactuResult<QueryRequest> {
        let body = xml::build_consulta_factura(record)?;
        let body = self.sign_body(&record.org_id, body, xml::CONSULTA_FACTURA).await;
        Ok(QueryRequest {
            invoice_id: record.id,
            org_id: record.org_id.clone(),
            body,
            identity: self.identity_for(&record.org_id),
        })
    }

    /// Enveloped XMLDSig with the organization certificate; unsigned without one
    async fn sign_body(&self, org_id: &str, body: String, element: &str) -> String {
        let cert = match self.certs.find(org_id) {
            Ok(Some(cert)) => cert,
            Ok(None) => return body,
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "Sending unsigned envelope");
                return body;
            }
        };
        match xml::sign_envelope(&body, element, cert.as_ref()).await {
            Ok(signed) => signed,
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "Envelope signing failed, sending unsigned");
                body
            }
        }
    }

    fn identity_for(&self, org_id: &str) -> Option<ClientIdentity> {
        match self.certs.find(org_id) {
            Ok(Some(cert)) => cert.identity_pem().map(|pem| ClientIdentity {
                fingerprint: cert.fingerprint().to_string(),
                pem,
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "Submitting without client certificate");
                None
            }
        }
    }

    async fn submit_with_retry(
        &self,
        request: &SubmissionRequest,
        previous_attempts: i64,
    ) -> Result<AuthorityResponse, SubmissionError> {
        let mut attempt = 0;
        loop {
            let result = self.client.submit(request).await;
            self.log_attempt(request.invoice_id, previous_attempts + i64::from(attempt) + 1, &result)
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if !self.policy.has_next(attempt) {
                        return Err(e);
                    }
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        invoice_id = request.invoice_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Submission failed, retrying..."
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn log_attempt(
        &self,
        invoice_id: i64,
        attempt: i64,
        result: &Result<AuthorityResponse, SubmissionError>,
    ) {
        let (outcome, status, detail) = match result {
            Ok(resp) if resp.duplicate => ("duplicate", Some(resp.http_status), resp.csv.clone()),
            Ok(resp) => ("accepted", Some(resp.http_status), resp.csv.clone()),
            Err(e @ SubmissionError::Rejected { .. }) => ("rejected", e.http_status(), Some(e.to_string())),
            Err(e) => ("transient", e.http_status(), Some(e.to_string())),
        };

        if let Err(e) = invoice::increment_attempts(&self.pool, invoice_id).await {
            tracing::error!(invoice_id, error = %e, "Failed to count submission attempt");
        }
        if let Err(e) = submission_attempt::insert(
            &self.pool,
            invoice_id,
            attempt,
            outcome,
            status,
            detail.as_deref(),
        )
        .await
        {
            tracing::error!(invoice_id, error = %e, "Failed to record submission attempt");
        }
    }

    async fn resolve(
        &self,
        record: &InvoiceRecord,
        result: Result<AuthorityResponse, SubmissionError>,
    ) -> VerifactuResult<InvoiceRecord> {
        let id = record.id;
        match result {
            Ok(response) => {
                let applied =
                    invoice::resolve_accepted(&self.pool, id, response.csv.as_deref()).await?;
                tracing::info!(
                    invoice_id = id,
                    org_id = %record.org_id,
                    hash = %record.current_hash,
                    csv = ?response.csv,
                    duplicate = response.duplicate,
                    with_errors = response.with_errors,
                    applied,
                    "Record accepted by AEAT"
                );
                self.load(id).await
            }
            Err(SubmissionError::Rejected { code, reason, .. }) => {
                invoice::resolve_rejected(&self.pool, id, &code, &reason).await?;
                tracing::warn!(
                    invoice_id = id,
                    org_id = %record.org_id,
                    code = %code,
                    reason = %reason,
                    "Record rejected by AEAT"
                );
                Err(VerifactuError::SubmissionRejected { code, reason })
            }
            Err(e) => {
                invoice::resolve_error(&self.pool, id).await?;
                tracing::error!(
                    invoice_id = id,
                    org_id = %record.org_id,
                    error = %e,
                    "Submission retries exhausted"
                );
                Err(e.into())
            }
        }
    }

    /// Ask the authority whether it holds the record
    ///
    /// A `pending`/`error` record the authority already registered is moved to
    /// `accepted`; nothing else changes locally.
    pub async fn check(&self, invoice_id: i64) -> VerifactuResult<StatusCheck> {
        let record = self.load(invoice_id).await?;
        let request = self.build_query(&record).await?;
        let registration = self.client.query(&request).await?;

        let reconciled = match &registration {
            RegistrationStatus::Registered { csv, .. } => {
                invoice::reconcile_accepted(&self.pool, invoice_id, csv.as_deref()).await?
            }
            RegistrationStatus::NotRegistered => false,
        };
        tracing::info!(
            invoice_id,
            org_id = %record.org_id,
            registration = ?registration,
            reconciled,
            "Invoice status checked"
        );

        let record = if reconciled { self.load(invoice_id).await? } else { record };
        Ok(StatusCheck {
            registration,
            reconciled,
            record,
        })
    }

    async fn load(&self, invoice_id: i64) -> VerifactuResult<InvoiceRecord> {
        invoice::find_by_id(&self.pool, invoice_id)
            .await?
            .ok_or(VerifactuError::NotFound(invoice_id))
    }

    /// Submit every `pending`/`error` record under the attempt cap, oldest first
    ///
    /// Returns the number of records that reached `accepted`. Cancellation is
    /// observed between and during records; a record interrupted mid-flight
    /// stays `submitted` until [`invoice::reset_in_flight`] at next start.
    pub async fn sweep(&self, limit: i64, cancel: &CancellationToken) -> VerifactuResult<usize> {
        let exhausted = invoice::count_exhausted(&self.pool, self.max_sweep_attempts).await?;
        if exhausted > 0 {
            tracing::warn!(
                count = exhausted,
                max_attempts = self.max_sweep_attempts,
                "Records reached the submission attempt cap and need manual review"
            );
        }

        let ids =
            invoice::list_needing_submission(&self.pool, limit, self.max_sweep_attempts).await?;
        if ids.is_empty() {
            return Ok(0);
        }
        tracing::info!(count = ids.len(), "Processing submission backlog");

        let mut accepted = 0;
        for id in ids {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(accepted, "Submission sweep cancelled");
                    break;
                }
                outcome = self.sweep_one(id) => outcome,
            };
            match outcome {
                Ok(record) if record.submission_status == SubmissionStatus::Accepted => {
                    accepted += 1
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(invoice_id = id, error = %e, "Backlog submission failed"),
            }
        }
        Ok(accepted)
    }

    /// `error` records may have reached the authority; query before resending
    async fn sweep_one(&self, invoice_id: i64) -> VerifactuResult<InvoiceRecord> {
        let record = self.load(invoice_id).await?;
        if record.submission_status == SubmissionStatus::Error {
            match self.check(invoice_id).await {
                Ok(check) if check.reconciled => return Ok(check.record),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(invoice_id, error = %e, "Status check failed, resubmitting")
                }
            }
        }
        self.submit(invoice_id).await
    }
}
