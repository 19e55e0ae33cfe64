//! 发票定稿
//!
//! 校验 → 组织锁 → 读链尾 → 哈希 → 二维码 → 签名 → 同一事务内写记录并 CAS 链尾
//! → 释放锁 → (可选) 投递提交队列。
//!
//! 提交前的任何错误都会回滚事务，不留下半链状态。

use crate::chain::canonical::{self, CanonicalFields, GENERATED_AT_FORMAT};
use crate::chain::{ChainBuilder, GENESIS_HASH, compute_chain_hash};
use crate::db::repository::invoice;
use crate::error::{InputField, VerifactuError, VerifactuResult};
use crate::qr::build_verification_payload;
use crate::signing::certificate::validate_org_id;
use crate::signing::{CertificateStore, sign_record};
use crate::submission::SubmissionQueue;
use piano_cert::SigningCertificate;
use shared::models::{
    ChainVerification, InvoiceDraft, InvoiceRecord, StatusSummary, SubmissionStatus,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use url::Url;

#[derive(Clone)]
pub struct InvoiceService {
    pool: SqlitePool,
    chain: Arc<ChainBuilder>,
    certs: Arc<CertificateStore>,
    qr_base_url: Url,
    /// Missing certificate blocks finalization
    signing_required: bool,
    queue: Option<SubmissionQueue>,
}

impl InvoiceService {
    pub fn new(
        pool: SqlitePool,
        chain: Arc<ChainBuilder>,
        certs: Arc<CertificateStore>,
        qr_base_url: Url,
        signing_required: bool,
    ) -> Self {
        Self {
            pool,
            chain,
            certs,
            qr_base_url,
            signing_required,
            queue: None,
        }
    }

    /// Enqueue every finalized record for submission
    pub fn with_auto_submit(mut self, queue: SubmissionQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Chain, sign and persist a draft
    pub async fn finalize(&self, draft: InvoiceDraft) -> VerifactuResult<InvoiceRecord> {
        let org_id = draft.org_id.trim().to_string();
        validate_org_id(&org_id)?;
        let issuer_name = draft.issuer_name.trim().to_string();
        if issuer_name.is_empty() {
            return Err(VerifactuError::invalid(
                InputField::IssuerName,
                "issuer name is empty",
            ));
        }

        let generated_at = chrono::Local::now().format(GENERATED_AT_FORMAT).to_string();
        let fields = CanonicalFields::from_draft(&draft, &generated_at)?;
        let cert = self.signing_certificate(&org_id, &fields)?;

        let series = draft.series.trim().to_string();
        let number = draft.number.trim().to_string();

        let mut append = self.chain.begin(&org_id).await?;
        if append.number_taken(&series, &number).await? {
            return Err(VerifactuError::invalid(
                InputField::DuplicateNumber,
                format!("{} already chained", fields.invoice_number),
            ));
        }

        let previous_hash = append.previous_hash().map(str::to_string);
        let current_hash = compute_chain_hash(&fields, previous_hash.as_deref())?;

        let recipient_tax_id = match non_empty(draft.recipient_tax_id) {
            Some(raw) => Some(canonical::validate_tax_id(InputField::RecipientTaxId, &raw)?),
            None => None,
        };

        let mut record = InvoiceRecord {
            id: shared::util::snowflake_id(),
            org_id: org_id.clone(),
            chain_index: append.next_index(),
            issuer_tax_id: fields.issuer_tax_id.clone(),
            issuer_name,
            series,
            number,
            issue_date: fields.issue_date_iso(),
            invoice_type: fields.invoice_type,
            tax_amount: fields.tax_amount_str(),
            total_amount: fields.total_amount_str(),
            recipient_tax_id,
            recipient_name: non_empty(draft.recipient_name),
            description: non_empty(draft.description),
            generated_at: fields.generated_at.clone(),
            previous_hash,
            current_hash,
            qr_payload: String::new(),
            signature: None,
            signature_fingerprint: None,
            submission_status: SubmissionStatus::Pending,
            attempts: 0,
            authority_csv: None,
            rejection_code: None,
            rejection_reason: None,
            submitted_at: None,
            resolved_at: None,
            created_at: shared::util::now_millis(),
        };

        record.qr_payload = build_verification_payload(&record, &self.qr_base_url)?.url;

        if let Some(cert) = cert {
            let signing_input = fields.signing_input(
                record.previous_hash.as_deref().unwrap_or(GENESIS_HASH),
                &record.current_hash,
                &record.qr_payload,
            );
            let signed = sign_record(&signing_input, cert.as_ref()).await?;
            record.signature = Some(signed.signature_b64);
            record.signature_fingerprint = Some(signed.fingerprint);
        }

        append.commit(&record).await?;

        tracing::info!(
            org_id = %record.org_id,
            invoice_id = record.id,
            number = %record.invoice_number(),
            hash = %record.current_hash,
            signed = record.signature.is_some(),
            "Invoice finalized"
        );

        if let Some(queue) = &self.queue {
            queue.enqueue(record.id);
        }
        Ok(record)
    }

    /// Certificate to sign with; expired certificates always block
    fn signing_certificate(
        &self,
        org_id: &str,
        fields: &CanonicalFields,
    ) -> VerifactuResult<Option<Arc<dyn SigningCertificate>>> {
        match self.certs.find(org_id)? {
            Some(cert) => {
                if let Some(cert_tax_id) = cert.tax_id()
                    && !cert_tax_id.eq_ignore_ascii_case(&fields.issuer_tax_id)
                {
                    tracing::warn!(
                        org_id = %org_id,
                        certificate_tax_id = %cert_tax_id,
                        issuer_tax_id = %fields.issuer_tax_id,
                        "Certificate tax id differs from issuer"
                    );
                }
                Ok(Some(cert))
            }
            None if self.signing_required => {
                Err(VerifactuError::CertificateMissing(org_id.to_string()))
            }
            None => {
                tracing::warn!(org_id = %org_id, "No signing certificate, record left unsigned");
                Ok(None)
            }
        }
    }

    pub async fn get(&self, invoice_id: i64) -> VerifactuResult<InvoiceRecord> {
        invoice::find_by_id(&self.pool, invoice_id)
            .await?
            .ok_or(VerifactuError::NotFound(invoice_id))
    }

    pub async fn verify_chain(&self, org_id: &str) -> VerifactuResult<ChainVerification> {
        validate_org_id(org_id)?;
        self.chain.verify_org(org_id).await
    }

    pub async fn status_summary(&self, org_id: &str) -> VerifactuResult<StatusSummary> {
        validate_org_id(org_id)?;
        Ok(invoice::status_summary(&self.pool, org_id).await?)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
