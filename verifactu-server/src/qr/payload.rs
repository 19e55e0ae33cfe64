//! AEAT 校验 URL (二维码内容)
//!
//! `{base}?nif=..&numserie=..&fecha=dd-mm-yyyy&importe=x.xx&huella=..`

use crate::chain::canonical::{self, CanonicalFields, MAX_INVOICE_NUMBER_LEN};
use crate::error::{InputField, VerifactuError, VerifactuResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use shared::models::InvoiceRecord;
use std::str::FromStr;
use url::Url;

/// Shortest `huella` accepted from a scanned code
pub const MIN_SCANNED_HASH_LEN: usize = 32;

/// 二维码旁必须印刷的说明文字
pub const LEGEND: &str = "Factura verificable en la sede electrónica de la AEAT";

/// Short legend for narrow receipts
pub const SHORT_LEGEND: &str = "VERI*FACTU";

/// Decoded verification payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationPayload {
    pub url: String,
    pub nif: String,
    /// NumSerieFactura
    pub invoice_number: String,
    /// dd-mm-yyyy
    pub issue_date: String,
    /// ImporteTotal, two decimals
    pub amount: String,
    /// Record hash (huella), uppercase hex
    pub hash: String,
    pub legend: &'static str,
}

impl VerificationPayload {
    /// Cross-check a scanned payload against a stored record
    pub fn matches(&self, record: &InvoiceRecord) -> bool {
        let Ok(fields) = CanonicalFields::from_record(record) else {
            return false;
        };
        self.nif == fields.issuer_tax_id
            && self.invoice_number == fields.invoice_number
            && self.issue_date == fields.issue_date_es()
            && self.amount == fields.total_amount_str()
            && record
                .current_hash
                .to_ascii_uppercase()
                .starts_with(&self.hash.to_ascii_uppercase())
    }
}

/// Build the verification URL of a chained record
///
/// Pure: no network access, output depends only on the record and `base_url`.
pub fn build_verification_payload(
    record: &InvoiceRecord,
    base_url: &Url,
) -> VerifactuResult<VerificationPayload> {
    let fields = CanonicalFields::from_record(record)?;
    let hash = record_hash(&record.current_hash)?;

    let nif = fields.issuer_tax_id.clone();
    let issue_date = fields.issue_date_es();
    let amount = fields.total_amount_str();

    let mut url = base_url.clone();
    url.query_pairs_mut()
        .clear()
        .append_pair("nif", &nif)
        .append_pair("numserie", &fields.invoice_number)
        .append_pair("fecha", &issue_date)
        .append_pair("importe", &amount)
        .append_pair("huella", &hash);

    Ok(VerificationPayload {
        url: url.to_string(),
        nif,
        invoice_number: fields.invoice_number,
        issue_date,
        amount,
        hash,
        legend: LEGEND,
    })
}

fn record_hash(current_hash: &str) -> VerifactuResult<String> {
    let hash = current_hash.trim();
    if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(VerifactuError::invalid(
            InputField::PreviousHash,
            "record has no valid current hash",
        ));
    }
    Ok(hash.to_ascii_uppercase())
}

/// Validate a scanned verification URL
pub fn parse_verification_payload(raw: &str) -> VerifactuResult<VerificationPayload> {
    let url = Url::parse(raw.trim())
        .map_err(|e| VerifactuError::invalid(InputField::InvoiceNumber, format!("not a URL: {e}")))?;

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    };

    let nif = canonical::validate_tax_id(InputField::IssuerTaxId, &param("nif"))?;

    let invoice_number = param("numserie");
    if invoice_number.is_empty() || invoice_number.chars().count() > MAX_INVOICE_NUMBER_LEN {
        return Err(VerifactuError::invalid(
            InputField::InvoiceNumber,
            "numserie missing or too long",
        ));
    }

    let issue_date = param("fecha");
    NaiveDate::parse_from_str(&issue_date, "%d-%m-%Y").map_err(|e| {
        VerifactuError::invalid(InputField::IssueDate, format!("fecha '{issue_date}': {e}"))
    })?;

    let amount = param("importe");
    let value = Decimal::from_str(&amount).map_err(|e| {
        VerifactuError::invalid(InputField::TotalAmount, format!("importe '{amount}': {e}"))
    })?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(VerifactuError::invalid(
            InputField::TotalAmount,
            "importe is negative",
        ));
    }

    let hash = param("huella");
    if hash.len() < MIN_SCANNED_HASH_LEN
        || hash.len() > 64
        || !hash.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(VerifactuError::invalid(
            InputField::PreviousHash,
            "huella missing or malformed",
        ));
    }

    Ok(VerificationPayload {
        url: url.to_string(),
        nif,
        invoice_number,
        issue_date,
        amount: canonical::format_amount(value),
        hash: hash.to_ascii_uppercase(),
        legend: LEGEND,
    })
}
