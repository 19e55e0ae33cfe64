//! 规范化编码 (huella 输入)
//!
//! 字段顺序和字节格式一旦上线不可再改，否则历史链无法验证。
//!
//! ```text
//! IDEmisorFactura=..&NumSerieFactura=..&FechaExpedicionFactura=dd-mm-yyyy&TipoFactura=..
//! &CuotaTotal=0.00&ImporteTotal=0.00&Huella=<previous>&FechaHoraHusoGenRegistro=<generated_at>
//! ```

use crate::error::{InputField, VerifactuError, VerifactuResult};
use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use shared::models::{InvoiceDraft, InvoiceRecord, InvoiceType};
use std::str::FromStr;

/// NumSerieFactura 最大长度
pub const MAX_INVOICE_NUMBER_LEN: usize = 60;

/// Timestamp layout of `FechaHoraHusoGenRegistro`
pub const GENERATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Validated, normalized subset of an invoice that participates in hashing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalFields {
    pub issuer_tax_id: String,
    /// series + number
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub invoice_type: InvoiceType,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub generated_at: String,
}

impl CanonicalFields {
    /// Validate a draft before it enters the chain
    pub fn from_draft(draft: &InvoiceDraft, generated_at: &str) -> VerifactuResult<Self> {
        if let Some(recipient) = draft.recipient_tax_id.as_deref()
            && !recipient.trim().is_empty()
        {
            validate_tax_id(InputField::RecipientTaxId, recipient)?;
        }
        Self::parse(
            &draft.issuer_tax_id,
            &draft.series,
            &draft.number,
            &draft.issue_date,
            draft.invoice_type,
            &draft.tax_amount,
            &draft.total_amount,
            generated_at,
        )
    }

    /// Re-read the stored canonical columns of a chained record
    pub fn from_record(record: &InvoiceRecord) -> VerifactuResult<Self> {
        Self::parse(
            &record.issuer_tax_id,
            &record.series,
            &record.number,
            &record.issue_date,
            record.invoice_type,
            &record.tax_amount,
            &record.total_amount,
            &record.generated_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn parse(
        issuer_tax_id: &str,
        series: &str,
        number: &str,
        issue_date: &str,
        invoice_type: InvoiceType,
        tax_amount: &str,
        total_amount: &str,
        generated_at: &str,
    ) -> VerifactuResult<Self> {
        let issuer_tax_id = validate_tax_id(InputField::IssuerTaxId, issuer_tax_id)?;

        let number = number.trim();
        if number.is_empty() {
            return Err(VerifactuError::invalid(
                InputField::InvoiceNumber,
                "invoice number is empty",
            ));
        }
        let invoice_number = format!("{}{}", series.trim(), number);
        if invoice_number.chars().count() > MAX_INVOICE_NUMBER_LEN {
            return Err(VerifactuError::invalid(
                InputField::InvoiceNumber,
                format!("longer than {MAX_INVOICE_NUMBER_LEN} characters"),
            ));
        }

        let issue_date = NaiveDate::parse_from_str(issue_date.trim(), "%Y-%m-%d").map_err(|e| {
            VerifactuError::invalid(InputField::IssueDate, format!("'{issue_date}': {e}"))
        })?;

        let tax_amount = parse_amount(InputField::TaxAmount, tax_amount)?;
        let total_amount = parse_amount(InputField::TotalAmount, total_amount)?;

        let generated = DateTime::<FixedOffset>::parse_from_rfc3339(generated_at.trim())
            .map_err(|e| {
                VerifactuError::invalid(InputField::GeneratedAt, format!("'{generated_at}': {e}"))
            })?;
        if issue_date > generated.date_naive() {
            return Err(VerifactuError::invalid(
                InputField::IssueDate,
                format!("{issue_date} is after record generation"),
            ));
        }

        Ok(Self {
            issuer_tax_id,
            invoice_number,
            issue_date,
            invoice_type,
            tax_amount,
            total_amount,
            generated_at: generated.format(GENERATED_AT_FORMAT).to_string(),
        })
    }

    /// FechaExpedicionFactura (dd-mm-yyyy)
    pub fn issue_date_es(&self) -> String {
        self.issue_date.format("%d-%m-%Y").to_string()
    }

    /// ISO date as stored
    pub fn issue_date_iso(&self) -> String {
        self.issue_date.format("%Y-%m-%d").to_string()
    }

    pub fn tax_amount_str(&self) -> String {
        format_amount(self.tax_amount)
    }

    pub fn total_amount_str(&self) -> String {
        format_amount(self.total_amount)
    }

    /// Bytes fed to SHA-256
    pub fn hash_input(&self, previous_hash: &str) -> String {
        format!(
            "IDEmisorFactura={}&NumSerieFactura={}&FechaExpedicionFactura={}&TipoFactura={}&CuotaTotal={}&ImporteTotal={}&Huella={}&FechaHoraHusoGenRegistro={}",
            self.issuer_tax_id,
            self.invoice_number,
            self.issue_date_es(),
            self.invoice_type.as_str(),
            self.tax_amount_str(),
            self.total_amount_str(),
            previous_hash,
            self.generated_at,
        )
    }

    /// Bytes covered by the detached signature
    pub fn signing_input(&self, previous_hash: &str, current_hash: &str, qr_payload: &str) -> String {
        format!(
            "{}&HuellaActual={}&QR={}",
            self.hash_input(previous_hash),
            current_hash,
            qr_payload
        )
    }
}

/// Two fractional digits, no grouping
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

fn parse_amount(field: InputField, raw: &str) -> VerifactuResult<Decimal> {
    let value = Decimal::from_str(raw.trim())
        .map_err(|e| VerifactuError::invalid(field, format!("'{raw}': {e}")))?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(VerifactuError::invalid(field, format!("{raw} is negative")));
    }
    if value.normalize().scale() > 2 {
        return Err(VerifactuError::invalid(
            field,
            format!("{raw} has more than two decimals"),
        ));
    }
    // -0.00 hashes as 0.00
    Ok(if value.is_zero() { Decimal::ZERO } else { value })
}

/// NIF (8 digits + letter), NIE (X/Y/Z + 7 digits + letter) or CIF
/// (organization letter + 7 digits + control)
pub fn validate_tax_id(field: InputField, raw: &str) -> VerifactuResult<String> {
    let tax_id = raw.trim().to_ascii_uppercase();
    if is_well_formed_tax_id(&tax_id) {
        Ok(tax_id)
    } else {
        Err(VerifactuError::invalid(
            field,
            format!("'{raw}' is not a valid NIF/NIE/CIF"),
        ))
    }
}

fn is_well_formed_tax_id(tax_id: &str) -> bool {
    let bytes = tax_id.as_bytes();
    if bytes.len() != 9 {
        return false;
    }
    let (first, middle, last) = (bytes[0], &bytes[1..8], bytes[8]);
    if !middle.iter().all(u8::is_ascii_digit) {
        return false;
    }
    match first {
        // NIF
        b'0'..=b'9' => last.is_ascii_uppercase(),
        // NIE
        b'X' | b'Y' | b'Z' => last.is_ascii_uppercase(),
        // CIF
        b'A' | b'B' | b'C' | b'D' | b'E' | b'F' | b'G' | b'H' | b'J' | b'K' | b'L' | b'M'
        | b'N' | b'P' | b'Q' | b'R' | b'S' | b'U' | b'V' | b'W' => {
            last.is_ascii_digit() || (b'A'..=b'J').contains(&last)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> InvoiceDraft {
        InvoiceDraft {
            org_id: "org-1".into(),
            issuer_tax_id: "b12345678".into(),
            issuer_name: "Pianos SL".into(),
            series: "A-".into(),
            number: "0001".into(),
            issue_date: "2024-03-01".into(),
            invoice_type: InvoiceType::F1,
            tax_amount: "21".into(),
            total_amount: "121.5".into(),
            recipient_tax_id: None,
            recipient_name: None,
            description: None,
        }
    }

    const GENERATED_AT: &str = "2024-03-01T10:15:30+01:00";

    #[test]
    fn test_hash_input_layout() {
        let fields = CanonicalFields::from_draft(&draft(), GENERATED_AT).unwrap();
        assert_eq!(
            fields.hash_input("PREV"),
            "IDEmisorFactura=B12345678&NumSerieFactura=A-0001&FechaExpedicionFactura=01-03-2024&TipoFactura=F1&CuotaTotal=21.00&ImporteTotal=121.50&Huella=PREV&FechaHoraHusoGenRegistro=2024-03-01T10:15:30+01:00"
        );
    }

    #[test]
    fn test_signing_input_extends_hash_input() {
        let fields = CanonicalFields::from_draft(&draft(), GENERATED_AT).unwrap();
        let signing = fields.signing_input("PREV", "CUR", "https://qr");
        assert!(signing.starts_with(&fields.hash_input("PREV")));
        assert!(signing.ends_with("&HuellaActual=CUR&QR=https://qr"));
    }

    #[test]
    fn test_rejects_negative_total() {
        let mut d = draft();
        d.total_amount = "-1.00".into();
        let err = CanonicalFields::from_draft(&d, GENERATED_AT).unwrap_err();
        assert!(matches!(
            err,
            VerifactuError::InvalidInput {
                field: InputField::TotalAmount,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_total_is_allowed() {
        let mut d = draft();
        d.total_amount = "0".into();
        d.tax_amount = "-0.00".into();
        let fields = CanonicalFields::from_draft(&d, GENERATED_AT).unwrap();
        assert_eq!(fields.total_amount_str(), "0.00");
    }

    #[test]
    fn test_rejects_unparseable_date() {
        let mut d = draft();
        d.issue_date = "2024-02-30".into();
        assert!(matches!(
            CanonicalFields::from_draft(&d, GENERATED_AT),
            Err(VerifactuError::InvalidInput {
                field: InputField::IssueDate,
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_issue_date_after_generation() {
        let mut d = draft();
        d.issue_date = "2024-03-02".into();
        assert!(CanonicalFields::from_draft(&d, GENERATED_AT).is_err());
    }

    #[test]
    fn test_rejects_sub_cent_amounts() {
        let mut d = draft();
        d.total_amount = "10.005".into();
        assert!(CanonicalFields::from_draft(&d, GENERATED_AT).is_err());

        d.total_amount = "10.500".into();
        assert!(CanonicalFields::from_draft(&d, GENERATED_AT).is_ok());
    }

    #[test]
    fn test_rejects_empty_and_long_numbers() {
        let mut d = draft();
        d.number = "  ".into();
        assert!(CanonicalFields::from_draft(&d, GENERATED_AT).is_err());

        d.number = "9".repeat(59);
        assert!(CanonicalFields::from_draft(&d, GENERATED_AT).is_err());
    }

    #[test]
    fn test_rejects_bad_recipient() {
        let mut d = draft();
        d.recipient_tax_id = Some("12345".into());
        assert!(matches!(
            CanonicalFields::from_draft(&d, GENERATED_AT),
            Err(VerifactuError::InvalidInput {
                field: InputField::RecipientTaxId,
                ..
            })
        ));
    }

    #[test]
    fn test_tax_id_patterns() {
        for ok in ["12345678Z", "X1234567L", "B12345678", "Q2826000H"] {
            assert!(is_well_formed_tax_id(ok), "{ok}");
        }
        for bad in ["1234567Z", "I12345678", "B1234567Z", "X12345678", "123456789"] {
            assert!(!is_well_formed_tax_id(bad), "{bad}");
        }
    }

    #[test]
    fn test_generated_at_is_normalized() {
        let fields = CanonicalFields::from_draft(&draft(), "2024-03-01T09:15:30Z").unwrap();
        assert_eq!(fields.generated_at, "2024-03-01T09:15:30+00:00");
    }
}
