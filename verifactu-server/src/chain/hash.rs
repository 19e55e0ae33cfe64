//! 哈希链计算与验证
//!
//! - [`compute_chain_hash`]: 纯函数，SHA-256 (大写 hex)
//! - [`verify_chain`]: 重新计算整条链，报告第一个断点，不做修复

use super::canonical::CanonicalFields;
use crate::error::{InputField, VerifactuError, VerifactuResult};
use sha2::{Digest, Sha256};
use shared::models::{BreakKind, ChainBreak, ChainVerification, InvoiceRecord};

/// `previous_hash` of the first record of every organization
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// SHA-256 over the canonical fields linked to `previous_hash`
///
/// `None` means the record is the first of its organization.
pub fn compute_chain_hash(
    fields: &CanonicalFields,
    previous_hash: Option<&str>,
) -> VerifactuResult<String> {
    let previous = normalize_previous(previous_hash)?;
    let mut hasher = Sha256::new();
    hasher.update(fields.hash_input(&previous).as_bytes());
    Ok(hex::encode_upper(hasher.finalize()))
}

/// Hash a stored record from its own canonical columns
pub fn compute_record_hash(
    record: &InvoiceRecord,
    previous_hash: Option<&str>,
) -> VerifactuResult<String> {
    compute_chain_hash(&CanonicalFields::from_record(record)?, previous_hash)
}

fn normalize_previous(previous_hash: Option<&str>) -> VerifactuResult<String> {
    match previous_hash {
        None => Ok(GENESIS_HASH.to_string()),
        Some(h) if h.len() == 64 && h.bytes().all(|b| b.is_ascii_hexdigit()) => {
            Ok(h.to_ascii_uppercase())
        }
        Some(h) => Err(VerifactuError::invalid(
            InputField::PreviousHash,
            format!("'{h}' is not a SHA-256 hex digest"),
        )),
    }
}

pub fn hashes_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Walk one organization's records in chain order
///
/// Record `i` is valid when its `previous_hash` points at record `i-1`'s
/// stored hash (genesis for `i == 0`) and its stored hash recomputes.
/// Records after a break are still checked against their stored
/// predecessor but the chain stays reported as broken from the first one.
pub fn verify_chain(records: &[InvoiceRecord]) -> ChainVerification {
    let mut expected_previous: Option<&str> = None;

    for (index, record) in records.iter().enumerate() {
        let link_ok = match (expected_previous, record.previous_hash.as_deref()) {
            (None, None) => true,
            (None, Some(p)) => hashes_equal(p, GENESIS_HASH),
            (Some(e), Some(p)) => hashes_equal(e, p),
            (Some(_), None) => false,
        };
        if !link_ok {
            return ChainVerification::broken(
                records.len(),
                ChainBreak {
                    index,
                    invoice_id: record.id,
                    kind: BreakKind::LinkMismatch,
                    expected: expected_previous.unwrap_or(GENESIS_HASH).to_string(),
                    actual: record
                        .previous_hash
                        .clone()
                        .unwrap_or_else(|| GENESIS_HASH.to_string()),
                },
            );
        }

        match compute_record_hash(record, record.previous_hash.as_deref()) {
            Ok(recomputed) if hashes_equal(&recomputed, &record.current_hash) => {}
            Ok(recomputed) => {
                return ChainVerification::broken(
                    records.len(),
                    ChainBreak {
                        index,
                        invoice_id: record.id,
                        kind: BreakKind::HashMismatch,
                        expected: recomputed,
                        actual: record.current_hash.clone(),
                    },
                );
            }
            Err(e) => {
                return ChainVerification::broken(
                    records.len(),
                    ChainBreak {
                        index,
                        invoice_id: record.id,
                        kind: BreakKind::MalformedRecord,
                        expected: String::new(),
                        actual: e.to_string(),
                    },
                );
            }
        }

        expected_previous = Some(&record.current_hash);
    }

    ChainVerification::intact(records.len())
}

/// Turn a broken report into [`VerifactuError::ChainIntegrity`]
pub fn ensure_intact(report: ChainVerification) -> VerifactuResult<ChainVerification> {
    if report.valid {
        return Ok(report);
    }
    let detail = match &report.first_break {
        Some(b) => format!(
            "{:?} at index {} (invoice {}): expected {}, found {}",
            b.kind, b.index, b.invoice_id, b.expected, b.actual
        ),
        None => format!("{} records checked", report.length),
    };
    Err(VerifactuError::ChainIntegrity(detail))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared::models::{InvoiceType, SubmissionStatus};

    pub(crate) fn record(number: &str, total: &str, previous: Option<&str>) -> InvoiceRecord {
        let mut r = InvoiceRecord {
            id: 0,
            org_id: "org-a".into(),
            chain_index: 0,
            issuer_tax_id: "B12345678".into(),
            issuer_name: "Pianos SL".into(),
            series: "A-".into(),
            number: number.into(),
            issue_date: "2024-03-01".into(),
            invoice_type: InvoiceType::F1,
            tax_amount: "0.00".into(),
            total_amount: total.into(),
            recipient_tax_id: None,
            recipient_name: None,
            description: None,
            generated_at: "2024-03-01T10:00:00+01:00".into(),
            previous_hash: previous.map(str::to_string),
            current_hash: String::new(),
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
            created_at: 0,
        };
        r.current_hash = compute_record_hash(&r, previous).unwrap();
        r
    }

    /// Chain of `totals.len()` records linked from genesis
    pub(crate) fn chain(totals: &[&str]) -> Vec<InvoiceRecord> {
        let mut out: Vec<InvoiceRecord> = Vec::new();
        for (i, total) in totals.iter().enumerate() {
            let previous = out.last().map(|r| r.current_hash.clone());
            let mut r = record(&format!("{:04}", i + 1), total, previous.as_deref());
            r.id = i as i64 + 1;
            r.chain_index = i as i64;
            out.push(r);
        }
        out
    }

    #[test]
    fn test_hash_is_deterministic_uppercase_hex() {
        let r = record("0001", "100.00", None);
        let again = compute_record_hash(&r, None).unwrap();
        assert_eq!(r.current_hash, again);
        assert_eq!(r.current_hash.len(), 64);
        assert!(r.current_hash.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
    }

    #[test]
    fn test_genesis_matches_explicit_zeroes() {
        let r = record("0001", "100.00", None);
        assert_eq!(
            compute_record_hash(&r, Some(GENESIS_HASH)).unwrap(),
            r.current_hash
        );
    }

    #[test]
    fn test_hash_matches_reference_digest() {
        let r = record("0001", "100.00", None);
        let input = "IDEmisorFactura=B12345678&NumSerieFactura=A-0001&FechaExpedicionFactura=01-03-2024&TipoFactura=F1&CuotaTotal=0.00&ImporteTotal=100.00&Huella=0000000000000000000000000000000000000000000000000000000000000000&FechaHoraHusoGenRegistro=2024-03-01T10:00:00+01:00";
        let expected = hex::encode_upper(Sha256::digest(input.as_bytes()));
        assert_eq!(r.current_hash, expected);
    }

    #[test]
    fn test_previous_hash_changes_digest() {
        let a = record("0001", "100.00", None);
        let b = record("0001", "100.00", Some(&a.current_hash));
        assert_ne!(a.current_hash, b.current_hash);
    }

    #[test]
    fn test_rejects_malformed_previous_hash() {
        let r = record("0001", "100.00", None);
        assert!(matches!(
            compute_record_hash(&r, Some("not-a-hash")),
            Err(VerifactuError::InvalidInput {
                field: InputField::PreviousHash,
                ..
            })
        ));
    }

    #[test]
    fn test_verify_intact_chain() {
        let records = chain(&["100.00", "50.00", "75.25"]);
        let report = verify_chain(&records);
        assert!(report.valid);
        assert_eq!(report.length, 3);
        assert!(verify_chain(&[]).valid);
    }

    #[test]
    fn test_lowercase_stored_hash_still_verifies() {
        let mut records = chain(&["100.00", "50.00"]);
        records[0].current_hash = records[0].current_hash.to_ascii_lowercase();
        records[1].previous_hash = Some(records[0].current_hash.clone());
        assert!(verify_chain(&records).valid);
    }

    #[test]
    fn test_tamper_first_record_breaks_at_zero() {
        let mut records = chain(&["100.00", "50.00"]);
        records[0].total_amount = "200.00".into();

        let report = verify_chain(&records);
        assert!(!report.valid);
        assert_eq!(report.break_index(), Some(0));
        assert_eq!(report.first_break.unwrap().kind, BreakKind::HashMismatch);

        // later records still verify against their stored predecessor
        let tail = verify_chain(&records[1..]);
        assert_eq!(tail.first_break.map(|b| b.kind), Some(BreakKind::LinkMismatch));
        assert_eq!(
            compute_record_hash(&records[1], records[1].previous_hash.as_deref()).unwrap(),
            records[1].current_hash
        );
    }

    #[test]
    fn test_tamper_middle_record_breaks_at_index() {
        let mut records = chain(&["10.00", "20.00", "30.00", "40.00"]);
        records[2].issue_date = "2024-02-29".into();
        assert_eq!(verify_chain(&records).break_index(), Some(2));
    }

    #[test]
    fn test_deleted_record_is_link_mismatch() {
        let mut records = chain(&["10.00", "20.00", "30.00"]);
        records.remove(1);
        let report = verify_chain(&records);
        assert_eq!(report.break_index(), Some(1));
        assert_eq!(report.first_break.unwrap().kind, BreakKind::LinkMismatch);
    }

    #[test]
    fn test_ensure_intact() {
        let mut records = chain(&["10.00", "20.00"]);
        assert_eq!(ensure_intact(verify_chain(&records)).unwrap().length, 2);

        records[1].total_amount = "21.00".into();
        let err = ensure_intact(verify_chain(&records)).unwrap_err();
        assert!(matches!(err, VerifactuError::ChainIntegrity(ref d) if d.starts_with("HashMismatch at index 1")));
    }

    #[test]
    fn test_reordered_records_break() {
        let mut records = chain(&["10.00", "20.00", "30.00"]);
        records.swap(1, 2);
        assert_eq!(verify_chain(&records).break_index(), Some(1));
    }

    #[test]
    fn test_malformed_record_reported() {
        let mut records = chain(&["10.00", "20.00"]);
        records[1].total_amount = "abc".into();
        let report = verify_chain(&records);
        assert_eq!(report.break_index(), Some(1));
        assert_eq!(report.first_break.unwrap().kind, BreakKind::MalformedRecord);
    }
}
