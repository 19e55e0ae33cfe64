//! Finalization with organization certificates

mod common;

use async_trait::async_trait;
use common::{MockAuthority, draft, install_cert, setup, setup_with};
use piano_cert::{CertError, SignatureAlgorithm, SigningCertificate};
use std::sync::Arc;
use verifactu_server::GENESIS_HASH;
use verifactu_server::chain::CanonicalFields;
use verifactu_server::error::VerifactuError;
use verifactu_server::signing::verify_record_signature;

#[tokio::test]
async fn test_signed_record_verifies_against_certificate() {
    let env = setup(Arc::new(MockAuthority::accepting())).await;
    let cert_pem = install_cert(&env.state, "org-1", false);

    let first = env
        .state
        .invoices
        .finalize(draft("org-1", "0001", "121.00"))
        .await
        .unwrap();
    let second = env
        .state
        .invoices
        .finalize(draft("org-1", "0002", "50.00"))
        .await
        .unwrap();

    let info = env.state.certs.info("org-1").unwrap();
    for record in [&first, &second] {
        assert_eq!(record.signature_fingerprint.as_deref(), Some(info.fingerprint.as_str()));

        let fields = CanonicalFields::from_record(record).unwrap();
        let input = fields.signing_input(
            record.previous_hash.as_deref().unwrap_or(GENESIS_HASH),
            &record.current_hash,
            &record.qr_payload,
        );
        verify_record_signature(&cert_pem, &input, record.signature.as_deref().unwrap()).unwrap();
    }

    // signature covers the hash: a different hash must not verify
    let fields = CanonicalFields::from_record(&second).unwrap();
    let forged = fields.signing_input(GENESIS_HASH, &first.current_hash, &second.qr_payload);
    assert!(
        verify_record_signature(&cert_pem, &forged, second.signature.as_deref().unwrap()).is_err()
    );
}

#[tokio::test]
async fn test_expired_certificate_blocks_finalization() {
    let env = setup(Arc::new(MockAuthority::accepting())).await;
    install_cert(&env.state, "org-1", true);

    let err = env
        .state
        .invoices
        .finalize(draft("org-1", "0001", "10"))
        .await
        .unwrap_err();
    assert!(matches!(err, VerifactuError::CertificateExpired { .. }));

    let report = env.state.invoices.verify_chain("org-1").await.unwrap();
    assert_eq!(report.length, 0);
    assert!(report.valid);

    let info = env.state.certs.info("org-1").unwrap();
    assert!(info.expired);
    assert!(!info.near_expiry);
}

#[tokio::test]
async fn test_missing_certificate_blocks_when_signing_required() {
    let env = setup_with(Arc::new(MockAuthority::accepting()), |config| {
        config.signing_required = true;
    })
    .await;

    let err = env
        .state
        .invoices
        .finalize(draft("org-1", "0001", "10"))
        .await
        .unwrap_err();
    assert!(matches!(err, VerifactuError::CertificateMissing(org) if org == "org-1"));
}

#[tokio::test]
async fn test_rotated_certificate_is_picked_up_after_invalidation() {
    let env = setup(Arc::new(MockAuthority::accepting())).await;
    install_cert(&env.state, "org-1", false);
    let before = env.state.certs.info("org-1").unwrap().fingerprint;

    install_cert(&env.state, "org-1", false);
    let after = env.state.certs.info("org-1").unwrap().fingerprint;
    assert_ne!(before, after);

    let record = env
        .state
        .invoices
        .finalize(draft("org-1", "0001", "10"))
        .await
        .unwrap();
    assert_eq!(record.signature_fingerprint.as_deref(), Some(after.as_str()));
}

/// Valid certificate whose key is no longer reachable
struct UnreachableKey;

#[async_trait]
impl SigningCertificate for UnreachableKey {
    async fn sign(&self, _data: &[u8]) -> piano_cert::Result<Vec<u8>> {
        Err(CertError::SigningFailed("hsm gone".into()))
    }
    fn fingerprint(&self) -> &str {
        "00ff"
    }
    fn not_before(&self) -> i64 {
        0
    }
    fn expires_at(&self) -> i64 {
        i64::MAX
    }
    fn tax_id(&self) -> Option<&str> {
        Some(common::ISSUER_TAX_ID)
    }
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::EcdsaP256Sha256
    }
}

#[tokio::test]
async fn test_signing_failure_leaves_no_half_chained_record() {
    let env = setup_with(Arc::new(MockAuthority::accepting()), |config| {
        config.signing_required = true
    })
    .await;
    env.state.certs.insert("org-1", Arc::new(UnreachableKey));

    let err = env
        .state
        .invoices
        .finalize(draft("org-1", "0001", "10"))
        .await
        .unwrap_err();
    assert!(matches!(err, VerifactuError::Signing(ref msg) if msg == "hsm gone"));
    assert_eq!(err.to_string(), "Signing failed: hsm gone");

    let report = env.state.invoices.verify_chain("org-1").await.unwrap();
    assert_eq!(report.length, 0);
    assert!(report.valid);

    // key back: the retry starts the chain as if the failure never happened
    env.state.certs.invalidate("org-1");
    install_cert(&env.state, "org-1", false);
    let record = env
        .state
        .invoices
        .finalize(draft("org-1", "0001", "10"))
        .await
        .unwrap();
    assert_eq!(record.chain_index, 0);
    assert_eq!(record.previous_hash, None);
    assert!(record.signature.is_some());

    let next = env
        .state
        .invoices
        .finalize(draft("org-1", "0002", "20"))
        .await
        .unwrap();
    assert_eq!(next.chain_index, 1);
    assert_eq!(next.previous_hash.as_deref(), Some(record.current_hash.as_str()));
}
