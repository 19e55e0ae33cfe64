use piano_cert::dev::{KeyType, SigningProfile, issue_self_signed};
use piano_cert::{
    CertError, CertMetadata, SignatureAlgorithm, SigningCertificate, SoftwareCertificate,
    fingerprint_sha256, sign, verify,
};

#[test]
fn test_rsa_crypto_ops() {
    let profile =
        SigningProfile::new("B12345678", "Pianos RSA SL").with_key_type(KeyType::Rsa2048);
    let pair = issue_self_signed(&profile).expect("Failed to issue RSA cert");

    let data = b"IDEmisorFactura=B12345678&NumSerieFactura=A-0001";
    let signature = sign(&pair.key_pem, data).expect("Signing failed");
    assert_eq!(signature.len(), 256);
    verify(&pair.cert_pem, data, &signature).expect("Verification failed");

    let tampered = b"IDEmisorFactura=B12345678&NumSerieFactura=A-0002";
    assert!(verify(&pair.cert_pem, tampered, &signature).is_err());
}

#[test]
fn test_ecdsa_crypto_ops() {
    let pair = issue_self_signed(&SigningProfile::new("A87654321", "Pianos EC SL"))
        .expect("Failed to issue ECDSA cert");

    let data = b"Hello Verifactu ECDSA!";
    let signature = sign(&pair.key_pem, data).expect("Signing failed");
    verify(&pair.cert_pem, data, &signature).expect("Verification failed");
}

#[test]
fn test_metadata_reads_spanish_fields() {
    let pair = issue_self_signed(&SigningProfile::new("B12345678", "Pianos SL")).unwrap();
    let meta = CertMetadata::from_pem(&pair.cert_pem).unwrap();

    assert_eq!(meta.subject_serial.as_deref(), Some("IDCES-B12345678"));
    assert_eq!(meta.organization_id.as_deref(), Some("VATES-B12345678"));
    assert_eq!(meta.organization.as_deref(), Some("Pianos SL"));
    assert_eq!(meta.tax_id(), Some("B12345678"));
    assert_eq!(meta.fingerprint_sha256.len(), 64);
    assert!(meta.not_before < meta.not_after);
}

#[tokio::test]
async fn test_software_certificate_sign_and_verify() {
    let pair = issue_self_signed(&SigningProfile::new("B12345678", "Pianos SL")).unwrap();
    let cert = SoftwareCertificate::from_pem(pair.cert_pem, pair.key_pem).unwrap();

    assert!(!cert.is_expired());
    assert_eq!(cert.algorithm(), SignatureAlgorithm::EcdsaP256Sha256);
    assert_eq!(cert.tax_id(), Some("B12345678"));

    let sig = cert.sign(b"canonical record").await.unwrap();
    cert.verify(b"canonical record", &sig).unwrap();

    let identity = cert.identity_pem().unwrap();
    assert!(identity.contains("BEGIN CERTIFICATE"));
    assert!(identity.contains("BEGIN PRIVATE KEY"));
}

#[test]
fn test_expired_certificate_is_reported() {
    let pair =
        issue_self_signed(&SigningProfile::new("B12345678", "Pianos SL").expired()).unwrap();
    let cert = SoftwareCertificate::from_pem(pair.cert_pem, pair.key_pem).unwrap();

    assert!(cert.is_expired());
    assert!(!cert.is_expired_at(cert.expires_at() - 1));
}

#[test]
fn test_future_certificate_is_not_yet_valid_rather_than_expired() {
    let mut profile = SigningProfile::new("B12345678", "Pianos SL");
    profile.not_before = time::OffsetDateTime::now_utc() + time::Duration::days(2);
    profile.not_after = profile.not_before + time::Duration::days(365);
    let pair = issue_self_signed(&profile).unwrap();
    let cert = SoftwareCertificate::from_pem(pair.cert_pem, pair.key_pem).unwrap();

    let now = cert.not_before() - 1_000;
    assert!(!cert.is_expired_at(now));
    assert!(cert.is_not_yet_valid_at(now));
    assert!(matches!(
        cert.check_validity_at(now),
        Err(CertError::NotYetValid { not_before }) if not_before == cert.not_before()
    ));
    assert!(matches!(
        cert.check_validity_at(cert.expires_at()),
        Err(CertError::Expired { .. })
    ));
    cert.check_validity_at(cert.not_before()).unwrap();
}

#[test]
fn test_software_certificate_exposes_leaf_der() {
    let pair = issue_self_signed(&SigningProfile::new("B12345678", "Pianos SL")).unwrap();
    let cert = SoftwareCertificate::from_pem(pair.cert_pem, pair.key_pem).unwrap();

    let der = cert.certificate_der().unwrap();
    assert_eq!(fingerprint_sha256(&der), cert.fingerprint());
}

#[test]
fn test_mismatched_key_is_rejected() {
    let a = issue_self_signed(&SigningProfile::new("B12345678", "A SL")).unwrap();
    let b = issue_self_signed(&SigningProfile::new("B87654321", "B SL")).unwrap();

    let result = SoftwareCertificate::from_pem(a.cert_pem, b.key_pem);
    assert!(matches!(result, Err(CertError::InvalidKey(_))));
}

#[test]
fn test_files_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let pair = issue_self_signed(&SigningProfile::new("B12345678", "Pianos SL")).unwrap();
    pair.write_to_dir(dir.path()).unwrap();

    let cert = SoftwareCertificate::from_files(
        &dir.path().join("cert.pem"),
        &dir.path().join("key.pem"),
    )
    .unwrap();
    assert_eq!(
        cert.fingerprint(),
        CertMetadata::from_pem_file(dir.path().join("cert.pem"))
            .unwrap()
            .fingerprint_sha256
    );
}
