//! 记录签名
//!
//! 对规范化记录 (huella 输入 + HuellaActual + QR) 做分离签名。
//! 证书过期、缺失或加密失败都会阻断定稿，不自动重试。

use crate::error::{VerifactuError, VerifactuResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use piano_cert::{SignatureAlgorithm, SigningCertificate};
use serde::Serialize;

/// Detached signature plus the audit fingerprint of the signing certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedRecord {
    pub signature_b64: String,
    pub fingerprint: String,
    #[serde(serialize_with = "serialize_algorithm")]
    pub algorithm: SignatureAlgorithm,
}

fn serialize_algorithm<S: serde::Serializer>(
    algorithm: &SignatureAlgorithm,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(algorithm.xmldsig_uri())
}

/// Sign canonical bytes with the organization certificate
///
/// The validity window is checked right before signing; an expired or
/// not-yet-valid certificate never produces a signature.
pub async fn sign_record(
    canonical: &str,
    cert: &dyn SigningCertificate,
) -> VerifactuResult<SignedRecord> {
    let signature = sign_bytes(canonical.as_bytes(), cert).await?;

    tracing::debug!(
        fingerprint = %cert.fingerprint(),
        bytes = signature.len(),
        "Canonical record signed"
    );

    Ok(SignedRecord {
        signature_b64: BASE64.encode(signature),
        fingerprint: cert.fingerprint().to_string(),
        algorithm: cert.algorithm(),
    })
}

/// Raw signature over `data` after the validity check
pub async fn sign_bytes(data: &[u8], cert: &dyn SigningCertificate) -> VerifactuResult<Vec<u8>> {
    cert.check_validity_at(shared::util::now_millis())
        .map_err(|e| VerifactuError::from_cert(e, cert.fingerprint()))?;

    let signature = cert
        .sign(data)
        .await
        .map_err(|e| VerifactuError::from_cert(e, cert.fingerprint()))?;
    if signature.is_empty() {
        return Err(VerifactuError::Signing("empty signature".into()));
    }
    Ok(signature)
}

/// Check a stored detached signature against the certificate PEM
pub fn verify_record_signature(
    cert_pem: &str,
    canonical: &str,
    signature_b64: &str,
) -> VerifactuResult<()> {
    let signature = BASE64
        .decode(signature_b64)
        .map_err(|e| VerifactuError::Signing(format!("signature is not base64: {e}")))?;
    piano_cert::verify(cert_pem, canonical.as_bytes(), &signature).map_err(VerifactuError::from)
}
