use crate::crypto;
use crate::error::{CertError, Result};
use crate::metadata::CertMetadata;
use crate::signer::SoftwareCertificate;

/// AEAT (@firma) 认可的西班牙 CA 根证书 SHA256 指纹
///
/// Verifactu 要求证书能通过 @firma 平台验证。
const TRUSTED_ROOT_FINGERPRINTS: &[&str] = &[
    // AC RAIZ FNMT-RCM (西班牙皇家铸币厂, 最常见)
    "ebc5570c29018c4d67b1aa127baf12f703b4611ebc17b7dab5573894179b93fa",
    // ACCVRAIZ1 (Agencia de Tecnología y Certificación Electrónica)
    "9a6ec012e1a7da9dbe34194d478ad7c0db1822fb071df12981496ed104384113",
    // Izenpe.com (Basque Country)
    "2530cc8e98321502bad96f9b1fba1b099e2d299e0f4548bb914f363bc0d4531f",
    // Autoridad de Certificacion Firmaprofesional
    "04048028bf1f2864d48f9ad4d83294366a828856553f3b14303f90147f5d40ef",
];

/// P12 解包结果: 叶子证书元数据 + PEM 格式的证书和私钥
#[derive(Debug, Clone)]
pub struct P12Bundle {
    pub metadata: CertMetadata,
    pub cert_pem: String,
    /// PKCS#8 private key
    pub key_pem: String,
    /// Number of certificates in the embedded chain (leaf included)
    pub chain_len: usize,
}

impl P12Bundle {
    pub fn into_signer(self) -> Result<SoftwareCertificate> {
        SoftwareCertificate::from_pem(self.cert_pem, self.key_pem)
    }
}

/// 解析 PKCS#12 文件并验证信任链 (生产环境)
///
/// 验证:
/// - P12 密码正确、文件格式有效、包含私钥
/// - 证书链签名完整性 (每一级由上级签发)
/// - 根证书指纹匹配 AEAT 认可的西班牙 CA
pub fn parse_p12(data: &[u8], password: &str) -> Result<P12Bundle> {
    let (bundle, cert_ders) = unpack(data, password)?;
    let refs: Vec<&[u8]> = cert_ders.iter().map(|d| d.as_slice()).collect();
    verify_chain(&refs)?;
    Ok(bundle)
}

/// 解析 PKCS#12 文件，不校验根证书 (开发/测试环境)
pub fn parse_p12_untrusted(data: &[u8], password: &str) -> Result<P12Bundle> {
    let (bundle, _) = unpack(data, password)?;
    tracing::warn!(
        fingerprint = %bundle.metadata.fingerprint_sha256,
        "P12 loaded without trust-chain verification"
    );
    Ok(bundle)
}

fn unpack(data: &[u8], password: &str) -> Result<(P12Bundle, Vec<Vec<u8>>)> {
    // 用 OpenSSL 解析 P12 (能处理 BER 编码)
    let pkcs12 = openssl::pkcs12::Pkcs12::from_der(data)
        .map_err(|e| CertError::P12InvalidFormat(e.to_string()))?;

    let parsed = pkcs12
        .parse2(password)
        .map_err(|e| CertError::P12WrongPassword(e.to_string()))?;

    let pkey = parsed.pkey.ok_or(CertError::P12MissingPrivateKey)?;
    let leaf_cert = parsed.cert.ok_or(CertError::P12MissingCertificate)?;

    let key_pem = pkey
        .private_key_to_pem_pkcs8()
        .map_err(|e| CertError::InvalidKey(e.to_string()))
        .and_then(|b| {
            String::from_utf8(b).map_err(|e| CertError::InvalidKey(e.to_string()))
        })?;

    // 收集完整证书链的 DER: [leaf, ...intermediates, root]
    let leaf_der = leaf_cert
        .to_der()
        .map_err(|e| CertError::InvalidCertificate(format!("Cert DER encode error: {e}")))?;
    let mut cert_ders = vec![leaf_der];
    if let Some(ref ca_certs) = parsed.ca {
        for ca in ca_certs {
            let der = ca.to_der().map_err(|e| {
                CertError::InvalidCertificate(format!("CA cert DER encode error: {e}"))
            })?;
            cert_ders.push(der);
        }
    }

    let metadata = CertMetadata::from_der(&cert_ders[0])?;
    let cert_pem = crypto::pem_from_der("CERTIFICATE", &cert_ders[0]);

    Ok((
        P12Bundle {
            metadata,
            cert_pem,
            key_pem,
            chain_len: cert_ders.len(),
        },
        cert_ders,
    ))
}

/// 验证 P12 内部证书链
///
/// 1. 验证链中每一级的签名 (cert[i] 由 cert[i+1] 签发)
/// 2. 链的最顶层证书 (root/anchor) 的 SHA256 指纹必须在受信列表中
fn verify_chain(cert_ders: &[&[u8]]) -> Result<()> {
    for pair in cert_ders.windows(2) {
        let (child, parent) = (pair[0], pair[1]);
        let parent_pem = crypto::pem_from_der("CERTIFICATE", parent);

        let (_, child_x509) = x509_parser::parse_x509_certificate(child)
            .map_err(|e| CertError::P12ChainVerifyFailed(format!("Chain cert parse error: {e}")))?;

        crypto::verify(
            &parent_pem,
            child_x509.tbs_certificate.as_ref(),
            child_x509.signature_value.as_ref(),
        )
        .map_err(|e| CertError::P12ChainVerifyFailed(e.to_string()))?;
    }

    let anchor = cert_ders
        .last()
        .ok_or(CertError::P12MissingCertificate)?;
    let anchor_fingerprint = crypto::fingerprint_sha256(anchor);

    if !TRUSTED_ROOT_FINGERPRINTS.contains(&anchor_fingerprint.as_str()) {
        let issuer_org = CertMetadata::from_der(anchor)
            .ok()
            .and_then(|m| m.issuer)
            .unwrap_or_else(|| "Unknown".to_string());

        return Err(CertError::P12UntrustedCa(format!(
            "fingerprint: {anchor_fingerprint}, issuer: {issuer_org}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::{SigningProfile, issue_self_signed};
    use openssl::pkcs12::Pkcs12;
    use openssl::pkey::PKey;
    use openssl::x509::X509;

    fn build_p12(password: &str) -> (Vec<u8>, String) {
        let pair = issue_self_signed(&SigningProfile::new("B12345678", "Pianos Test SL")).unwrap();
        let cert = X509::from_pem(pair.cert_pem.as_bytes()).unwrap();
        let pkey = PKey::private_key_from_pem(pair.key_pem.as_bytes()).unwrap();
        let p12 = Pkcs12::builder()
            .name("signing")
            .pkey(&pkey)
            .cert(&cert)
            .build2(password)
            .unwrap();
        (p12.to_der().unwrap(), pair.cert_pem)
    }

    #[test]
    fn test_parse_p12_untrusted_roundtrip() {
        let (der, cert_pem) = build_p12("secret");
        let bundle = parse_p12_untrusted(&der, "secret").unwrap();

        assert_eq!(bundle.chain_len, 1);
        assert_eq!(bundle.metadata.tax_id(), Some("B12345678"));
        let expected = CertMetadata::from_pem(&cert_pem).unwrap();
        assert_eq!(bundle.metadata.fingerprint_sha256, expected.fingerprint_sha256);

        let signer = bundle.into_signer().unwrap();
        assert_eq!(signer.metadata().tax_id(), Some("B12345678"));
    }

    #[test]
    fn test_parse_p12_rejects_untrusted_root() {
        let (der, _) = build_p12("secret");
        let result = parse_p12(&der, "secret");
        assert!(matches!(result, Err(CertError::P12UntrustedCa(_))));
    }

    #[test]
    fn test_parse_p12_wrong_password() {
        let (der, _) = build_p12("secret");
        let result = parse_p12_untrusted(&der, "wrong_password");
        assert!(matches!(result, Err(CertError::P12WrongPassword(_))));
    }

    #[test]
    fn test_parse_p12_invalid_data() {
        let result = parse_p12(b"not a p12 file", "password");
        assert!(matches!(result, Err(CertError::P12InvalidFormat(_))));
    }
}
