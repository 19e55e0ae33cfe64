use crate::error::{CertError, Result};
use ring::{rand as ring_rand, signature};
use sha2::{Digest, Sha256};

const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";

/// Signature algorithm of a signing key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// ECDSA P-256 with SHA-256 (ASN.1 DER signature)
    EcdsaP256Sha256,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RsaPkcs1Sha256,
}

impl SignatureAlgorithm {
    /// XML-DSig algorithm URI
    pub fn xmldsig_uri(&self) -> &'static str {
        match self {
            Self::EcdsaP256Sha256 => "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256",
            Self::RsaPkcs1Sha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
        }
    }
}

/// Sign data using a PKCS#8 private key (supports ECDSA P-256 and RSA)
pub fn sign(priv_key_pem: &str, data: &[u8]) -> Result<Vec<u8>> {
    let der = decode_pem(priv_key_pem, "PRIVATE KEY")?;

    // Try ECDSA P-256 first
    let rng = ring_rand::SystemRandom::new();
    if let Ok(key_pair) =
        signature::EcdsaKeyPair::from_pkcs8(&signature::ECDSA_P256_SHA256_ASN1_SIGNING, &der, &rng)
    {
        let sig = key_pair
            .sign(&rng, data)
            .map_err(|e| CertError::SigningFailed(e.to_string()))?;
        return Ok(sig.as_ref().to_vec());
    }

    // Try RSA
    if let Ok(key_pair) = signature::RsaKeyPair::from_pkcs8(&der) {
        let mut sig = vec![0; key_pair.public().modulus_len()];
        key_pair
            .sign(&signature::RSA_PKCS1_SHA256, &rng, data, &mut sig)
            .map_err(|e| CertError::SigningFailed(e.to_string()))?;
        return Ok(sig);
    }

    Err(CertError::InvalidKey(
        "Unsupported or invalid private key format".into(),
    ))
}

/// Verify signature using a certificate (supports ECDSA P-256 and RSA)
pub fn verify(cert_pem: &str, data: &[u8], sig: &[u8]) -> Result<()> {
    let der = first_cert_der(cert_pem)?;
    let (_, x509) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| CertError::InvalidCertificate(format!("X509 parse error: {}", e)))?;

    let spki = x509.tbs_certificate.subject_pki;
    let key_bytes = spki.subject_public_key.data;
    let oid = spki.algorithm.algorithm.to_id_string();

    let peer_public_key = if oid == OID_EC_PUBLIC_KEY {
        signature::UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, key_bytes)
    } else if oid == OID_RSA_ENCRYPTION {
        signature::UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, key_bytes)
    } else {
        return Err(CertError::VerificationFailed(format!(
            "Unsupported algorithm OID: {}",
            oid
        )));
    };

    peer_public_key
        .verify(data, sig)
        .map_err(|_| CertError::VerificationFailed("Signature verification failed".into()))
}

/// Detect the signature algorithm of a certificate's public key
pub fn signature_algorithm(cert_pem: &str) -> Result<SignatureAlgorithm> {
    let der = first_cert_der(cert_pem)?;
    let (_, x509) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| CertError::InvalidCertificate(format!("X509 parse error: {}", e)))?;

    match x509
        .tbs_certificate
        .subject_pki
        .algorithm
        .algorithm
        .to_id_string()
        .as_str()
    {
        OID_EC_PUBLIC_KEY => Ok(SignatureAlgorithm::EcdsaP256Sha256),
        OID_RSA_ENCRYPTION => Ok(SignatureAlgorithm::RsaPkcs1Sha256),
        other => Err(CertError::InvalidCertificate(format!(
            "Unsupported algorithm OID: {other}"
        ))),
    }
}

/// SHA-256 fingerprint of a DER certificate (lowercase hex)
pub fn fingerprint_sha256(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// DER of the first certificate in a PEM bundle
pub fn first_cert_der(cert_pem: &str) -> Result<Vec<u8>> {
    decode_pem(cert_pem, "CERTIFICATE")
        .map_err(|e| CertError::InvalidCertificate(e.to_string()))
}

/// DER 转 PEM
#[cfg(feature = "p12-openssl")]
pub fn pem_from_der(tag: &str, der: &[u8]) -> String {
    ::pem::encode(&::pem::Pem::new(tag, der.to_vec()))
}

fn decode_pem(pem_str: &str, tag: &str) -> Result<Vec<u8>> {
    let pems = ::pem::parse_many(pem_str)
        .map_err(|e| CertError::VerificationFailed(format!("PEM parse error: {}", e)))?;

    for p in pems {
        if p.tag() == tag {
            return Ok(p.into_contents());
        }
    }

    Err(CertError::VerificationFailed(format!(
        "PEM tag '{}' not found",
        tag
    )))
}
