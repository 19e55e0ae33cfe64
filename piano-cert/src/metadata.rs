use crate::crypto;
use crate::error::{CertError, Result};
use std::fs;
use std::path::Path;
use x509_parser::oid_registry;

const OID_ORGANIZATION_IDENTIFIER: &str = "2.5.4.97";

/// 签名证书元数据 (西班牙电子签名证书字段)
#[derive(Debug, Clone)]
pub struct CertMetadata {
    pub common_name: Option<String>,
    /// serialNumber (OID 2.5.4.5), 如 "IDCES-B12345678"
    pub subject_serial: Option<String>,
    /// organizationIdentifier (OID 2.5.4.97), 如 "VATES-B12345678"
    pub organization_id: Option<String>,
    pub organization: Option<String>,
    pub issuer: Option<String>,
    /// Certificate serial number (hex)
    pub serial_number: String,
    pub fingerprint_sha256: String,
    /// 生效时间 (Unix millis)
    pub not_before: i64,
    /// 过期时间 (Unix millis)
    pub not_after: i64,
}

impl CertMetadata {
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = crypto::first_cert_der(pem)?;
        Self::from_der(&der)
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let fingerprint_sha256 = crypto::fingerprint_sha256(der);

        let (_, x509) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| CertError::InvalidCertificate(format!("X509 parse error: {}", e)))?;

        let mut common_name = None;
        let mut subject_serial = None;
        let mut organization_id = None;
        let mut organization = None;
        for rdn in x509.subject().iter_rdn() {
            for attr in rdn.iter() {
                let oid = attr.attr_type();
                let value = attr.as_str().ok().map(String::from);
                if oid == &oid_registry::OID_X509_COMMON_NAME {
                    common_name = value;
                } else if oid == &oid_registry::OID_X509_SERIALNUMBER {
                    subject_serial = value;
                } else if oid == &oid_registry::OID_X509_ORGANIZATION_NAME {
                    organization = value;
                } else if oid.to_id_string() == OID_ORGANIZATION_IDENTIFIER {
                    organization_id = value;
                }
            }
        }

        let issuer = x509
            .issuer()
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok())
            .map(String::from);

        // Serial Number (Hex)
        let serial_number = x509.tbs_certificate.serial.to_str_radix(16);

        let not_before = x509.validity().not_before.timestamp() * 1000;
        let not_after = x509.validity().not_after.timestamp() * 1000;

        Ok(Self {
            common_name,
            subject_serial,
            organization_id,
            organization,
            issuer,
            serial_number,
            fingerprint_sha256,
            not_before,
            not_after,
        })
    }

    /// Load metadata from a PEM certificate file
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pem = fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// 从 serialNumber 或 organizationIdentifier 中提取纯税号
    ///
    /// "IDCES-B12345678" → "B12345678"
    /// "VATES-B12345678" → "B12345678"
    pub fn tax_id(&self) -> Option<&str> {
        if let Some(ref sn) = self.subject_serial {
            if let Some(nif) = sn.strip_prefix("IDCES-") {
                return Some(nif);
            }
            // 有些证书直接放 NIF
            if sn.len() == 9 {
                return Some(sn);
            }
        }
        if let Some(ref oid) = self.organization_id
            && let Some(nif) = oid.strip_prefix("VATES-")
        {
            return Some(nif);
        }
        None
    }

    /// Whether `now` (Unix millis) is at or past `not_after`
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis >= self.not_after
    }

    /// Whether `now` (Unix millis) is before `not_before`
    pub fn is_not_yet_valid_at(&self, now_millis: i64) -> bool {
        now_millis < self.not_before
    }

    /// Verify if the fingerprint matches the expected SHA256 hex string (case-insensitive)
    pub fn verify_fingerprint(&self, expected_sha256_hex: &str) -> bool {
        self.fingerprint_sha256
            .eq_ignore_ascii_case(expected_sha256_hex)
    }
}
