//! 开发/测试用签名证书
//!
//! 生成带西班牙税号字段的自签名证书，用于本地开发和集成测试。
//! 生产环境必须使用 FNMT 等 AEAT 认可 CA 签发的 P12。

use crate::error::{CertError, Result};
use rand::thread_rng;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use std::fs;
use std::path::Path;
use time::{Duration, OffsetDateTime};

const OID_SERIAL_NUMBER: &[u64] = &[2, 5, 4, 5];
const OID_ORGANIZATION_IDENTIFIER: &[u64] = &[2, 5, 4, 97];

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum KeyType {
    #[default]
    P256,
    Rsa2048,
}

#[derive(Clone, Debug)]
pub struct SigningProfile {
    pub common_name: String,
    pub organization: String,
    /// NIF/CIF written as `IDCES-{tax_id}` / `VATES-{tax_id}`
    pub tax_id: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub key_type: KeyType,
}

impl SigningProfile {
    /// Two-year certificate valid from now
    pub fn new(tax_id: &str, organization: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            common_name: format!("{} - {}", organization.to_uppercase(), tax_id),
            organization: organization.to_string(),
            tax_id: tax_id.to_string(),
            not_before: now - Duration::minutes(1),
            not_after: now + Duration::days(730),
            key_type: KeyType::default(),
        }
    }

    pub fn with_validity_days(mut self, days: i64) -> Self {
        self.not_after = self.not_before + Duration::days(days);
        self
    }

    /// Validity window entirely in the past
    pub fn expired(mut self) -> Self {
        let now = OffsetDateTime::now_utc();
        self.not_before = now - Duration::days(365);
        self.not_after = now - Duration::days(1);
        self
    }

    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }
}

/// PEM 证书 + PKCS#8 私钥
#[derive(Clone, Debug)]
pub struct PemPair {
    pub cert_pem: String,
    pub key_pem: String,
}

impl PemPair {
    /// Write `cert.pem` and `key.pem` into `dir`
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join("cert.pem"), &self.cert_pem)?;
        fs::write(dir.join("key.pem"), &self.key_pem)?;
        Ok(())
    }
}

/// 生成自签名签名证书
pub fn issue_self_signed(profile: &SigningProfile) -> Result<PemPair> {
    let key_pair = generate_key_pair(profile.key_type)?;

    let mut params = CertificateParams::new(Vec::new())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, &profile.common_name);
    dn.push(DnType::OrganizationName, &profile.organization);
    dn.push(DnType::CountryName, "ES");
    dn.push(
        DnType::CustomDnType(OID_SERIAL_NUMBER.to_vec()),
        format!("IDCES-{}", profile.tax_id),
    );
    dn.push(
        DnType::CustomDnType(OID_ORGANIZATION_IDENTIFIER.to_vec()),
        format!("VATES-{}", profile.tax_id),
    );
    params.distinguished_name = dn;

    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::ContentCommitment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params.not_before = profile.not_before;
    params.not_after = profile.not_after;

    let cert = params.self_signed(&key_pair)?;

    Ok(PemPair {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

fn generate_key_pair(key_type: KeyType) -> Result<KeyPair> {
    match key_type {
        KeyType::P256 => Ok(KeyPair::generate()?),
        KeyType::Rsa2048 => {
            let mut rng = thread_rng();
            let private_key = RsaPrivateKey::new(&mut rng, 2048)
                .map_err(|e| CertError::InvalidKey(format!("RSA gen error: {}", e)))?;
            let pem = private_key
                .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
                .map_err(|e| CertError::InvalidKey(format!("RSA PEM error: {}", e)))?;
            Ok(KeyPair::from_pem(&pem)?)
        }
    }
}
