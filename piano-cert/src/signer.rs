use crate::crypto::{self, SignatureAlgorithm};
use crate::error::{CertError, Result};
use crate::metadata::CertMetadata;
use async_trait::async_trait;

/// 组织签名证书接口
///
/// 调用者永远拿不到私钥本身，只能请求"对数据进行签名"。
/// 测试可以注入自己的实现 (过期证书、签名失败等)。
#[async_trait]
pub trait SigningCertificate: Send + Sync {
    /// 对数据签名，返回原始签名字节
    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// SHA256 证书指纹 (lowercase hex)，用于审计
    fn fingerprint(&self) -> &str;

    /// 生效时间 (Unix millis)
    fn not_before(&self) -> i64;

    /// 过期时间 (Unix millis)
    fn expires_at(&self) -> i64;

    /// 证书中的税号 (NIF/CIF)
    fn tax_id(&self) -> Option<&str>;

    fn algorithm(&self) -> SignatureAlgorithm;

    /// Client identity (cert + key PEM) for mTLS against the authority
    fn identity_pem(&self) -> Option<String> {
        None
    }

    /// Leaf certificate DER, embedded as `X509Certificate` in XML signatures
    fn certificate_der(&self) -> Option<Vec<u8>> {
        None
    }

    fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at()
    }

    fn is_not_yet_valid_at(&self, now_millis: i64) -> bool {
        now_millis < self.not_before()
    }

    /// 有效期检查: [`CertError::Expired`] 或 [`CertError::NotYetValid`]
    fn check_validity_at(&self, now_millis: i64) -> Result<()> {
        if self.is_expired_at(now_millis) {
            return Err(CertError::Expired {
                expires_at: self.expires_at(),
            });
        }
        if self.is_not_yet_valid_at(now_millis) {
            return Err(CertError::NotYetValid {
                not_before: self.not_before(),
            });
        }
        Ok(())
    }

    fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

/// 当前时间 (Unix millis)
pub(crate) fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// 软件证书 (PEM 证书 + PKCS#8 私钥，常驻内存)
pub struct SoftwareCertificate {
    cert_pem: String,
    key_pem: String,
    metadata: CertMetadata,
    algorithm: SignatureAlgorithm,
}

impl SoftwareCertificate {
    /// 从 PEM 字符串加载
    pub fn from_pem(cert_pem: String, key_pem: String) -> Result<Self> {
        let metadata = CertMetadata::from_pem(&cert_pem)?;
        let algorithm = crypto::signature_algorithm(&cert_pem)?;

        // 私钥必须能签名，且与证书公钥匹配
        let self_check = crypto::sign(&key_pem, metadata.fingerprint_sha256.as_bytes())?;
        crypto::verify(&cert_pem, metadata.fingerprint_sha256.as_bytes(), &self_check).map_err(
            |_| CertError::InvalidKey("Private key does not match certificate".into()),
        )?;

        Ok(Self {
            cert_pem,
            key_pem,
            metadata,
            algorithm,
        })
    }

    /// 从文件加载
    pub fn from_files(cert_path: &std::path::Path, key_path: &std::path::Path) -> Result<Self> {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        Self::from_pem(cert_pem, key_pem)
    }

    pub fn metadata(&self) -> &CertMetadata {
        &self.metadata
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Verify a signature produced by this certificate
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        crypto::verify(&self.cert_pem, data, signature)
    }
}

impl std::fmt::Debug for SoftwareCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareCertificate")
            .field("fingerprint", &self.metadata.fingerprint_sha256)
            .field("not_after", &self.metadata.not_after)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SigningCertificate for SoftwareCertificate {
    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        crypto::sign(&self.key_pem, data)
    }

    fn fingerprint(&self) -> &str {
        &self.metadata.fingerprint_sha256
    }

    fn not_before(&self) -> i64 {
        self.metadata.not_before
    }

    fn expires_at(&self) -> i64 {
        self.metadata.not_after
    }

    fn tax_id(&self) -> Option<&str> {
        self.metadata.tax_id()
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    fn identity_pem(&self) -> Option<String> {
        Some(format!("{}\n{}", self.cert_pem.trim_end(), self.key_pem))
    }

    fn certificate_der(&self) -> Option<Vec<u8>> {
        crypto::first_cert_der(&self.cert_pem).ok()
    }
}
