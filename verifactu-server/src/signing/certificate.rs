//! 组织证书存储
//!
//! 目录布局:
//!
//! ```text
//! {work_dir}/certs/{org_id}/cert.pem + key.pem
//! {work_dir}/certs/{org_id}.p12            (feature `p12-openssl`)
//! ```
//!
//! 证书加载后常驻内存，每次使用都重新检查有效期。

use crate::error::{InputField, VerifactuError, VerifactuResult};
use dashmap::DashMap;
use piano_cert::{SigningCertificate, SoftwareCertificate};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Days before expiry that trigger a renewal warning
pub const NEAR_EXPIRY_DAYS: i64 = 30;

/// Certificate summary exposed to operators
#[derive(Debug, Clone, Serialize)]
pub struct CertificateInfo {
    pub org_id: String,
    pub fingerprint: String,
    pub tax_id: Option<String>,
    pub algorithm: String,
    /// Unix millis
    pub not_before: i64,
    /// Unix millis
    pub expires_at: i64,
    pub days_until_expiry: i64,
    pub expired: bool,
    pub not_yet_valid: bool,
    pub near_expiry: bool,
}

pub struct CertificateStore {
    certs_dir: PathBuf,
    #[cfg_attr(not(feature = "p12-openssl"), allow(dead_code))]
    p12_password: Option<String>,
    /// Require the P12 root to be an AEAT-recognized CA
    #[cfg_attr(not(feature = "p12-openssl"), allow(dead_code))]
    verify_p12_chain: bool,
    cache: DashMap<String, Arc<dyn SigningCertificate>>,
    /// Last day (epoch days) a near-expiry warning was logged per org
    warned: DashMap<String, i64>,
}

impl CertificateStore {
    pub fn new(certs_dir: impl Into<PathBuf>, p12_password: Option<String>) -> Self {
        Self {
            certs_dir: certs_dir.into(),
            p12_password,
            verify_p12_chain: false,
            cache: DashMap::new(),
            warned: DashMap::new(),
        }
    }

    pub fn with_p12_chain_verification(mut self, verify: bool) -> Self {
        self.verify_p12_chain = verify;
        self
    }

    /// Inject a certificate (tests, HSM-backed implementations)
    pub fn insert(&self, org_id: &str, cert: Arc<dyn SigningCertificate>) {
        self.cache.insert(org_id.to_string(), cert);
        self.warned.remove(org_id);
    }

    /// Drop the cached certificate so the next use reloads from disk
    pub fn invalidate(&self, org_id: &str) {
        self.cache.remove(org_id);
        self.warned.remove(org_id);
    }

    /// Certificate of `org_id`, `None` when none is configured
    ///
    /// Expired certificates are returned as [`VerifactuError::CertificateExpired`].
    pub fn find(&self, org_id: &str) -> VerifactuResult<Option<Arc<dyn SigningCertificate>>> {
        let cached = self.cache.get(org_id).map(|c| c.value().clone());
        let cert = match cached {
            Some(cert) => cert,
            None => match self.load(org_id)? {
                Some(cert) => {
                    self.cache.insert(org_id.to_string(), cert.clone());
                    cert
                }
                None => return Ok(None),
            },
        };

        self.check_validity(org_id, cert.as_ref())?;
        Ok(Some(cert))
    }

    /// Like [`find`](Self::find) but a missing certificate is an error
    pub fn get(&self, org_id: &str) -> VerifactuResult<Arc<dyn SigningCertificate>> {
        self.find(org_id)?
            .ok_or_else(|| VerifactuError::CertificateMissing(org_id.to_string()))
    }

    /// Summary for operators; reports expired certificates instead of failing
    pub fn info(&self, org_id: &str) -> VerifactuResult<CertificateInfo> {
        let cert = match self.cache.get(org_id).map(|c| c.value().clone()) {
            Some(cert) => cert,
            None => self
                .load(org_id)?
                .ok_or_else(|| VerifactuError::CertificateMissing(org_id.to_string()))?,
        };

        let now = shared::util::now_millis();
        let days = shared::util::days_until(cert.expires_at(), now);
        Ok(CertificateInfo {
            org_id: org_id.to_string(),
            fingerprint: cert.fingerprint().to_string(),
            tax_id: cert.tax_id().map(str::to_string),
            algorithm: cert.algorithm().xmldsig_uri().to_string(),
            not_before: cert.not_before(),
            expires_at: cert.expires_at(),
            days_until_expiry: days,
            expired: cert.is_expired_at(now),
            not_yet_valid: cert.is_not_yet_valid_at(now),
            near_expiry: !cert.is_expired_at(now) && days <= NEAR_EXPIRY_DAYS,
        })
    }

    fn check_validity(&self, org_id: &str, cert: &dyn SigningCertificate) -> VerifactuResult<()> {
        let now = shared::util::now_millis();
        if let Err(e) = cert.check_validity_at(now) {
            tracing::error!(
                org_id = %org_id,
                fingerprint = %cert.fingerprint(),
                not_before = cert.not_before(),
                expires_at = cert.expires_at(),
                error = %e,
                "Signing certificate outside its validity window"
            );
            return Err(VerifactuError::from_cert(e, cert.fingerprint()));
        }

        let days = shared::util::days_until(cert.expires_at(), now);
        if days <= NEAR_EXPIRY_DAYS {
            let today = now.div_euclid(86_400_000);
            let already = self.warned.insert(org_id.to_string(), today) == Some(today);
            if !already {
                tracing::warn!(
                    org_id = %org_id,
                    fingerprint = %cert.fingerprint(),
                    days_left = days,
                    "Signing certificate expires soon"
                );
            }
        }
        Ok(())
    }

    fn load(&self, org_id: &str) -> VerifactuResult<Option<Arc<dyn SigningCertificate>>> {
        validate_org_id(org_id)?;

        let dir = self.certs_dir.join(org_id);
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        if cert_path.is_file() && key_path.is_file() {
            let cert = SoftwareCertificate::from_files(&cert_path, &key_path)
                .map_err(|e| {
                    VerifactuError::CertificateInvalid(format!("{}: {e}", cert_path.display()))
                })?;
            tracing::info!(
                org_id = %org_id,
                fingerprint = %cert.fingerprint(),
                "Signing certificate loaded (PEM)"
            );
            return Ok(Some(Arc::new(cert)));
        }

        let p12_path = self.certs_dir.join(format!("{org_id}.p12"));
        if p12_path.is_file() {
            return self.load_p12(org_id, &p12_path).map(Some);
        }

        tracing::debug!(org_id = %org_id, dir = %self.certs_dir.display(), "No signing certificate found");
        Ok(None)
    }

    #[cfg(feature = "p12-openssl")]
    fn load_p12(
        &self,
        org_id: &str,
        path: &std::path::Path,
    ) -> VerifactuResult<Arc<dyn SigningCertificate>> {
        let data = std::fs::read(path)
            .map_err(|e| VerifactuError::CertificateInvalid(format!("{}: {e}", path.display())))?;
        let password = self.p12_password.as_deref().unwrap_or_default();
        let bundle = if self.verify_p12_chain {
            piano_cert::p12::parse_p12(&data, password)?
        } else {
            piano_cert::p12::parse_p12_untrusted(&data, password)?
        };
        let cert = bundle.into_signer()?;
        tracing::info!(
            org_id = %org_id,
            fingerprint = %cert.fingerprint(),
            "Signing certificate loaded (PKCS#12)"
        );
        Ok(Arc::new(cert))
    }

    #[cfg(not(feature = "p12-openssl"))]
    fn load_p12(
        &self,
        org_id: &str,
        path: &std::path::Path,
    ) -> VerifactuResult<Arc<dyn SigningCertificate>> {
        tracing::error!(org_id = %org_id, path = %path.display(), "PKCS#12 support not compiled in");
        Err(VerifactuError::CertificateInvalid(
            "PKCS#12 certificates require the p12-openssl feature".into(),
        ))
    }
}

/// Organization ids become path segments
pub(crate) fn validate_org_id(org_id: &str) -> VerifactuResult<()> {
    let ok = !org_id.is_empty()
        && org_id.len() <= 64
        && org_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(VerifactuError::invalid(
            InputField::OrgId,
            format!("'{org_id}' must be 1-64 chars of [A-Za-z0-9_-]"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piano_cert::dev::{SigningProfile, issue_self_signed};

    fn store_with(org: &str, profile: SigningProfile) -> (tempfile::TempDir, CertificateStore) {
        let dir = tempfile::tempdir().unwrap();
        issue_self_signed(&profile)
            .unwrap()
            .write_to_dir(&dir.path().join(org))
            .unwrap();
        let store = CertificateStore::new(dir.path(), None);
        (dir, store)
    }

    #[test]
    fn test_loads_pem_pair_and_caches() {
        let (_dir, store) = store_with("org-1", SigningProfile::new("B12345678", "Pianos SL"));
        let a = store.get("org-1").unwrap();
        let b = store.get("org-1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.tax_id(), Some("B12345678"));
    }

    #[test]
    fn test_missing_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path(), None);
        assert!(store.find("org-1").unwrap().is_none());
        assert!(matches!(
            store.get("org-1"),
            Err(VerifactuError::CertificateMissing(org)) if org == "org-1"
        ));
    }

    #[test]
    fn test_expired_certificate_is_rejected_on_use() {
        let (_dir, store) = store_with(
            "org-1",
            SigningProfile::new("B12345678", "Pianos SL").expired(),
        );
        assert!(matches!(
            store.get("org-1"),
            Err(VerifactuError::CertificateExpired { .. })
        ));

        let info = store.info("org-1").unwrap();
        assert!(info.expired);
        assert!(info.days_until_expiry < 0);
    }

    #[test]
    fn test_near_expiry_is_reported() {
        let (_dir, store) = store_with(
            "org-1",
            SigningProfile::new("B12345678", "Pianos SL").with_validity_days(10),
        );
        assert!(store.get("org-1").is_ok());
        let info = store.info("org-1").unwrap();
        assert!(info.near_expiry);
        assert!(!info.expired);
    }

    #[test]
    fn test_garbage_pem_is_invalid_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let org_dir = dir.path().join("org-1");
        std::fs::create_dir_all(&org_dir).unwrap();
        std::fs::write(org_dir.join("cert.pem"), "not a certificate").unwrap();
        std::fs::write(org_dir.join("key.pem"), "not a key").unwrap();

        let store = CertificateStore::new(dir.path(), None);
        assert!(matches!(
            store.get("org-1"),
            Err(VerifactuError::CertificateInvalid(msg)) if msg.contains("cert.pem")
        ));
    }

    #[test]
    fn test_rejects_path_like_org_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path(), None);
        for org in ["../etc", "a/b", ""] {
            assert!(matches!(
                store.find(org),
                Err(VerifactuError::InvalidInput {
                    field: InputField::OrgId,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_injected_certificate_wins_and_invalidate_reloads() {
        let (_dir, store) = store_with("org-1", SigningProfile::new("B12345678", "Disk SL"));
        let pair = issue_self_signed(&SigningProfile::new("B87654321", "Injected SL")).unwrap();
        let injected = SoftwareCertificate::from_pem(pair.cert_pem, pair.key_pem).unwrap();
        store.insert("org-1", Arc::new(injected));
        assert_eq!(store.get("org-1").unwrap().tax_id(), Some("B87654321"));

        store.invalidate("org-1");
        assert_eq!(store.get("org-1").unwrap().tax_id(), Some("B12345678"));
    }
}
