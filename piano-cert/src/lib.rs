//! Organization signing certificates
//!
//! - [`SigningCertificate`]: injected signing capability (sign / fingerprint / expiry)
//! - [`SoftwareCertificate`]: PEM certificate + PKCS#8 key held in memory
//! - [`p12`]: PKCS#12 loading with AEAT trust-chain check (feature `p12-openssl`)
//! - [`dev`]: self-signed certificates with Spanish tax id fields for tests

mod crypto;
pub mod dev;
mod error;
mod metadata;
#[cfg(feature = "p12-openssl")]
pub mod p12;
pub mod signer;

pub use crypto::{SignatureAlgorithm, fingerprint_sha256, sign, signature_algorithm, verify};
pub use error::{CertError, Result};
pub use metadata::CertMetadata;
pub use signer::{SigningCertificate, SoftwareCertificate};
