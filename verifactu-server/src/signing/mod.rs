//! Signature Service
//!
//! - [`certificate`]: per-organization certificate cache with expiry checks
//! - [`service`]: detached signatures over canonical records

pub mod certificate;
pub mod service;

pub use certificate::{CertificateInfo, CertificateStore, NEAR_EXPIRY_DAYS};
pub use service::{SignedRecord, sign_bytes, sign_record, verify_record_signature};
