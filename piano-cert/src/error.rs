use thiserror::Error;

#[derive(Error, Debug)]
pub enum CertError {
    #[error("RCGen error: {0}")]
    Rcgen(#[from] rcgen::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
    #[error("Certificate expired at {expires_at} (unix millis)")]
    Expired { expires_at: i64 },
    #[error("Certificate not yet valid until {not_before} (unix millis)")]
    NotYetValid { not_before: i64 },

    // ── P12 specific errors ──
    #[error("Invalid P12/PFX file format: {0}")]
    P12InvalidFormat(String),
    #[error("Wrong P12 password or corrupted file: {0}")]
    P12WrongPassword(String),
    #[error("P12 contains no private key for signing")]
    P12MissingPrivateKey,
    #[error("P12 contains no certificate")]
    P12MissingCertificate,
    #[error("Certificate chain signature verification failed: {0}")]
    P12ChainVerifyFailed(String),
    #[error("Certificate root CA not recognized by AEAT: {0}")]
    P12UntrustedCa(String),
}

pub type Result<T> = std::result::Result<T, CertError>;
