//! QR Generator
//!
//! - [`payload`]: deterministic AEAT verification URL (no I/O)
//! - [`render`]: stateless image transforms of that URL

pub mod payload;
pub mod render;

pub use payload::{
    LEGEND, MIN_SCANNED_HASH_LEN, SHORT_LEGEND, VerificationPayload, build_verification_payload,
    parse_verification_payload,
};
pub use render::{RenderError, render_data_url, render_escpos, render_png, render_svg};
