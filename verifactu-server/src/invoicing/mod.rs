//! Finalization pipeline
//!
//! [`InvoiceService`] turns an [`shared::models::InvoiceDraft`] into a chained,
//! QR-stamped and signed [`shared::models::InvoiceRecord`].

pub mod service;

pub use service::InvoiceService;
