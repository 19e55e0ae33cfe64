//! Invoice hash chain
//!
//! - [`canonical`]: validated canonical fields and their byte layout
//! - [`hash`]: pure hashing and chain verification
//! - [`builder`]: per-organization serialized appends
//! - [`scheduler`]: periodic verification of every stored chain

pub mod builder;
pub mod canonical;
pub mod hash;
pub mod scheduler;

pub use builder::{ChainAppend, ChainBuilder};
pub use canonical::CanonicalFields;
pub use hash::{GENESIS_HASH, compute_chain_hash, compute_record_hash, ensure_intact, verify_chain};
pub use scheduler::ChainVerifyScheduler;
