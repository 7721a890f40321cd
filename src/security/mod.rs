//! Moderation and trust boundaries.
//!
//! - [`vetting`]: join-time bot vetting against the approval ledger
//! - [`rate_limit`]: per-channel outbound send pacing
//! - [`signature`]: webhook signature verification

pub mod rate_limit;
pub mod signature;
pub mod vetting;

pub use rate_limit::SendPacer;
pub use signature::{sign, verify};
pub use vetting::{Candidate, ModerationEngine, VetOutcome};
