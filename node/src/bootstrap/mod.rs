//! Ascending bootstrap client.
//!
//! Pulls missing account chains from peers: a priority set of accounts
//! worth requesting, per-peer scoring with outstanding-request quotas,
//! correlation tags for in-flight requests, chain verification of
//! responses, and adaptive throttling driven by how useful recent
//! responses were.

pub mod account_sets;
pub mod ledger_scan;
pub mod peer_scoring;
pub mod priority;
pub mod service;
pub mod throttle;

pub use account_sets::AccountSets;
pub use priority::{PullBlocksTag, QueryType, VerifyResult};
pub use service::BootstrapService;
