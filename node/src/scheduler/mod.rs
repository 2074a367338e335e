//! Election schedulers.
//!
//! Two activation paths into the active-elections container:
//!
//! - **Priority**: per-account, the next unconfirmed block whose
//!   dependencies are confirmed, drawn from a balance-stratified bucket
//!   queue so low-value spam cannot starve high-value accounts.
//! - **Hinted**: blocks the vote cache shows the network already voting
//!   on, final tallies first.

pub mod buckets;
pub mod hinted;
pub mod priority;

pub use buckets::BucketQueue;
pub use hinted::{HintedScheduler, HintedSchedulerConfig};
pub use priority::PriorityScheduler;
