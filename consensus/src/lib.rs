//! Consensus-side collaborators of the node pipeline: the vote cache,
//! online representative weight, the active-elections interface, and the
//! local vote history.
//!
//! Election algorithms themselves (tallying, transitions, final votes) are
//! outside this crate; the pipeline only needs vacancy, insert and erase.

pub mod active_elections;
pub mod local_vote_history;
pub mod online_weight;
pub mod vote_cache;

pub use active_elections::{ActiveElections, ElectionBehavior, ElectionContainer, InsertResult};
pub use local_vote_history::LocalVoteHistory;
pub use online_weight::OnlineReps;
pub use vote_cache::{VoteCache, VoteCacheConfig, VoteCacheEntry};
