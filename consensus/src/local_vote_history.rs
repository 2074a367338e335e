//! Recently generated local votes, indexed by root.
//!
//! When a fork rollback removes blocks, their roots are erased here so the
//! node does not answer confirm_req with votes for blocks it just rolled
//! back.

use std::collections::HashMap;
use std::sync::Mutex;

use quill_ledger::Vote;
use quill_types::{BlockHash, Root};

pub struct LocalVoteHistory {
    state: Mutex<HashMap<Root, Vec<(BlockHash, Vote)>>>,
}

impl LocalVoteHistory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, root: Root, hash: BlockHash, vote: Vote) {
        let mut state = self.state.lock().unwrap();
        let entries = state.entry(root).or_default();
        entries.retain(|(existing, _)| *existing != hash);
        entries.push((hash, vote));
    }

    pub fn votes(&self, root: &Root) -> Vec<Vote> {
        self.state
            .lock()
            .unwrap()
            .get(root)
            .map(|entries| entries.iter().map(|(_, vote)| vote.clone()).collect())
            .unwrap_or_default()
    }

    pub fn erase(&self, root: &Root) {
        self.state.lock().unwrap().remove(root);
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().values().map(Vec::len).sum()
    }
}

impl Default for LocalVoteHistory {
    fn default() -> Self {
        Self::new()
    }
}
