//! Unchecked block map — blocks whose dependencies have not arrived.
//!
//! A block that fails with a gap result is parked here under the hash (or
//! account key) it is waiting for. When the dependency is applied, the
//! waiting blocks are drained and re-queued on the block processor.

use std::collections::HashMap;
use std::sync::Mutex;

use quill_ledger::Block;
use quill_types::HashOrAccount;
use std::sync::Arc;

struct MapState {
    entries: HashMap<HashOrAccount, Vec<Arc<Block>>>,
    count: usize,
}

/// Bounded dependency-keyed block map.
pub struct UncheckedMap {
    state: Mutex<MapState>,
    max_size: usize,
}

impl UncheckedMap {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(MapState {
                entries: HashMap::new(),
                count: 0,
            }),
            max_size,
        }
    }

    /// Park `block` until `dependency` arrives. Returns `false` when the
    /// map is full.
    pub fn put(&self, dependency: HashOrAccount, block: Arc<Block>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.count >= self.max_size {
            return false;
        }
        state.entries.entry(dependency).or_default().push(block);
        state.count += 1;
        true
    }

    /// Drain every block waiting on `dependency`.
    pub fn trigger(&self, dependency: &HashOrAccount) -> Vec<Arc<Block>> {
        let mut state = self.state.lock().unwrap();
        match state.entries.remove(dependency) {
            Some(blocks) => {
                state.count -= blocks.len();
                blocks
            }
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
