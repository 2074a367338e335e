//! The narrow interface the pipeline needs from active elections.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use quill_ledger::Block;
use quill_types::{BlockHash, QualifiedRoot};

/// Why an election was started; hinted elections have their own (smaller)
/// share of the container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElectionBehavior {
    Priority,
    Hinted,
    Manual,
}

/// Result of offering a block to the election container.
#[derive(Clone, Debug)]
pub struct InsertResult {
    pub inserted: bool,
}

/// What the schedulers and the block processor require of the election
/// container. The full consensus machinery lives behind this.
pub trait ActiveElections: Send + Sync {
    /// Free election slots for `behavior`; non-positive means none.
    fn vacancy(&self, behavior: ElectionBehavior) -> i64;

    /// Start (or join) an election for `block`.
    fn insert(&self, block: &Arc<Block>, behavior: ElectionBehavior) -> InsertResult;

    /// Cancel the election at `root`, if any. Returns whether one existed.
    fn erase(&self, root: &QualifiedRoot) -> bool;

    /// Whether `hash` has an active election or was recently confirmed.
    fn active_or_confirmed(&self, hash: &BlockHash) -> bool;
}

/// Reference container: bounded by behavior, deduplicated by qualified
/// root, remembering recent confirmations. Enough for the pipeline and
/// its tests; a production tally engine would wrap this.
pub struct ElectionContainer {
    max_elections: usize,
    state: Mutex<ContainerState>,
}

struct ContainerState {
    roots: HashMap<QualifiedRoot, ElectionBehavior>,
    hashes: HashSet<BlockHash>,
    recently_confirmed: HashSet<BlockHash>,
    recently_confirmed_order: VecDeque<BlockHash>,
}

const RECENTLY_CONFIRMED_CAPACITY: usize = 65536;
/// Hinted elections may use this fraction of the container, in percent.
const HINTED_LIMIT_PERCENTAGE: usize = 20;

impl ElectionContainer {
    pub fn new(max_elections: usize) -> Self {
        Self {
            max_elections,
            state: Mutex::new(ContainerState {
                roots: HashMap::new(),
                hashes: HashSet::new(),
                recently_confirmed: HashSet::new(),
                recently_confirmed_order: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `hash` confirmed: its election ends and re-activation is
    /// suppressed.
    pub fn confirmed(&self, root: &QualifiedRoot, hash: &BlockHash) {
        let mut state = self.state.lock().unwrap();
        state.roots.remove(root);
        state.hashes.remove(hash);
        if state.recently_confirmed.insert(*hash) {
            state.recently_confirmed_order.push_back(*hash);
            if state.recently_confirmed_order.len() > RECENTLY_CONFIRMED_CAPACITY {
                if let Some(old) = state.recently_confirmed_order.pop_front() {
                    state.recently_confirmed.remove(&old);
                }
            }
        }
    }

    fn limit(&self, behavior: ElectionBehavior) -> usize {
        match behavior {
            ElectionBehavior::Priority | ElectionBehavior::Manual => self.max_elections,
            ElectionBehavior::Hinted => self.max_elections * HINTED_LIMIT_PERCENTAGE / 100,
        }
    }
}

impl ActiveElections for ElectionContainer {
    fn vacancy(&self, behavior: ElectionBehavior) -> i64 {
        let state = self.state.lock().unwrap();
        match behavior {
            ElectionBehavior::Priority | ElectionBehavior::Manual => {
                self.limit(behavior) as i64 - state.roots.len() as i64
            }
            ElectionBehavior::Hinted => {
                let hinted = state
                    .roots
                    .values()
                    .filter(|b| **b == ElectionBehavior::Hinted)
                    .count();
                self.limit(behavior) as i64 - hinted as i64
            }
        }
    }

    fn insert(&self, block: &Arc<Block>, behavior: ElectionBehavior) -> InsertResult {
        let mut state = self.state.lock().unwrap();
        let hash = block.hash();
        let root = block.qualified_root();
        if state.recently_confirmed.contains(&hash) || state.roots.contains_key(&root) {
            return InsertResult { inserted: false };
        }
        if state.roots.len() >= self.max_elections {
            return InsertResult { inserted: false };
        }
        state.roots.insert(root, behavior);
        state.hashes.insert(hash);
        InsertResult { inserted: true }
    }

    fn erase(&self, root: &QualifiedRoot) -> bool {
        let mut state = self.state.lock().unwrap();
        state.roots.remove(root).is_some()
    }

    fn active_or_confirmed(&self, hash: &BlockHash) -> bool {
        let state = self.state.lock().unwrap();
        state.hashes.contains(hash) || state.recently_confirmed.contains(hash)
    }
}
