//! Pre-election vote aggregation.
//!
//! Votes often arrive before the node has a block (or an election) for
//! them. The cache keeps, per block hash, the voters seen so far and their
//! running tallies; a separate queue of (hash, tally, final_tally) rows
//! feeds the hinted scheduler in tally order. Popping a row removes it
//! from the queue only, so the votes survive for the election to replay.
//!
//! Internally each collection is a primary map by hash plus auxiliary
//! ordered sets, all mutated through the `*_insert` / `*_erase` helpers
//! under one mutex so the indices cannot diverge.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use quill_ledger::{vote::timestamp_is_final, Vote};
use quill_types::{Account, Amount, BlockHash};

/// Bounds for the cache and queue.
#[derive(Clone, Debug)]
pub struct VoteCacheConfig {
    /// Maximum entries in the cache and in the queue; the oldest entry is
    /// evicted beyond this.
    pub max_size: usize,
    /// Maximum voters remembered per hash.
    pub max_voters: usize,
}

impl Default for VoteCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 64 * 1024,
            max_voters: 40,
        }
    }
}

/// Resolves a representative's voting weight.
pub type RepWeightQuery = Box<dyn Fn(&Account) -> Amount + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Voter {
    representative: Account,
    timestamp: u64,
    weight: Amount,
}

/// A cache entry snapshot: the hash plus its current tallies.
#[derive(Clone, Debug)]
pub struct VoteCacheEntry {
    pub hash: BlockHash,
    voters: Vec<Voter>,
    pub tally: Amount,
    pub final_tally: Amount,
}

impl VoteCacheEntry {
    pub fn voters_count(&self) -> usize {
        self.voters.len()
    }

    /// (representative, timestamp) pairs for replaying into an election.
    pub fn voters(&self) -> impl Iterator<Item = (Account, u64)> + '_ {
        self.voters
            .iter()
            .map(|voter| (voter.representative, voter.timestamp))
    }

    /// Add or refresh a voter. Newer timestamps replace the stored record;
    /// older ones are ignored. Returns whether anything changed.
    fn vote(&mut self, representative: &Account, timestamp: u64, weight: Amount, max_voters: usize) -> bool {
        if let Some(existing) = self
            .voters
            .iter_mut()
            .find(|voter| voter.representative == *representative)
        {
            if timestamp > existing.timestamp {
                existing.timestamp = timestamp;
                existing.weight = weight;
                self.recalculate();
                return true;
            }
            return false;
        }
        if self.voters.len() >= max_voters {
            return false;
        }
        self.voters.push(Voter {
            representative: *representative,
            timestamp,
            weight,
        });
        self.recalculate();
        true
    }

    fn recalculate(&mut self) {
        let mut tally = Amount::ZERO;
        let mut final_tally = Amount::ZERO;
        for voter in &self.voters {
            tally = tally
                .checked_add(voter.weight)
                .unwrap_or(Amount::MAX);
            if timestamp_is_final(voter.timestamp) {
                final_tally = final_tally
                    .checked_add(voter.weight)
                    .unwrap_or(Amount::MAX);
            }
        }
        self.tally = tally;
        self.final_tally = final_tally;
    }
}

#[derive(Clone, Copy)]
struct QueueEntry {
    tally: Amount,
    final_tally: Amount,
    seq: u64,
}

#[derive(Default)]
struct CacheState {
    // Cache: primary map + insertion order for eviction.
    cache: HashMap<BlockHash, VoteCacheEntry>,
    cache_seq: HashMap<BlockHash, u64>,
    cache_by_seq: BTreeSet<(u64, BlockHash)>,
    // Queue: primary map + tally / final-tally / insertion orders.
    queue: HashMap<BlockHash, QueueEntry>,
    queue_by_tally: BTreeSet<(Amount, BlockHash)>,
    queue_by_final: BTreeSet<(Amount, BlockHash)>,
    queue_by_seq: BTreeSet<(u64, BlockHash)>,
    next_seq: u64,
}

impl CacheState {
    fn cache_insert(&mut self, entry: VoteCacheEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.cache_by_seq.insert((seq, entry.hash));
        self.cache_seq.insert(entry.hash, seq);
        self.cache.insert(entry.hash, entry);
    }

    fn cache_erase(&mut self, hash: &BlockHash) -> bool {
        if let Some(seq) = self.cache_seq.remove(hash) {
            self.cache_by_seq.remove(&(seq, *hash));
            self.cache.remove(hash);
            true
        } else {
            false
        }
    }

    fn queue_insert(&mut self, hash: BlockHash, tally: Amount, final_tally: Amount) {
        self.queue_erase(&hash);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue_by_tally.insert((tally, hash));
        self.queue_by_final.insert((final_tally, hash));
        self.queue_by_seq.insert((seq, hash));
        self.queue.insert(
            hash,
            QueueEntry {
                tally,
                final_tally,
                seq,
            },
        );
    }

    fn queue_erase(&mut self, hash: &BlockHash) -> bool {
        if let Some(entry) = self.queue.remove(hash) {
            self.queue_by_tally.remove(&(entry.tally, *hash));
            self.queue_by_final.remove(&(entry.final_tally, *hash));
            self.queue_by_seq.remove(&(entry.seq, *hash));
            true
        } else {
            false
        }
    }

    fn queue_update(&mut self, hash: &BlockHash, tally: Amount, final_tally: Amount) {
        if let Some(entry) = self.queue.get(hash).copied() {
            self.queue_by_tally.remove(&(entry.tally, *hash));
            self.queue_by_final.remove(&(entry.final_tally, *hash));
            self.queue_by_tally.insert((tally, *hash));
            self.queue_by_final.insert((final_tally, *hash));
            self.queue.insert(
                *hash,
                QueueEntry {
                    tally,
                    final_tally,
                    seq: entry.seq,
                },
            );
        }
    }

    fn trim_overflow(&mut self, max_size: usize) {
        if self.cache.len() > max_size {
            if let Some(&(seq, hash)) = self.cache_by_seq.iter().next() {
                debug_assert_eq!(self.cache_seq.get(&hash), Some(&seq));
                self.cache_erase(&hash);
            }
        }
        if self.queue.len() > max_size {
            if let Some(&(_, hash)) = self.queue_by_seq.iter().next() {
                self.queue_erase(&hash);
            }
        }
    }
}

/// The vote cache.
pub struct VoteCache {
    config: VoteCacheConfig,
    rep_weight_query: RepWeightQuery,
    state: Mutex<CacheState>,
}

impl VoteCache {
    pub fn new(config: VoteCacheConfig, rep_weight_query: RepWeightQuery) -> Self {
        Self {
            config,
            rep_weight_query,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Record `vote` as applying to `hash`.
    pub fn vote(&self, hash: &BlockHash, vote: &Vote) {
        let weight = (self.rep_weight_query)(&vote.account);
        self.vote_impl(hash, &vote.account, vote.timestamp, weight);
    }

    fn vote_impl(
        &self,
        hash: &BlockHash,
        representative: &Account,
        timestamp: u64,
        weight: Amount,
    ) {
        let mut state = self.state.lock().unwrap();
        if let Some(mut entry) = state.cache.get(hash).cloned() {
            let modified = entry.vote(representative, timestamp, weight, self.config.max_voters);
            if modified {
                let (tally, final_tally) = (entry.tally, entry.final_tally);
                state.cache.insert(*hash, entry);
                state.queue_update(hash, tally, final_tally);
            }
        } else {
            let mut entry = VoteCacheEntry {
                hash: *hash,
                voters: Vec::new(),
                tally: Amount::ZERO,
                final_tally: Amount::ZERO,
            };
            entry.vote(representative, timestamp, weight, self.config.max_voters);
            let (tally, final_tally) = (entry.tally, entry.final_tally);
            state.cache_insert(entry);
            state.queue_insert(*hash, tally, final_tally);
            state.trim_overflow(self.config.max_size);
        }
    }

    pub fn cache_size(&self) -> usize {
        self.state.lock().unwrap().cache.len()
    }

    pub fn queue_size(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn cache_empty(&self) -> bool {
        self.cache_size() == 0
    }

    pub fn queue_empty(&self) -> bool {
        self.queue_size() == 0
    }

    pub fn find(&self, hash: &BlockHash) -> Option<VoteCacheEntry> {
        self.state.lock().unwrap().cache.get(hash).cloned()
    }

    /// Drop `hash` from both cache and queue.
    pub fn erase(&self, hash: &BlockHash) -> bool {
        let mut state = self.state.lock().unwrap();
        let erased = state.cache_erase(hash);
        state.queue_erase(hash);
        erased
    }

    /// Remove and return the highest-tally queue row whose cache tally is
    /// at least `min_tally`. The votes stay cached.
    pub fn pop(&self, min_tally: Amount) -> Option<VoteCacheEntry> {
        let mut state = self.state.lock().unwrap();
        let &(_, hash) = state.queue_by_tally.iter().next_back()?;
        let entry = state.cache.get(&hash).cloned();
        match entry {
            Some(entry) if entry.tally >= min_tally => {
                state.queue_erase(&hash);
                Some(entry)
            }
            _ => None,
        }
    }

    /// Like [`VoteCache::pop`] without removing.
    pub fn peek(&self, min_tally: Amount) -> Option<VoteCacheEntry> {
        let state = self.state.lock().unwrap();
        let &(_, hash) = state.queue_by_tally.iter().next_back()?;
        state
            .cache
            .get(&hash)
            .filter(|entry| entry.tally >= min_tally)
            .cloned()
    }

    /// Non-destructive top of the final-tally order.
    pub fn peek_final(&self, min_final_tally: Amount) -> Option<VoteCacheEntry> {
        let state = self.state.lock().unwrap();
        let &(_, hash) = state.queue_by_final.iter().next_back()?;
        state
            .cache
            .get(&hash)
            .filter(|entry| entry.final_tally >= min_final_tally)
            .cloned()
    }

    /// Re-queue a previously popped hash so the hinted scheduler can see
    /// it again. No-op unless the hash is cached and not already queued.
    pub fn trigger(&self, hash: &BlockHash) {
        let mut state = self.state.lock().unwrap();
        if state.queue.contains_key(hash) {
            return;
        }
        if let Some(entry) = state.cache.get(hash) {
            let (tally, final_tally) = (entry.tally, entry.final_tally);
            state.queue_insert(*hash, tally, final_tally);
            state.trim_overflow(self.config.max_size);
        }
    }

    /// Visit a snapshot of the cache, entries with the highest final tally
    /// first, then by tally. The lock is released before `action` runs.
    pub fn iterate(
        &self,
        min_tally: Amount,
        min_final_tally: Amount,
        mut action: impl FnMut(&VoteCacheEntry),
    ) {
        let snapshot: Vec<VoteCacheEntry> = {
            let state = self.state.lock().unwrap();
            let mut entries: Vec<VoteCacheEntry> = state
                .cache
                .values()
                .filter(|entry| entry.tally >= min_tally || entry.final_tally >= min_final_tally)
                .cloned()
                .collect();
            entries.sort_by(|a, b| {
                (b.final_tally, b.tally).cmp(&(a.final_tally, a.tally))
            });
            entries
        };
        for entry in &snapshot {
            action(entry);
        }
    }
}
