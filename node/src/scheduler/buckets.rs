//! Balance-stratified election queue.
//!
//! Blocks wait in one of 62 buckets keyed by the account balance they
//! represent; inside a bucket, least-recently-modified accounts come
//! first. Popping rotates across non-empty buckets so no balance class
//! monopolizes election slots. Each bucket is bounded; overflow drops the
//! most recently modified entry.

use std::collections::BTreeMap;
use std::sync::Arc;

use quill_ledger::Block;
use quill_types::{Amount, BlockHash};

/// Maximum entries per bucket.
const BUCKET_MAX: usize = 250;

/// Bucket boundaries: zero, then one bucket per power of two from 2^66
/// through 2^126 raw. 62 buckets in total.
fn bucket_minimums() -> Vec<u128> {
    let mut minimums = vec![0u128];
    minimums.extend((66..127).map(|shift| 1u128 << shift));
    minimums
}

pub struct BucketQueue {
    minimums: Vec<u128>,
    buckets: Vec<BTreeMap<(u64, BlockHash), Arc<Block>>>,
    /// Rotation cursor so pops cycle across buckets.
    current: usize,
    total: usize,
}

impl BucketQueue {
    pub fn new() -> Self {
        let minimums = bucket_minimums();
        let buckets = minimums.iter().map(|_| BTreeMap::new()).collect();
        Self {
            minimums,
            buckets,
            current: 0,
            total: 0,
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_of(&self, balance: Amount) -> usize {
        let raw = balance.number();
        match self.minimums.iter().rposition(|minimum| raw >= *minimum) {
            Some(index) => index,
            None => 0,
        }
    }

    /// Queue `block` with its account's last-modified time and the balance
    /// priority computed at activation.
    pub fn push(&mut self, modified: u64, block: Arc<Block>, priority: Amount) {
        let index = self.bucket_of(priority);
        let bucket = &mut self.buckets[index];
        let key = (modified, block.hash());
        if bucket.insert(key, block).is_none() {
            self.total += 1;
        }
        if bucket.len() > BUCKET_MAX {
            // Drop the newest entry; older chains have waited longer.
            if let Some(key) = bucket.iter().next_back().map(|(key, _)| *key) {
                bucket.remove(&key);
                self.total -= 1;
            }
        }
    }

    /// The oldest entry of the next non-empty bucket in rotation.
    pub fn top(&self) -> Option<&Arc<Block>> {
        if self.total == 0 {
            return None;
        }
        let count = self.buckets.len();
        for offset in 0..count {
            let bucket = &self.buckets[(self.current + offset) % count];
            if let Some((_, block)) = bucket.iter().next() {
                return Some(block);
            }
        }
        None
    }

    /// Remove and return the current top, advancing the rotation.
    pub fn pop(&mut self) -> Option<Arc<Block>> {
        if self.total == 0 {
            return None;
        }
        let count = self.buckets.len();
        for offset in 0..count {
            let index = (self.current + offset) % count;
            let bucket = &mut self.buckets[index];
            if let Some(key) = bucket.iter().next().map(|(key, _)| *key) {
                let block = bucket.remove(&key);
                self.total -= 1;
                self.current = (index + 1) % count;
                return block;
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl Default for BucketQueue {
    fn default() -> Self {
        Self::new()
    }
}
