//! Thread-safe statistics counters.
//!
//! Counters are keyed by (component, detail, direction) and created on
//! first use. Increments are relaxed atomics; `snapshot` is for tests and
//! the shutdown summary, not for coordination.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// The component a counter belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatType {
    Message,
    Channel,
    BlockProcessor,
    Ledger,
    Rollback,
    BootstrapServer,
    BootstrapAscending,
    BootstrapAscendingAccounts,
    ElectionScheduler,
    Hinting,
    VoteCache,
    BlockBroadcaster,
}

impl StatType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Channel => "channel",
            Self::BlockProcessor => "block_processor",
            Self::Ledger => "ledger",
            Self::Rollback => "rollback",
            Self::BootstrapServer => "bootstrap_server",
            Self::BootstrapAscending => "bootstrap_ascending",
            Self::BootstrapAscendingAccounts => "bootstrap_ascending_accounts",
            Self::ElectionScheduler => "election_scheduler",
            Self::Hinting => "hinting",
            Self::VoteCache => "vote_cache",
            Self::BlockBroadcaster => "block_broadcaster",
        }
    }
}

/// Traffic direction for counters that distinguish it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CounterKey {
    stat_type: StatType,
    detail: &'static str,
    direction: Direction,
}

/// Counter registry. Cheap to clone via `Arc` at the call sites that need
/// it; all methods take `&self`.
pub struct Stats {
    counters: RwLock<HashMap<CounterKey, Arc<AtomicU64>>>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn inc(&self, stat_type: StatType, detail: &'static str) {
        self.add_dir(stat_type, detail, Direction::In, 1);
    }

    pub fn inc_dir(&self, stat_type: StatType, detail: &'static str, direction: Direction) {
        self.add_dir(stat_type, detail, direction, 1);
    }

    pub fn add(&self, stat_type: StatType, detail: &'static str, value: u64) {
        self.add_dir(stat_type, detail, Direction::In, value);
    }

    pub fn add_dir(
        &self,
        stat_type: StatType,
        detail: &'static str,
        direction: Direction,
        value: u64,
    ) {
        let key = CounterKey {
            stat_type,
            detail,
            direction,
        };
        if let Some(counter) = self.counters.read().unwrap().get(&key) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        let mut counters = self.counters.write().unwrap();
        counters
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn count(&self, stat_type: StatType, detail: &'static str) -> u64 {
        self.count_dir(stat_type, detail, Direction::In)
    }

    pub fn count_dir(
        &self,
        stat_type: StatType,
        detail: &'static str,
        direction: Direction,
    ) -> u64 {
        let key = CounterKey {
            stat_type,
            detail,
            direction,
        };
        self.counters
            .read()
            .unwrap()
            .get(&key)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All non-zero counters, sorted by name. For tests and the shutdown
    /// log line.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .counters
            .read()
            .unwrap()
            .iter()
            .map(|(key, counter)| {
                let direction = match key.direction {
                    Direction::In => "in",
                    Direction::Out => "out",
                };
                (
                    format!("{}.{}.{}", key.stat_type.as_str(), key.detail, direction),
                    counter.load(Ordering::Relaxed),
                )
            })
            .filter(|(_, value)| *value > 0)
            .collect();
        entries.sort();
        entries
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
