//! Bootstrap account priority and blocking sets.
//!
//! Accounts we want blocks for carry a priority score; accounts waiting on
//! a missing source block are blocked and excluded from selection until
//! the dependency lands. An account is never in both sets. Both sets are
//! bounded; overflow evicts the least valuable entry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use quill_types::{Account, BlockHash};
use quill_utils::{StatType, Stats};
use std::sync::Arc;

use crate::config::AccountSetsConfig;

/// Priority assigned when an account first becomes interesting.
pub const PRIORITY_INITIAL: f64 = 2.0;
/// Priorities saturate here.
pub const PRIORITY_MAX: f64 = 64.0;
/// Entries decayed below this are dropped.
pub const PRIORITY_CUTOFF: f64 = 2.0;

struct PriorityEntry {
    priority: f64,
    /// When the account was last handed out; selection respects the
    /// cooldown.
    last_request: Option<Instant>,
}

struct SetsState {
    priorities: HashMap<Account, PriorityEntry>,
    blocking: HashMap<Account, BlockHash>,
}

pub struct AccountSets {
    config: AccountSetsConfig,
    stats: Arc<Stats>,
    state: Mutex<SetsState>,
}

impl AccountSets {
    pub fn new(config: AccountSetsConfig, stats: Arc<Stats>) -> Self {
        Self {
            config,
            stats,
            state: Mutex::new(SetsState {
                priorities: HashMap::new(),
                blocking: HashMap::new(),
            }),
        }
    }

    /// Raise (or create) the account's priority. Blocked accounts are left
    /// alone until their dependency resolves.
    pub fn priority_up(&self, account: &Account) {
        if account.is_zero() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.blocking.contains_key(account) {
            return;
        }
        match state.priorities.get_mut(account) {
            Some(entry) => {
                entry.priority = (entry.priority * 2.0).min(PRIORITY_MAX);
            }
            None => {
                self.stats
                    .inc(StatType::BootstrapAscendingAccounts, "prioritize");
                state.priorities.insert(
                    *account,
                    PriorityEntry {
                        priority: PRIORITY_INITIAL,
                        last_request: None,
                    },
                );
                Self::trim_priorities(&mut state, self.config.priorities_max);
            }
        }
    }

    /// Halve the account's priority; entries that decay below the cutoff
    /// are erased.
    pub fn priority_down(&self, account: &Account) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.priorities.get_mut(account) {
            entry.priority /= 2.0;
            if entry.priority < PRIORITY_CUTOFF {
                self.stats
                    .inc(StatType::BootstrapAscendingAccounts, "deprioritize");
                state.priorities.remove(account);
            }
        }
    }

    /// Mark the account blocked on `dependency`; it leaves the priority
    /// set until unblocked.
    pub fn block(&self, account: Account, dependency: BlockHash) {
        if account.is_zero() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.priorities.remove(&account);
        self.stats.inc(StatType::BootstrapAscendingAccounts, "block");
        state.blocking.insert(account, dependency);
        if state.blocking.len() > self.config.blocking_max {
            // Evict an arbitrary entry; the bound matters, not the choice.
            if let Some(evict) = state.blocking.keys().next().copied() {
                state.blocking.remove(&evict);
            }
        }
    }

    /// Unblock the account, optionally only when its recorded dependency
    /// matches `hint`. Unblocking re-inserts it into the priority set.
    pub fn unblock(&self, account: Account, hint: Option<BlockHash>) -> bool {
        let mut state = self.state.lock().unwrap();
        let matches = match (state.blocking.get(&account), hint) {
            (Some(_), None) => true,
            (Some(dependency), Some(hint)) => *dependency == hint,
            (None, _) => false,
        };
        if !matches {
            return false;
        }
        state.blocking.remove(&account);
        self.stats
            .inc(StatType::BootstrapAscendingAccounts, "unblock");
        state.priorities.insert(
            account,
            PriorityEntry {
                priority: PRIORITY_INITIAL,
                last_request: None,
            },
        );
        Self::trim_priorities(&mut state, self.config.priorities_max);
        true
    }

    /// Stamp the account's cooldown (optionally clearing it so it can be
    /// selected immediately again).
    pub fn timestamp(&self, account: &Account, reset: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.priorities.get_mut(account) {
            entry.last_request = if reset { None } else { Some(Instant::now()) };
        }
    }

    /// Select the best account: among up to `consideration_count`
    /// candidates not under cooldown, the one with the highest priority.
    /// Zero when none qualifies.
    pub fn next(&self) -> Account {
        let state = self.state.lock().unwrap();
        let cooldown = self.config.cooldown_duration();
        let now = Instant::now();
        let mut best: Option<(Account, f64)> = None;
        let mut considered = 0usize;
        for (account, entry) in state.priorities.iter() {
            if let Some(last) = entry.last_request {
                if now.duration_since(last) < cooldown {
                    continue;
                }
            }
            considered += 1;
            match best {
                Some((_, priority)) if priority >= entry.priority => {}
                _ => best = Some((*account, entry.priority)),
            }
            if considered >= self.config.consideration_count {
                break;
            }
        }
        best.map(|(account, _)| account).unwrap_or(Account::ZERO)
    }

    pub fn blocked(&self, account: &Account) -> bool {
        self.state.lock().unwrap().blocking.contains_key(account)
    }

    pub fn priority(&self, account: &Account) -> f64 {
        self.state
            .lock()
            .unwrap()
            .priorities
            .get(account)
            .map(|entry| entry.priority)
            .unwrap_or(0.0)
    }

    pub fn priority_size(&self) -> usize {
        self.state.lock().unwrap().priorities.len()
    }

    pub fn blocked_size(&self) -> usize {
        self.state.lock().unwrap().blocking.len()
    }

    fn trim_priorities(state: &mut SetsState, max: usize) {
        while state.priorities.len() > max {
            let evict = state
                .priorities
                .iter()
                .min_by(|a, b| a.1.priority.total_cmp(&b.1.priority))
                .map(|(account, _)| *account);
            match evict {
                Some(account) => {
                    state.priorities.remove(&account);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(byte: u8) -> Account {
        Account::from_bytes([byte; 32])
    }

    fn sets() -> AccountSets {
        sets_with(AccountSetsConfig::default())
    }

    fn sets_with(config: AccountSetsConfig) -> AccountSets {
        AccountSets::new(config, Arc::new(Stats::new()))
    }

    #[test]
    fn priority_up_inserts_at_initial() {
        let sets = sets();
        sets.priority_up(&account(1));
        assert_eq!(sets.priority(&account(1)), PRIORITY_INITIAL);
        assert_eq!(sets.priority_size(), 1);
    }

    #[test]
    fn priority_doubles_and_saturates() {
        let sets = sets();
        for _ in 0..10 {
            sets.priority_up(&account(1));
        }
        assert_eq!(sets.priority(&account(1)), PRIORITY_MAX);
    }

    #[test]
    fn priority_down_halves_then_erases() {
        let sets = sets();
        sets.priority_up(&account(1));
        sets.priority_up(&account(1)); // 4.0
        sets.priority_down(&account(1)); // 2.0
        assert_eq!(sets.priority(&account(1)), PRIORITY_INITIAL);
        sets.priority_down(&account(1)); // below cutoff, erased
        assert_eq!(sets.priority(&account(1)), 0.0);
        assert_eq!(sets.priority_size(), 0);
    }

    #[test]
    fn blocked_accounts_leave_the_priority_set() {
        let sets = sets();
        sets.priority_up(&account(1));
        sets.block(account(1), BlockHash::new([9; 32]));

        assert!(sets.blocked(&account(1)));
        assert_eq!(sets.priority_size(), 0);
        assert_eq!(sets.blocked_size(), 1);

        // Priority bumps are ignored while blocked.
        sets.priority_up(&account(1));
        assert_eq!(sets.priority_size(), 0);
    }

    #[test]
    fn unblock_requires_matching_hint() {
        let sets = sets();
        let dependency = BlockHash::new([9; 32]);
        sets.block(account(1), dependency);

        assert!(!sets.unblock(account(1), Some(BlockHash::new([8; 32]))));
        assert!(sets.blocked(&account(1)));

        assert!(sets.unblock(account(1), Some(dependency)));
        assert!(!sets.blocked(&account(1)));
        assert_eq!(sets.priority(&account(1)), PRIORITY_INITIAL);
    }

    #[test]
    fn unblock_without_hint_always_matches() {
        let sets = sets();
        sets.block(account(1), BlockHash::new([9; 32]));
        assert!(sets.unblock(account(1), None));
        assert!(!sets.unblock(account(1), None));
    }

    #[test]
    fn next_prefers_highest_priority() {
        let sets = sets();
        sets.priority_up(&account(1));
        sets.priority_up(&account(2));
        sets.priority_up(&account(2)); // 4.0
        assert_eq!(sets.next(), account(2));
    }

    #[test]
    fn cooldown_hides_recently_requested_accounts() {
        let sets = sets_with(AccountSetsConfig {
            cooldown: 60_000,
            ..Default::default()
        });
        sets.priority_up(&account(1));
        sets.timestamp(&account(1), false);
        assert!(sets.next().is_zero());

        sets.timestamp(&account(1), true);
        assert_eq!(sets.next(), account(1));
    }

    #[test]
    fn priorities_are_bounded() {
        let sets = sets_with(AccountSetsConfig {
            priorities_max: 2,
            ..Default::default()
        });
        sets.priority_up(&account(1));
        sets.priority_up(&account(1)); // 4.0, safest from eviction
        sets.priority_up(&account(2));
        sets.priority_up(&account(3));
        assert_eq!(sets.priority_size(), 2);
        assert_eq!(sets.priority(&account(1)), 4.0);
    }

    #[test]
    fn never_in_both_sets() {
        let sets = sets();
        sets.priority_up(&account(1));
        sets.block(account(1), BlockHash::new([9; 32]));
        assert_eq!(sets.priority_size(), 0);
        assert_eq!(sets.blocked_size(), 1);

        sets.unblock(account(1), None);
        assert_eq!(sets.priority_size(), 1);
        assert_eq!(sets.blocked_size(), 0);
    }
}
