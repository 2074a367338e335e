//! Online representative weight tracking.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use quill_types::{Account, Amount};

/// How long a representative counts as online after its last vote.
const ONLINE_WEIGHT_CUTOFF: Duration = Duration::from_secs(5 * 60);
/// Fraction of online weight required for quorum, in percent.
const QUORUM_PERCENTAGE: u128 = 67;

/// Tracks which representatives voted recently and how much weight that
/// represents. `delta` is the quorum threshold the hinted scheduler
/// compares final tallies against.
pub struct OnlineReps {
    state: Mutex<HashMap<Account, RepState>>,
}

struct RepState {
    weight: Amount,
    last_seen: Instant,
}

impl OnlineReps {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Note a vote from `representative` carrying `weight`.
    pub fn observe(&self, representative: Account, weight: Amount) {
        let mut state = self.state.lock().unwrap();
        state.insert(
            representative,
            RepState {
                weight,
                last_seen: Instant::now(),
            },
        );
    }

    /// Total weight of representatives seen within the cutoff.
    pub fn online(&self) -> Amount {
        let mut state = self.state.lock().unwrap();
        let cutoff = Instant::now() - ONLINE_WEIGHT_CUTOFF;
        state.retain(|_, rep| rep.last_seen >= cutoff);
        state
            .values()
            .fold(Amount::ZERO, |sum, rep| {
                sum.checked_add(rep.weight).unwrap_or(Amount::MAX)
            })
    }

    /// Quorum threshold: 67% of online weight.
    pub fn delta(&self) -> Amount {
        Amount::raw(self.online().number() / 100 * QUORUM_PERCENTAGE)
    }
}

impl Default for OnlineReps {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(byte: u8) -> Account {
        Account::from_bytes([byte; 32])
    }

    #[test]
    fn no_reps_no_weight() {
        let online = OnlineReps::new();
        assert_eq!(online.online(), Amount::ZERO);
        assert_eq!(online.delta(), Amount::ZERO);
    }

    #[test]
    fn observe_accumulates_distinct_reps() {
        let online = OnlineReps::new();
        online.observe(rep(1), Amount::raw(100));
        online.observe(rep(2), Amount::raw(200));
        online.observe(rep(1), Amount::raw(100)); // refresh, not double
        assert_eq!(online.online(), Amount::raw(300));
        assert_eq!(online.delta(), Amount::raw(201));
    }
}
