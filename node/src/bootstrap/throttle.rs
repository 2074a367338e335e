//! Adaptive bootstrap throttle.
//!
//! A fixed window of success/failure samples from recent responses. When
//! a full window holds no successes the requester is wasting bandwidth
//! and backs off. The window is resized as the ledger grows
//! (`throttle_coefficient * sqrt(block_count)`, floor 16).

use std::collections::VecDeque;

pub struct Throttle {
    samples: VecDeque<bool>,
    successes: usize,
    window: usize,
}

impl Throttle {
    pub fn new(window: usize) -> Self {
        debug_assert!(window > 0);
        Self {
            samples: VecDeque::with_capacity(window),
            successes: 0,
            window,
        }
    }

    pub fn add(&mut self, success: bool) {
        if self.samples.len() >= self.window {
            if let Some(old) = self.samples.pop_front() {
                if old {
                    self.successes -= 1;
                }
            }
        }
        self.samples.push_back(success);
        if success {
            self.successes += 1;
        }
    }

    /// Throttled when a full window produced nothing useful.
    pub fn throttled(&self) -> bool {
        self.successes == 0 && self.samples.len() >= self.window
    }

    pub fn resize(&mut self, window: usize) {
        debug_assert!(window > 0);
        self.window = window;
        while self.samples.len() > window {
            if let Some(old) = self.samples.pop_front() {
                if old {
                    self.successes -= 1;
                }
            }
        }
    }

    pub fn size(&self) -> usize {
        self.window
    }

    pub fn successes(&self) -> usize {
        self.successes
    }
}

/// Window size scaling: `coefficient * sqrt(block_count)`, floor 16.
pub fn compute_throttle_size(block_count: u64, coefficient: usize) -> usize {
    let scaled = coefficient * (block_count as f64).sqrt() as usize;
    scaled.max(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_throttled_until_window_fills() {
        let mut throttle = Throttle::new(3);
        throttle.add(false);
        throttle.add(false);
        assert!(!throttle.throttled());
        throttle.add(false);
        assert!(throttle.throttled());
    }

    #[test]
    fn any_success_in_window_unthrottles() {
        let mut throttle = Throttle::new(3);
        for _ in 0..3 {
            throttle.add(false);
        }
        assert!(throttle.throttled());
        throttle.add(true);
        assert!(!throttle.throttled());
        // The success ages out of the window again.
        throttle.add(false);
        throttle.add(false);
        throttle.add(false);
        assert!(throttle.throttled());
    }

    #[test]
    fn resize_discards_oldest_samples() {
        let mut throttle = Throttle::new(4);
        throttle.add(true);
        throttle.add(false);
        throttle.add(false);
        throttle.add(false);
        throttle.resize(3);
        // The single success fell out of the shrunken window.
        assert_eq!(throttle.successes(), 0);
        assert!(throttle.throttled());
    }

    #[test]
    fn throttle_size_scales_with_sqrt() {
        assert_eq!(compute_throttle_size(0, 16), 16);
        assert_eq!(compute_throttle_size(100, 16), 160);
        assert_eq!(compute_throttle_size(10_000, 16), 1600);
    }
}
