//! Cross-cutting utilities: statistics counters and logging setup.

pub mod logging;
pub mod stats;

pub use logging::{init_logging, LogFormat, LogPreset};
pub use stats::{Direction, StatType, Stats};
