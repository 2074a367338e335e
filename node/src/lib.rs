//! The Quill node pipeline.
//!
//! Turns incoming blocks and votes into a consistent, confirmed ledger
//! state: block processing, ascending bootstrap (client and server),
//! election scheduling (priority and hinted), vote caching, and local
//! block broadcast, wired over the TCP channel layer.

pub mod block_broadcast;
pub mod block_processor;
pub mod bootstrap;
pub mod bootstrap_server;
pub mod config;
pub mod error;
pub mod node;
pub mod scheduler;
pub mod unchecked;

pub use block_processor::{BlockContext, BlockProcessor, BlockProcessorConfig, BlockSource};
pub use config::NodeConfig;
pub use error::NodeError;
pub use node::Node;
