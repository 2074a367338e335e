//! Cryptographic primitives used by the Quill pipeline.
//!
//! Thin wrappers over blake2 and ed25519-dalek so the rest of the workspace
//! never touches the underlying crates directly.

pub mod hash;
pub mod keys;
pub mod sign;

pub use hash::{blake2b_256, blake2b_multi, work_digest};
pub use keys::{generate_keypair, keypair_from_seed, KeyPair};
pub use sign::{sign_message, verify_signature};
