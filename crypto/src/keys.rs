//! Ed25519 key generation.

use ed25519_dalek::SigningKey;
use quill_types::Account;
use rand::rngs::OsRng;
use rand::RngCore;

/// An ed25519 key pair. The public key doubles as the account identity.
#[derive(Clone)]
pub struct KeyPair {
    pub public: Account,
    pub private: [u8; 32],
}

impl KeyPair {
    pub fn account(&self) -> Account {
        self.public
    }
}

/// Generate a new key pair from the OS random source.
pub fn generate_keypair() -> KeyPair {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    keypair_from_seed(&seed)
}

/// Derive a deterministic key pair from a 32-byte seed.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    let signing_key = SigningKey::from_bytes(seed);
    let public = Account::from_bytes(signing_key.verifying_key().to_bytes());
    KeyPair {
        public,
        private: *seed,
    }
}
