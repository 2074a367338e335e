//! Ed25519 message signing and verification.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use quill_types::{Account, Signature};

use crate::keys::KeyPair;

/// Sign a message, returning the signature.
pub fn sign_message(message: &[u8], keypair: &KeyPair) -> Signature {
    let signing_key = SigningKey::from_bytes(&keypair.private);
    Signature(signing_key.sign(message).to_bytes())
}

/// Verify a signature against a message and the signing account.
///
/// Returns `true` if the signature is valid. Undecodable public keys and
/// non-canonical signatures verify as `false`, never as errors.
pub fn verify_signature(message: &[u8], signature: &Signature, account: &Account) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(account.as_bytes()) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying_key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_keypair, keypair_from_seed};

    #[test]
    fn sign_and_verify() {
        let kp = generate_keypair();
        let msg = b"quill block hash";
        let sig = sign_message(msg, &kp);
        assert!(verify_signature(msg, &sig, &kp.public));
    }

    #[test]
    fn wrong_message_fails() {
        let kp = generate_keypair();
        let sig = sign_message(b"correct", &kp);
        assert!(!verify_signature(b"wrong", &sig, &kp.public));
    }

    #[test]
    fn wrong_key_fails() {
        let kp1 = generate_keypair();
        let kp2 = generate_keypair();
        let sig = sign_message(b"msg", &kp1);
        assert!(!verify_signature(b"msg", &sig, &kp2.public));
    }

    #[test]
    fn deterministic_for_same_seed() {
        let kp = keypair_from_seed(&[9u8; 32]);
        assert_eq!(
            sign_message(b"x", &kp).as_bytes(),
            sign_message(b"x", &kp).as_bytes()
        );
    }

    #[test]
    fn invalid_public_key_rejected() {
        let kp = generate_keypair();
        let sig = sign_message(b"msg", &kp);
        let bad = Account::from_bytes([0xFF; 32]);
        assert!(!verify_signature(b"msg", &sig, &bad));
    }
}
