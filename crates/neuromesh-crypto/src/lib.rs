//! Neuromesh Crypto -- secp256k1 node identity and authenticated-request
//! signing.
//!
//! A node's long-lived identity is a secp256k1 keypair; the node id is the
//! base58 form of the SHA-256 of the compressed public key. Outgoing control
//! requests that require sender authentication carry an ECDSA signature over
//! the double SHA-256 of the request's identifying fields.

use sha2::{Digest, Sha256};

pub mod identity;
pub mod signer;

pub use identity::NodeIdentity;
pub use libsecp256k1::PublicKey;
pub use signer::{RequestSignature, RequestSigner};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid secret key material")]
    InvalidKey,
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 applied twice, the digest signed requests are taken over.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Random opaque identifier for sessions and request nonces:
/// base58 over 16 random bytes.
pub fn random_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bs58::encode(bytes).into_string()
}
