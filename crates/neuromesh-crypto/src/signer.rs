//! Authenticated-request signing.
//!
//! Requests that require sender authentication (start-training,
//! stop-training) carry an extension block in the message header:
//! the origin node id, the algorithm tag and a hex-encoded ECDSA signature
//! over the double SHA-256 of the request's identifying fields, concatenated
//! in caller order.

use std::collections::BTreeMap;
use std::sync::Arc;

use libsecp256k1::{Message, PublicKey, Signature};

use crate::{double_sha256, CryptoError, NodeIdentity};

pub const SIGN_ALGO_ECDSA: &str = "ecdsa";

/// Extension-map keys carried on authenticated requests.
pub const EXTEN_ORIGIN_ID: &str = "origin_id";
pub const EXTEN_SIGN_ALGO: &str = "sign_algo";
pub const EXTEN_SIGN: &str = "sign";

/// Recovery tag base: 27 + recovery id + 4 (compressed-key form).
const RECOVERY_TAG_BASE: u8 = 31;

/// Signs outgoing requests under the node's long-lived key.
#[derive(Clone)]
pub struct RequestSigner {
    identity: Arc<NodeIdentity>,
}

/// A produced signature, ready to be packaged onto a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    pub origin_id: String,
    pub algorithm: &'static str,
    /// Hex of recovery tag byte + r + s (65 bytes).
    pub signature: String,
}

impl RequestSignature {
    /// The `exten_info` block carried on the wire.
    pub fn to_exten_info(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (EXTEN_ORIGIN_ID.to_string(), self.origin_id.clone()),
            (EXTEN_SIGN_ALGO.to_string(), self.algorithm.to_string()),
            (EXTEN_SIGN.to_string(), self.signature.clone()),
        ])
    }
}

impl RequestSigner {
    pub fn new(identity: Arc<NodeIdentity>) -> Self {
        Self { identity }
    }

    pub fn origin_id(&self) -> &str {
        self.identity.node_id()
    }

    /// Sign the given fields, concatenated in the order supplied.
    pub fn sign_request(&self, fields: &[&str]) -> RequestSignature {
        let message = fields.concat();
        let digest = double_sha256(message.as_bytes());
        let (signature, recovery_id) =
            libsecp256k1::sign(&Message::parse(&digest), self.identity.secret_key());

        let mut bytes = Vec::with_capacity(65);
        bytes.push(RECOVERY_TAG_BASE + recovery_id.serialize());
        bytes.extend_from_slice(&signature.serialize());

        RequestSignature {
            origin_id: self.identity.node_id().to_string(),
            algorithm: SIGN_ALGO_ECDSA,
            signature: hex::encode(bytes),
        }
    }

    /// Check a signature produced by [`sign_request`] against a public key.
    /// Receivers on the network do their own verification; this exists for
    /// local callers and tests.
    pub fn verify_request(
        public_key: &PublicKey,
        fields: &[&str],
        signature_hex: &str,
    ) -> Result<bool, CryptoError> {
        let bytes = hex::decode(signature_hex)?;
        if bytes.len() != 65 {
            return Err(CryptoError::InvalidSignature(format!(
                "expected 65 bytes, got {}",
                bytes.len()
            )));
        }
        let mut compact = [0u8; 64];
        compact.copy_from_slice(&bytes[1..]);
        let signature = Signature::parse_standard(&compact)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

        let message = fields.concat();
        let digest = double_sha256(message.as_bytes());
        Ok(libsecp256k1::verify(
            &Message::parse(&digest),
            &signature,
            public_key,
        ))
    }
}
