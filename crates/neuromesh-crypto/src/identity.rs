//! Node identity -- secp256k1 keypair generation, loading, node-id
//! derivation.

use std::path::Path;

use libsecp256k1::{PublicKey, SecretKey};

use crate::CryptoError;

/// Long-lived node identity wrapping a secp256k1 keypair.
///
/// The key file holds the 32-byte secret as one hex line, created with mode
/// 0600.
pub struct NodeIdentity {
    secret: SecretKey,
    public: PublicKey,
    node_id: String,
}

impl NodeIdentity {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            // Rejection-sample until the bytes are a valid scalar; the
            // invalid range is vanishingly small.
            if let Ok(secret) = SecretKey::parse(&bytes) {
                return Self::from_secret(secret);
            }
        }
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key(&secret);
        let node_id = node_id_from_pubkey(&public);
        Self {
            secret,
            public,
            node_id,
        }
    }

    /// Load a keypair from a hex-encoded key file.
    pub fn from_file(path: &Path) -> Result<Self, CryptoError> {
        let content = std::fs::read_to_string(path)?;
        let bytes = hex::decode(content.trim())?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        let secret = SecretKey::parse(&arr).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self::from_secret(secret))
    }

    /// Load the keypair at `path`, generating and persisting one if absent.
    pub fn load_or_create(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            return Self::from_file(path);
        }

        let identity = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, hex::encode(identity.secret.serialize()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!(path = %path.display(), node_id = %identity.node_id, "generated node identity");
        Ok(identity)
    }

    /// The node's public identity string.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Compressed public key bytes (33 bytes).
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public.serialize_compressed()
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    /// The parsed public key, for signature verification.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

/// Node id derivation: base58 of SHA-256 of the compressed public key.
pub fn node_id_from_pubkey(public: &PublicKey) -> String {
    let digest = crate::sha256(&public.serialize_compressed());
    bs58::encode(digest).into_string()
}
