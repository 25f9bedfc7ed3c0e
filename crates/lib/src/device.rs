//! Device identity for gateway authentication: keypair load/generate and challenge signing.
//!
//! The device id is derived from the public key (first 32 hex chars of its SHA-256),
//! so id and keypair are always regenerated together, never independently.

use anyhow::Result;
use base64::Engine;
use ed25519_dalek::Signer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Persisted device identity (deviceId, public key, private key), stored at e.g. ./device-key.json.
/// Keys are raw 32-byte ed25519 material, base64-encoded in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub device_id: String,
    pub public_key: String,
    pub private_key: String,
}

/// Derive the device id from raw public key bytes: first 32 hex chars of SHA-256.
fn derive_device_id(public_key_raw: &[u8]) -> String {
    let digest = Sha256::digest(public_key_raw);
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

fn base64url_no_pad(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

impl DeviceIdentity {
    /// Load from JSON file. Returns None if file missing or invalid.
    pub fn load(path: &Path) -> Option<Self> {
        let s = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&s).ok()
    }

    /// Save to JSON file. Creates parent dirs if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let s = serde_json::to_string_pretty(self)?;
        std::fs::write(path, s)?;
        Ok(())
    }

    /// Generate a new keypair and derive the device id from the public key.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).map_err(|e| anyhow::anyhow!("getrandom: {}", e))?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&bytes);
        let verifying_key = signing_key.verifying_key();
        let device_id = derive_device_id(verifying_key.as_bytes());
        let public_key =
            base64::engine::general_purpose::STANDARD.encode(verifying_key.as_bytes());
        let private_key = base64::engine::general_purpose::STANDARD.encode(signing_key.as_bytes());
        Ok(Self {
            device_id,
            public_key,
            private_key,
        })
    }

    /// Load the identity from `path`, or generate a fresh one when the file is
    /// missing or unreadable. The new identity is persisted best-effort: a save
    /// failure is logged and the in-memory identity stays usable for this process.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if let Some(identity) = Self::load(path) {
            log::info!("loaded device key {}...", &identity.device_id[..16.min(identity.device_id.len())]);
            return Ok(identity);
        }
        let identity = Self::generate()?;
        match identity.save(path) {
            Ok(()) => log::info!("generated new device key {}...", &identity.device_id[..16]),
            Err(e) => log::warn!("failed to save device key to {}: {}", path.display(), e),
        }
        Ok(identity)
    }

    /// Sign the payload string with the device private key; returns base64url (no padding).
    /// Ed25519 applies its own internal hashing, so the payload is signed as-is.
    pub fn sign(&self, payload: &str) -> Result<String> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(self.private_key.as_bytes())
            .map_err(|e| anyhow::anyhow!("decode private key: {}", e))?;
        let key_arr: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid private key length"))?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&key_arr);
        let sig = signing_key.sign(payload.as_bytes());
        Ok(base64url_no_pad(&sig.to_bytes()))
    }

    /// Public key in base64url (no padding) for the connect request's device block.
    pub fn public_key_base64url(&self) -> Result<String> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(self.public_key.as_bytes())
            .map_err(|e| anyhow::anyhow!("decode public key: {}", e))?;
        Ok(base64url_no_pad(&raw))
    }
}

/// Default path for the device identity file (env DEVICE_KEY_PATH overrides).
pub fn default_device_key_path() -> std::path::PathBuf {
    std::path::PathBuf::from("./device-key.json")
}
