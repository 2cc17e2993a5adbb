//! Cryptographic primitives for license storage and the heartbeat protocol.
//!
//! Three concerns live here:
//! - envelope encryption of license keys and team private keys at rest
//!   (HKDF-derived per-team DEKs, AES-256-GCM),
//! - deterministic HMAC lookup hashes so license keys can be indexed
//!   without ever being queried in plaintext,
//! - Ed25519 challenge signing so licensed software can verify it is
//!   talking to the genuine server.
//!
//! Format of encrypted data: MAGIC (4 bytes) || nonce (12 bytes) || ciphertext

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

/// Nonce size for AES-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Master key size (256 bits for AES-256)
const MASTER_KEY_SIZE: usize = 32;

/// Magic bytes to identify encrypted data
const ENCRYPTED_MAGIC: &[u8] = b"KG01";

/// HKDF salt, versioned with the storage format
const HKDF_SALT: &[u8] = b"keygate-v1";

/// Holds the master encryption key. Per-team data encryption keys and the
/// lookup HMAC key are derived from it via HKDF.
#[derive(Clone)]
pub struct MasterKey {
    key: [u8; MASTER_KEY_SIZE],
}

impl MasterKey {
    /// Create a MasterKey from a base64-encoded string.
    /// The decoded key must be exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| AppError::Internal(format!("Invalid master key encoding: {}", e)))?;

        if decoded.len() != MASTER_KEY_SIZE {
            return Err(AppError::Internal(format!(
                "Master key must be {} bytes, got {}",
                MASTER_KEY_SIZE,
                decoded.len()
            )));
        }

        let mut key = [0u8; MASTER_KEY_SIZE];
        key.copy_from_slice(&decoded);
        Ok(Self { key })
    }

    /// Generate a new random master key (for initial setup).
    /// Returns the key as a base64-encoded string.
    pub fn generate() -> String {
        use rand::RngCore;
        use rand::rngs::OsRng;
        let mut key = [0u8; MASTER_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    /// Create a MasterKey from raw bytes.
    /// Note: For production, prefer `from_base64` with a securely stored key.
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive a key using HKDF with the given info string.
    fn derive(&self, info: &[u8]) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &self.key);
        let mut out = [0u8; 32];
        hk.expand(info, &mut out)
            .expect("HKDF expand should not fail with valid length");
        out
    }

    /// Derive the per-team data encryption key.
    fn derive_dek(&self, team_id: &str) -> [u8; 32] {
        self.derive(team_id.as_bytes())
    }

    /// Encrypt data under the team's DEK.
    /// Returns: MAGIC (4 bytes) || nonce (12 bytes) || ciphertext
    pub fn encrypt(&self, team_id: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        use rand::RngCore;
        use rand::rngs::OsRng;

        let dek = self.derive_dek(team_id);
        let cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| AppError::Crypto(format!("Failed to create cipher: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| AppError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut result = Vec::with_capacity(ENCRYPTED_MAGIC.len() + NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(ENCRYPTED_MAGIC);
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    /// Decrypt data previously produced by [`encrypt`](Self::encrypt).
    ///
    /// A truncated or tampered ciphertext fails AES-GCM authentication and
    /// returns `AppError::Crypto`; garbage is never returned as plaintext.
    pub fn decrypt(&self, team_id: &str, encrypted: &[u8]) -> Result<Vec<u8>> {
        if encrypted.len() < ENCRYPTED_MAGIC.len() + NONCE_SIZE + 1 {
            return Err(AppError::Crypto("Encrypted data too short".into()));
        }

        if &encrypted[..ENCRYPTED_MAGIC.len()] != ENCRYPTED_MAGIC {
            return Err(AppError::Crypto(
                "Invalid encrypted data format (missing magic bytes)".into(),
            ));
        }

        let dek = self.derive_dek(team_id);
        let cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| AppError::Crypto(format!("Failed to create cipher: {}", e)))?;

        let nonce_start = ENCRYPTED_MAGIC.len();
        let nonce_end = nonce_start + NONCE_SIZE;
        let nonce = Nonce::from_slice(&encrypted[nonce_start..nonce_end]);
        let ciphertext = &encrypted[nonce_end..];

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::Crypto("Decryption failed (bad key or tampered data)".into()))
    }
}

/// Lookup hasher for license keys.
///
/// Produces a deterministic HMAC-SHA256 over `"{key}:{team_id}"` so that a
/// license row can be found by a unique index without storing or querying
/// the plaintext key. The HMAC key is derived from the master key, so the
/// hash is stable across restarts but cannot be inverted from the database
/// alone.
///
/// Scoping is `(team_id, hash)`, so the same plaintext key colliding across
/// teams is fine.
#[derive(Clone)]
pub struct LookupHasher {
    hmac_key: [u8; 32],
}

impl LookupHasher {
    /// Derive the lookup HMAC key from the master key.
    pub fn from_master_key(master_key: &MasterKey) -> Self {
        Self {
            hmac_key: master_key.derive(b"license-lookup"),
        }
    }

    /// Compute the lookup hash for a license key, lowercase hex.
    pub fn hash(&self, license_key: &str, team_id: &str) -> String {
        let mut mac: Hmac<Sha256> =
            Mac::new_from_slice(&self.hmac_key).expect("HMAC can take key of any size");
        mac.update(license_key.trim().as_bytes());
        mac.update(b":");
        mac.update(team_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Generate a new Ed25519 key pair for a team.
/// Returns (private_key_bytes, public_key_base64).
pub fn generate_keypair() -> (Vec<u8>, String) {
    use rand::rngs::OsRng;

    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();

    let private_bytes = signing_key.to_bytes().to_vec();
    let public_b64 = BASE64.encode(verifying_key.to_bytes());

    (private_bytes, public_b64)
}

/// Sign a client-supplied challenge with a team's Ed25519 private key.
/// Returns the signature base64-encoded.
pub fn sign_challenge(challenge: &str, private_key: &[u8]) -> Result<String> {
    let key_bytes: [u8; 32] = private_key
        .try_into()
        .map_err(|_| AppError::Crypto("Invalid private key length".into()))?;

    let signing_key = SigningKey::from_bytes(&key_bytes);
    let signature = signing_key.sign(challenge.as_bytes());

    Ok(BASE64.encode(signature.to_bytes()))
}

/// Verify a challenge signature against a team's base64 public key.
/// Used by client SDKs and tests; the server itself only signs.
pub fn verify_challenge(challenge: &str, signature_b64: &str, public_key_b64: &str) -> Result<bool> {
    let public_bytes = BASE64
        .decode(public_key_b64)
        .map_err(|e| AppError::Crypto(format!("Invalid public key encoding: {}", e)))?;
    let key_bytes: [u8; 32] = public_bytes
        .as_slice()
        .try_into()
        .map_err(|_| AppError::Crypto("Invalid public key length".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| AppError::Crypto(format!("Invalid public key: {}", e)))?;

    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| AppError::Crypto(format!("Invalid signature encoding: {}", e)))?;
    let sig_arr: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| AppError::Crypto("Invalid signature length".into()))?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_arr);

    Ok(verifying_key.verify(challenge.as_bytes(), &signature).is_ok())
}
