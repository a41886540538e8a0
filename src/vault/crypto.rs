//! AEAD envelope and master-key material for the credential vault.
//!
//! The master key lives in the OS keychain via `keyring` where available;
//! headless environments without a keychain daemon fall back to a 0600
//! file under the vault directory. Either way, the key is only ever held
//! in memory as a `Zeroizing` buffer and is never itself persisted
//! unencrypted alongside credential data.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::io::Write as _;
use std::path::Path;
use zeroize::Zeroizing;

use crate::{CodeCoderError, Result};

const KEYRING_SERVICE: &str = "codecoder-vault";
const NONCE_LEN: usize = 12;

pub type MasterKey = Zeroizing<[u8; 32]>;

/// An encrypted blob: a random nonce prepended to the AES-256-GCM
/// ciphertext, base64-encoded for storage in the vault's JSON file.
pub struct Envelope(pub String);

pub fn load_or_create_master_key(account: &str, fallback_path: &Path) -> Result<MasterKey> {
    let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, account) else {
        return load_or_create_fallback_key(fallback_path);
    };

    match entry.get_password() {
        Ok(encoded) => decode_key(&encoded),
        Err(keyring::Error::NoEntry) => {
            let key = generate_key();
            let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, *key);
            if entry.set_password(&encoded).is_ok() {
                return Ok(key);
            }
            persist_fallback_key(&key, fallback_path)?;
            Ok(key)
        }
        Err(_) => load_or_create_fallback_key(fallback_path),
    }
}

fn load_or_create_fallback_key(path: &Path) -> Result<MasterKey> {
    if path.exists() {
        let encoded = std::fs::read_to_string(path)?;
        decode_key(encoded.trim())
    } else {
        let key = generate_key();
        persist_fallback_key(&key, path)?;
        Ok(key)
    }
}

fn persist_fallback_key(key: &MasterKey, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, **key);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(encoded.as_bytes())?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, encoded.as_bytes())?;
    }
    Ok(())
}

fn generate_key() -> MasterKey {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    Zeroizing::new(raw)
}

fn decode_key(encoded: &str) -> Result<MasterKey> {
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
        .map_err(|e| CodeCoderError::VaultCorrupt(format!("master key is not valid base64: {e}")))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CodeCoderError::VaultCorrupt("master key is not 32 bytes".to_string()))?;
    Ok(Zeroizing::new(array))
}

/// HKDF-expand the master key into a per-purpose AES-256 key. `purpose`
/// lets the vault and (eventually) other components derive independent
/// subkeys from one master secret without storing more than one secret.
pub fn derive_key(master: &MasterKey, purpose: &[u8]) -> Zeroizing<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, master.as_slice());
    let mut out = [0u8; 32];
    hk.expand(purpose, &mut out).expect("32 bytes is a valid HKDF output length");
    Zeroizing::new(out)
}

pub fn encrypt(key: &Zeroizing<[u8; 32]>, plaintext: &[u8]) -> Result<Envelope> {
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CodeCoderError::Internal(format!("cipher init failed: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CodeCoderError::Internal(format!("encryption failed: {e}")))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(Envelope(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        combined,
    )))
}

pub fn decrypt(key: &Zeroizing<[u8; 32]>, envelope: &Envelope) -> Result<Vec<u8>> {
    let combined = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &envelope.0)
        .map_err(|e| CodeCoderError::VaultCorrupt(format!("envelope is not valid base64: {e}")))?;

    if combined.len() < NONCE_LEN {
        return Err(CodeCoderError::VaultCorrupt("envelope shorter than nonce".to_string()));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CodeCoderError::Internal(format!("cipher init failed: {e}")))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CodeCoderError::VaultCorrupt("decryption failed: wrong key or tampered data".to_string()))
}
