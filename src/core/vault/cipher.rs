use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Result, anyhow};
use base64::Engine;
use hmac::Mac;
use sha2::Sha256;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::platform::{NativePlatform, Platform};

type HmacSha256 = hmac::Hmac<Sha256>;

const IV_LEN: usize = 12;
const KEY_FILE: &str = "vault.key";
const KEY_CONTEXT: &[u8] = b"vieagent-vault-v1";

/// Ciphertext and IV, both base64, as stored in the `encrypted_value` and
/// `iv` columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Sealed {
    pub ciphertext: String,
    pub iv: String,
}

/// AES-256-GCM with a fresh random IV per message. The associated data binds
/// a ciphertext to the row it was written for.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn encrypt(&self, plaintext: &str, aad: &str) -> Result<Sealed> {
        let iv: [u8; IV_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(Sealed {
            ciphertext: b64.encode(&ciphertext),
            iv: b64.encode(iv),
        })
    }

    pub fn decrypt(&self, sealed: &Sealed, aad: &str) -> Result<String> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let iv = b64
            .decode(&sealed.iv)
            .map_err(|e| anyhow!("IV decode failed: {}", e))?;
        if iv.len() != IV_LEN {
            return Err(anyhow!("IV must be {} bytes, got {}", IV_LEN, iv.len()));
        }
        let ciphertext = b64
            .decode(&sealed.ciphertext)
            .map_err(|e| anyhow!("Ciphertext decode failed: {}", e))?;

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("UTF-8 decode failed: {}", e))
    }
}

fn stretch(secret: &str) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(KEY_CONTEXT)
        .map_err(|e| anyhow!("HMAC init failed: {}", e))?;
    mac.update(secret.as_bytes());
    let bytes = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

fn parse_hex_key(raw: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(raw.trim()).ok()?;
    bytes.try_into().ok()
}

pub fn generate_hex_key() -> String {
    let key: [u8; 32] = rand::random();
    hex::encode(key)
}

/// Resolve the vault master key: configured hex key, configured passphrase
/// (stretched), or the generated key file in `data_dir`.
pub fn resolve_master_key(configured: Option<&str>, data_dir: &Path) -> Result<[u8; 32]> {
    if let Some(secret) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        if secret.len() == 64
            && let Some(key) = parse_hex_key(secret)
        {
            return Ok(key);
        }
        return stretch(secret);
    }

    let key_path = data_dir.join(KEY_FILE);
    if key_path.exists() {
        let raw = std::fs::read_to_string(&key_path)?;
        return parse_hex_key(&raw)
            .ok_or_else(|| anyhow!("{} is not a 64-character hex key", key_path.display()));
    }

    std::fs::create_dir_all(data_dir)?;
    let encoded = generate_hex_key();
    let mut file = NativePlatform::create_private_file(&key_path)
        .map_err(|e| anyhow!("cannot create {}: {}", key_path.display(), e))?;
    file.write_all(encoded.as_bytes())?;
    file.sync_all()?;
    info!("Generated new vault key at {}", key_path.display());
    parse_hex_key(&encoded).ok_or_else(|| anyhow!("generated vault key is malformed"))
}
