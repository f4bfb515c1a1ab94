//! Encrypted settings persistence.
//!
//! A single key→JSON map, encrypted at rest with AES-256-GCM under a fixed
//! application key, stored in the app config directory. Opened once at
//! startup and flushed on every mutation. Only the privileged bridge
//! touches it; the webview goes through the `store_*` commands.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, OsRng},
    AeadCore, Aes256Gcm, Key, KeyInit, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::warn;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tauri::{AppHandle, Manager};

const STORE_FILE: &str = "suna-config.dat";
const ENVELOPE_VERSION: u8 = 1;

// Fixed application key, matching the settings files written by earlier
// desktop builds. This obfuscates at-rest data; it is not a secrecy
// boundary against an attacker with local file access.
const ENCRYPTION_KEY: &str = "suna-desktop-encryption-key-v1";

static STORE_KEY: Lazy<[u8; 32]> = Lazy::new(|| Sha256::digest(ENCRYPTION_KEY.as_bytes()).into());

#[derive(Serialize, Deserialize)]
struct EncryptedEnvelope {
    ciphertext: String,
    nonce: String,
    version: u8,
}

pub struct SettingsStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl SettingsStore {
    /// Opens (or creates) the store under the app config directory.
    /// `SUNA_DATA_DIR` overrides the location, mirroring dev workflows.
    pub fn initialise(app: &AppHandle) -> Result<Self> {
        let dir = match env::var("SUNA_DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
            _ => app
                .path()
                .app_config_dir()
                .ok()
                .or_else(|| dirs::config_dir().map(|base| base.join("suna")))
                .context("failed to resolve a config directory for the settings store")?,
        };
        Self::with_path(dir.join(STORE_FILE))
    }

    pub fn with_path(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to prepare {}", parent.display()))?;
        }
        let values = Self::load(&path);
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    /// Last write wins; the file is rewritten on every mutation.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    /// Deleting an absent key is a successful no-op.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock();
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.flush(&values)
    }

    fn load(path: &Path) -> Map<String, Value> {
        if !path.exists() {
            return Map::new();
        }
        match Self::read_encrypted(path) {
            Ok(values) => values,
            Err(err) => {
                // An unreadable store is recovered locally: start empty
                // rather than refuse to launch.
                warn!(
                    "[settings] discarding unreadable store at {}: {err:#}",
                    path.display()
                );
                Map::new()
            }
        }
    }

    fn read_encrypted(path: &Path) -> Result<Map<String, Value>> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let envelope: EncryptedEnvelope =
            serde_json::from_str(&raw).context("settings file is not a valid envelope")?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(anyhow!(
                "unsupported settings envelope version {}",
                envelope.version
            ));
        }

        let ciphertext = BASE64
            .decode(envelope.ciphertext)
            .context("invalid ciphertext encoding")?;
        let nonce_bytes = BASE64
            .decode(envelope.nonce)
            .context("invalid nonce encoding")?;
        if nonce_bytes.len() != 12 {
            return Err(anyhow!("invalid nonce length {}", nonce_bytes.len()));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*STORE_KEY));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| anyhow!("settings decryption failed"))?;

        serde_json::from_slice(&plaintext).context("decrypted settings are not a JSON object")
    }

    fn flush(&self, values: &Map<String, Value>) -> Result<()> {
        let plaintext = serde_json::to_vec(values).context("failed to serialise settings")?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*STORE_KEY));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| anyhow!("settings encryption failed"))?;

        let envelope = EncryptedEnvelope {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce),
            version: ENVELOPE_VERSION,
        };
        let json = serde_json::to_string(&envelope).context("failed to serialise envelope")?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to persist settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn set_get_delete_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = SettingsStore::with_path(tmp.path().join(STORE_FILE)).unwrap();

        store.set("theme", json!("dark")).unwrap();
        assert_eq!(store.get("theme"), Some(json!("dark")));

        store.delete("theme").unwrap();
        assert_eq!(store.get("theme"), None);

        // Deleting again is still a success.
        store.delete("theme").unwrap();
    }

    #[test]
    fn values_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STORE_FILE);

        let store = SettingsStore::with_path(path.clone()).unwrap();
        store
            .set("session", json!({ "token": "abc", "expires": 1_700_000_000 }))
            .unwrap();
        drop(store);

        let reopened = SettingsStore::with_path(path).unwrap();
        assert_eq!(
            reopened.get("session"),
            Some(json!({ "token": "abc", "expires": 1_700_000_000 }))
        );
    }

    #[test]
    fn file_on_disk_is_not_plaintext() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STORE_FILE);

        let store = SettingsStore::with_path(path.clone()).unwrap();
        store.set("apiKey", json!("super-secret-value")).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("super-secret-value"));
    }

    #[test]
    fn corrupt_file_falls_back_to_empty_store() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STORE_FILE);
        fs::write(&path, "definitely not an envelope").unwrap();

        let store = SettingsStore::with_path(path).unwrap();
        assert_eq!(store.get("anything"), None);

        // And the store is usable afterwards.
        store.set("anything", json!(true)).unwrap();
        assert_eq!(store.get("anything"), Some(json!(true)));
    }
}
