// src/core/keyring/keystore.rs

//! On-disk persistence of root-key material.
//!
//! Keys live at `<data_dir>/keystore/<key-id>.json`, one file per key,
//! written atomically (temp file + rename). Metadata replicates through
//! raft; only the material is local.

use crate::core::FlotillaError;
use crate::core::model::{RootKey, RootKeyAlgorithm, RootKeyMeta};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

const KEYSTORE_DIR: &str = "keystore";

/// The JSON file format: replicable metadata plus base64 material.
#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFile {
    meta: KeystoreFileMeta,
    key: KeystoreFileKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFileMeta {
    id: String,
    algorithm: RootKeyAlgorithm,
    create_index: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFileKey {
    material: String,
}

#[derive(Debug, Clone)]
pub struct Keystore {
    dir: PathBuf,
}

impl Keystore {
    /// Opens (creating if needed) the keystore directory under `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, FlotillaError> {
        let dir = data_dir.join(KEYSTORE_DIR);
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn key_path(&self, key_id: &str) -> PathBuf {
        self.dir.join(format!("{key_id}.json"))
    }

    /// Atomically persists one key: write to a temp file, then rename into
    /// place so a crash never leaves a torn key file.
    pub async fn save(&self, key: &RootKey) -> Result<(), FlotillaError> {
        let file = KeystoreFile {
            meta: KeystoreFileMeta {
                id: key.meta.id.clone(),
                algorithm: key.meta.algorithm,
                create_index: key.meta.create_index,
            },
            key: KeystoreFileKey {
                material: STANDARD.encode(&key.material),
            },
        };
        let contents = serde_json::to_vec_pretty(&file)?;

        let final_path = self.key_path(&key.meta.id);
        let tmp_path = self.dir.join(format!("{}.json.tmp", key.meta.id));
        fs::write(&tmp_path, &contents).await?;
        fs::rename(&tmp_path, &final_path).await?;
        info!(key_id = %key.meta.id, "persisted root key");
        Ok(())
    }

    /// Loads every `*.json` key file. Unparseable files are skipped with a
    /// warning rather than failing startup.
    pub async fn load_all(&self) -> Result<HashMap<String, RootKey>, FlotillaError> {
        let mut keys = HashMap::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read(&path).await?;
            let file: KeystoreFile = match serde_json::from_slice(&contents) {
                Ok(f) => f,
                Err(e) => {
                    warn!(path = %path.display(), "skipping unreadable key file: {e}");
                    continue;
                }
            };
            let material = match STANDARD.decode(file.key.material.as_bytes()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), "skipping key with bad material encoding: {e}");
                    continue;
                }
            };
            keys.insert(
                file.meta.id.clone(),
                RootKey {
                    meta: RootKeyMeta {
                        id: file.meta.id,
                        algorithm: file.meta.algorithm,
                        create_index: file.meta.create_index,
                        ..Default::default()
                    },
                    material,
                },
            );
        }
        info!(count = keys.len(), "loaded root keys from keystore");
        Ok(keys)
    }

    /// Removes a key file; missing files are fine.
    pub async fn delete(&self, key_id: &str) -> Result<(), FlotillaError> {
        match fs::remove_file(self.key_path(key_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
