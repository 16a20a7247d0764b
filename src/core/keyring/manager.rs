// src/core/keyring/manager.rs

//! The key manager: in-memory key material, the active key, and
//! HMAC-SHA256 sign/verify of workload-identity claims.

use super::Keystore;
use crate::core::FlotillaError;
use crate::core::model::claims::ClaimsHeader;
use crate::core::model::{IdentityClaims, RootKey, RootKeyAlgorithm, RootKeyMeta};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const CLAIMS_ALGORITHM: &str = "hmac-sha256";

pub struct KeyManager {
    keystore: Keystore,
    keys: RwLock<HashMap<String, RootKey>>,
    active_id: RwLock<Option<String>>,
}

impl KeyManager {
    /// Restores all on-disk keys. Pairing with replicated metadata happens
    /// later via `pair_with_metas`, once the FSM state is available.
    pub async fn open(keystore: Keystore) -> Result<Self, FlotillaError> {
        let keys = keystore.load_all().await?;
        Ok(Self {
            keystore,
            keys: RwLock::new(keys),
            active_id: RwLock::new(None),
        })
    }

    /// Reconciles on-disk keys with replicated metadata. A key without
    /// metadata is logged and retained; metadata without a key is returned
    /// so the caller can fetch the material from the authoritative region.
    pub fn pair_with_metas(&self, metas: &[RootKeyMeta]) -> Vec<String> {
        let mut keys = self.keys.write();
        let mut missing_material = Vec::new();

        for meta in metas {
            match keys.get_mut(&meta.id) {
                Some(key) => {
                    key.meta = meta.clone();
                    if meta.is_active() {
                        *self.active_id.write() = Some(meta.id.clone());
                    }
                }
                None => {
                    warn!(key_id = %meta.id, "replicated key metadata has no local material");
                    missing_material.push(meta.id.clone());
                }
            }
        }
        for (id, _) in keys.iter() {
            if !metas.iter().any(|m| &m.id == id) {
                warn!(key_id = %id, "local key material has no replicated metadata; retaining");
            }
        }
        missing_material
    }

    /// Generates, persists, and activates a fresh key. Returns its metadata
    /// for the raft write.
    pub async fn rotate(
        &self,
        algorithm: RootKeyAlgorithm,
    ) -> Result<RootKeyMeta, FlotillaError> {
        let key = RootKey::generate(algorithm)?;
        self.keystore.save(&key).await?;
        let meta = key.meta.clone();
        self.add_key(key);
        Ok(meta)
    }

    /// Inserts a key into memory, activating it when its metadata says so.
    pub fn add_key(&self, key: RootKey) {
        if key.meta.is_active() {
            *self.active_id.write() = Some(key.meta.id.clone());
        }
        self.keys.write().insert(key.meta.id.clone(), key);
    }

    /// Persists a key fetched from another region.
    pub async fn add_fetched_key(&self, key: RootKey) -> Result<(), FlotillaError> {
        self.keystore.save(&key).await?;
        self.add_key(key);
        Ok(())
    }

    pub fn active_key(&self) -> Option<RootKey> {
        let id = self.active_id.read().clone()?;
        self.keys.read().get(&id).cloned()
    }

    pub fn key_by_id(&self, id: &str) -> Option<RootKey> {
        self.keys.read().get(id).cloned()
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.keys.read().keys().cloned().collect()
    }

    /// Signs claims with the active key into the compact three-part form
    /// `b64(header).b64(claims).b64(mac)`.
    pub fn sign_claims(&self, claims: &IdentityClaims) -> Result<String, FlotillaError> {
        let key = self
            .active_key()
            .ok_or_else(|| FlotillaError::Internal("no active root key".to_string()))?;
        let header = ClaimsHeader {
            key_id: key.meta.id.clone(),
            algorithm: CLAIMS_ALGORITHM.to_string(),
        };
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = HmacSha256::new_from_slice(&key.material)
            .map_err(|e| FlotillaError::Internal(format!("hmac init: {e}")))?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verifies a signed identity and returns its claims. The signature is
    /// checked with the key named in the header, whichever state it is in;
    /// expiry is the caller's concern.
    pub fn verify_claims(&self, token: &str) -> Result<IdentityClaims, FlotillaError> {
        let mut parts = token.splitn(3, '.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(FlotillaError::InvalidRequest(
                "malformed signed identity".to_string(),
            ));
        };

        let header: ClaimsHeader = serde_json::from_slice(
            &URL_SAFE_NO_PAD
                .decode(header_b64.as_bytes())
                .map_err(|_| FlotillaError::InvalidRequest("malformed identity header".to_string()))?,
        )?;
        let key = self
            .key_by_id(&header.key_id)
            .ok_or_else(|| FlotillaError::InvalidRequest("unknown signing key".to_string()))?;

        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64.as_bytes())
            .map_err(|_| FlotillaError::InvalidRequest("malformed identity signature".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&key.material)
            .map_err(|e| FlotillaError::Internal(format!("hmac init: {e}")))?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| FlotillaError::PermissionDenied)?;

        let claims: IdentityClaims = serde_json::from_slice(
            &URL_SAFE_NO_PAD
                .decode(claims_b64.as_bytes())
                .map_err(|_| FlotillaError::InvalidRequest("malformed identity claims".to_string()))?,
        )?;
        Ok(claims)
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("keys", &self.keys.read().len())
            .field("active_id", &*self.active_id.read())
            .finish()
    }
}
