// src/core/model/keyring.rs

//! Root keys used to sign and verify workload identities.
//!
//! Key *material* lives only in the on-disk keystore; key *metadata*
//! replicates through the consensus log.

use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RootKeyAlgorithm {
    #[default]
    Aes256Gcm,
    Xchacha20,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RootKeyState {
    #[default]
    Active,
    Inactive,
}

/// Replicated key metadata. Exactly one meta is active at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RootKeyMeta {
    pub id: String,
    #[serde(default)]
    pub algorithm: RootKeyAlgorithm,
    #[serde(default)]
    pub state: RootKeyState,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl RootKeyMeta {
    pub fn is_active(&self) -> bool {
        self.state == RootKeyState::Active
    }
}

/// A root key with its secret material. Only ever held in memory and in the
/// keystore files; never serialized into raft entries or snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootKey {
    pub meta: RootKeyMeta,
    /// 32 bytes of key material.
    pub material: Vec<u8>,
}

impl RootKey {
    pub const MATERIAL_LEN: usize = 32;

    /// Mints a fresh key with random material.
    pub fn generate(algorithm: RootKeyAlgorithm) -> Result<Self, crate::core::FlotillaError> {
        let mut material = vec![0u8; Self::MATERIAL_LEN];
        getrandom::fill(&mut material)
            .map_err(|e| crate::core::FlotillaError::Internal(e.to_string()))?;
        Ok(Self {
            meta: RootKeyMeta {
                id: super::generate_id(),
                algorithm,
                state: RootKeyState::Active,
                ..Default::default()
            },
            material,
        })
    }
}
