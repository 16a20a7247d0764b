// src/core/keyring/mod.rs

//! Root-key management: on-disk material persistence and the sign/verify
//! operations backing signed workload identities.

pub mod keystore;
pub mod manager;

pub use keystore::Keystore;
pub use manager::KeyManager;
