// tests/unit_keystore_test.rs

mod common;

use common::{call, test_server};
use flotilla::core::keyring::{KeyManager, Keystore};
use flotilla::core::model::{RootKey, RootKeyAlgorithm};
use serde_json::json;
use std::collections::BTreeSet;
use tempfile::TempDir;

#[tokio::test]
async fn test_keystore_round_trip_across_restart() {
    let dir = TempDir::new().unwrap();

    let mut written = BTreeSet::new();
    {
        let keystore = Keystore::open(dir.path()).await.unwrap();
        for _ in 0..3 {
            let key = RootKey::generate(RootKeyAlgorithm::Aes256Gcm).unwrap();
            written.insert(key.meta.id.clone());
            keystore.save(&key).await.unwrap();
        }
    }

    // A fresh open over the same data dir sees exactly the same keys.
    let keystore = Keystore::open(dir.path()).await.unwrap();
    let loaded = keystore.load_all().await.unwrap();
    let loaded_ids: BTreeSet<String> = loaded.keys().cloned().collect();
    assert_eq!(loaded_ids, written);
}

#[tokio::test]
async fn test_material_survives_reload_byte_for_byte() {
    let dir = TempDir::new().unwrap();
    let keystore = Keystore::open(dir.path()).await.unwrap();

    let key = RootKey::generate(RootKeyAlgorithm::Xchacha20).unwrap();
    keystore.save(&key).await.unwrap();

    let loaded = keystore.load_all().await.unwrap();
    let reloaded = loaded.get(&key.meta.id).unwrap();
    assert_eq!(reloaded.material, key.material);
    assert_eq!(reloaded.meta.algorithm, RootKeyAlgorithm::Xchacha20);
}

#[tokio::test]
async fn test_unreadable_key_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    let keystore = Keystore::open(dir.path()).await.unwrap();

    let key = RootKey::generate(RootKeyAlgorithm::Aes256Gcm).unwrap();
    keystore.save(&key).await.unwrap();
    tokio::fs::write(dir.path().join("keystore").join("garbage.json"), b"{nope")
        .await
        .unwrap();

    let loaded = keystore.load_all().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded.contains_key(&key.meta.id));
}

#[tokio::test]
async fn test_sign_verify_round_trip_after_reload() {
    let dir = TempDir::new().unwrap();

    let claims = flotilla::core::model::IdentityClaims {
        namespace: "default".to_string(),
        job_id: "api".to_string(),
        alloc_id: "a1".to_string(),
        task: "server".to_string(),
        expiry: None,
        issued_at: 0,
    };

    let signed = {
        let keystore = Keystore::open(dir.path()).await.unwrap();
        let manager = KeyManager::open(keystore).await.unwrap();
        manager.rotate(RootKeyAlgorithm::Aes256Gcm).await.unwrap();
        manager.sign_claims(&claims).unwrap()
    };

    // A restarted manager verifies identities signed before the restart.
    let keystore = Keystore::open(dir.path()).await.unwrap();
    let manager = KeyManager::open(keystore).await.unwrap();
    let verified = manager.verify_claims(&signed).unwrap();
    assert_eq!(verified, claims);
}

#[tokio::test]
async fn test_rotation_keeps_exactly_one_active() {
    let server = test_server(false).await;

    call(&server, "Keyring.Rotate", "", serde_json::Value::Null)
        .await
        .unwrap();
    call(&server, "Keyring.Rotate", "", serde_json::Value::Null)
        .await
        .unwrap();

    let (_, listed) = call(&server, "Keyring.List", "", serde_json::Value::Null)
        .await
        .unwrap();
    let keys = listed["keys"].as_array().unwrap();
    // Bootstrap key plus two rotations.
    assert_eq!(keys.len(), 3);
    let active = keys
        .iter()
        .filter(|k| k["state"] == json!("active"))
        .count();
    assert_eq!(active, 1);
}

#[tokio::test]
async fn test_rotation_still_verifies_old_identities() {
    let server = test_server(false).await;

    let claims = flotilla::core::model::IdentityClaims {
        namespace: "default".to_string(),
        job_id: "api".to_string(),
        alloc_id: "a1".to_string(),
        task: "server".to_string(),
        expiry: None,
        issued_at: 0,
    };
    let signed = server.state.key_manager.sign_claims(&claims).unwrap();

    call(&server, "Keyring.Rotate", "", serde_json::Value::Null)
        .await
        .unwrap();

    // The demoted key still verifies tokens it minted.
    let verified = server.state.key_manager.verify_claims(&signed).unwrap();
    assert_eq!(verified.alloc_id, "a1");
}
