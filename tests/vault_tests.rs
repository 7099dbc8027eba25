//! Secret vault: encryption format and failure modes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use converge::vault::{Vault, VaultError, VaultSecret};

proptest! {
    // Argon2 dominates the runtime, keep the case count small
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_round_trip(plaintext in "\\PC{0,200}") {
        let vault = Vault::new("round-trip");
        let blob = vault.encrypt(&plaintext).unwrap();
        prop_assert!(VaultSecret::is_vault(&blob));
        prop_assert_eq!(vault.decrypt(&blob).unwrap(), plaintext);
    }
}

#[test]
fn test_same_plaintext_encrypts_differently() {
    let vault = Vault::new("k");
    let a = vault.encrypt("same").unwrap();
    let b = vault.encrypt("same").unwrap();
    assert_ne!(a, b);
    assert_eq!(vault.decrypt(&a).unwrap(), vault.decrypt(&b).unwrap());
}

#[test]
fn test_tampered_ciphertext_is_rejected() {
    let vault = Vault::new("k");
    let blob = vault.encrypt("do not touch").unwrap();

    let mut lines = blob.lines();
    let header = lines.next().unwrap().to_string();
    let mut payload = BASE64.decode(lines.collect::<String>()).unwrap();
    let last = payload.len() - 1;
    payload[last] ^= 0x01;
    let tampered = format!("{}\n{}", header, BASE64.encode(&payload));

    assert!(matches!(vault.decrypt(&tampered), Err(VaultError::BadKey)));
}

#[test]
fn test_header_is_parsed_before_key_use() {
    let secret = VaultSecret::parse(&Vault::new("k").encrypt("x").unwrap()).unwrap();
    assert_eq!(secret.version(), "1.1");
    assert_eq!(secret.cipher(), "AES256-GCM");

    // an unknown version fails the same way regardless of the key
    let old = "$CONVERGE_VAULT;1.0;AES256\nAAAA";
    for vault in [Vault::new("a"), Vault::new("b")] {
        assert!(matches!(
            vault.decrypt(old),
            Err(VaultError::UnsupportedVersion { .. })
        ));
    }
}

#[test]
fn test_blob_survives_yaml() {
    let vault = Vault::new("yaml");
    let blob = vault.encrypt("in a document").unwrap();
    let document = format!(
        "password: !vault |\n  {}\n",
        blob.replace('\n', "\n  ")
    );

    let parsed: serde_yaml::Value = serde_yaml::from_str(&document).unwrap();
    let serde_yaml::Value::Tagged(tagged) = &parsed["password"] else {
        panic!("expected a tagged value, got {parsed:?}");
    };
    assert_eq!(
        vault.decrypt(tagged.value.as_str().unwrap()).unwrap(),
        "in a document"
    );
}

#[test]
fn test_key_file_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = Vault::from_key_file(dir.path().join("absent")).unwrap_err();
    assert!(matches!(missing, VaultError::KeyFile { .. }));

    let empty = dir.path().join("empty");
    std::fs::write(&empty, "\n").unwrap();
    assert!(matches!(
        Vault::from_key_file(&empty),
        Err(VaultError::MissingKey)
    ));
}
