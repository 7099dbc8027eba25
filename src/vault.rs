//! Vault for encrypted secrets management.
//!
//! Secrets are stored as a tagged ciphertext blob:
//!
//! ```text
//! $CONVERGE_VAULT;1.1;AES256-GCM
//! <base64(salt || nonce || ciphertext+tag), wrapped at 80 columns>
//! ```
//!
//! The header carries the format version and cipher so that future key
//! rotation or algorithm changes can coexist with old secrets. Keys are
//! derived from a passphrase with Argon2id.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Leading marker identifying an encrypted blob.
pub const VAULT_MARKER: &str = "$CONVERGE_VAULT";

/// Format version written by [`Vault::encrypt`].
pub const FORMAT_VERSION: &str = "1.1";

/// Cipher identifier written by [`Vault::encrypt`].
pub const CIPHER: &str = "AES256-GCM";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const LINE_WIDTH: usize = 80;

/// Errors that can occur during vault operations
#[derive(Debug, Error)]
pub enum VaultError {
    /// Authentication of the ciphertext failed: the key is wrong.
    #[error("vault secret could not be decrypted with the supplied key")]
    BadKey,

    /// The blob is structurally malformed.
    #[error("vault payload is corrupt: {0}")]
    Corrupt(String),

    /// The blob was written by a format this build does not read.
    #[error("unsupported vault format version '{version}' with cipher '{cipher}'")]
    UnsupportedVersion { version: String, cipher: String },

    /// An encrypted value was consumed but no key was configured.
    #[error("an encrypted value was referenced but no vault key is configured")]
    MissingKey,

    #[error("failed to read vault key file '{path}': {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// A parsed, still-encrypted vault blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSecret {
    version: String,
    cipher: String,
    payload: Vec<u8>,
}

impl VaultSecret {
    /// Check whether text looks like a vault blob
    pub fn is_vault(text: &str) -> bool {
        text.trim_start().starts_with(VAULT_MARKER)
    }

    /// Parse the header and payload of a vault blob.
    ///
    /// Version support is checked here so that an old or future blob fails
    /// with [`VaultError::UnsupportedVersion`] before any key derivation.
    pub fn parse(text: &str) -> VaultResult<Self> {
        let mut lines = text.trim().lines();
        let header = lines
            .next()
            .ok_or_else(|| VaultError::Corrupt("empty vault blob".into()))?;

        let fields: Vec<&str> = header.trim().split(';').collect();
        if fields.len() != 3 || fields[0] != VAULT_MARKER {
            return Err(VaultError::Corrupt(format!("invalid header '{}'", header)));
        }

        let version = fields[1].to_string();
        let cipher = fields[2].to_string();
        if version != FORMAT_VERSION || cipher != CIPHER {
            return Err(VaultError::UnsupportedVersion { version, cipher });
        }

        let body: String = lines.map(str::trim).collect();
        let payload = BASE64
            .decode(body.as_bytes())
            .map_err(|e| VaultError::Corrupt(format!("invalid base64 payload: {}", e)))?;

        if payload.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(VaultError::Corrupt(format!(
                "payload too short ({} bytes)",
                payload.len()
            )));
        }

        Ok(Self {
            version,
            cipher,
            payload,
        })
    }

    /// Format version from the header
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Cipher identifier from the header
    pub fn cipher(&self) -> &str {
        &self.cipher
    }

    fn salt(&self) -> &[u8] {
        &self.payload[..SALT_LEN]
    }

    fn nonce(&self) -> &[u8] {
        &self.payload[SALT_LEN..SALT_LEN + NONCE_LEN]
    }

    fn ciphertext(&self) -> &[u8] {
        &self.payload[SALT_LEN + NONCE_LEN..]
    }
}

impl fmt::Display for VaultSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};{}", VAULT_MARKER, self.version, self.cipher)?;
        let encoded = BASE64.encode(&self.payload);
        for chunk in encoded.as_bytes().chunks(LINE_WIDTH) {
            // base64 output is pure ASCII
            writeln!(f)?;
            f.write_str(&String::from_utf8_lossy(chunk))?;
        }
        Ok(())
    }
}

/// Vault for encrypting/decrypting secrets with a passphrase.
///
/// Derived keys are cached per salt, so decrypting the same secret for many
/// hosts pays the Argon2 cost once.
pub struct Vault {
    passphrase: String,
    derived: Mutex<HashMap<Vec<u8>, [u8; KEY_LEN]>>,
}

impl Vault {
    /// Create a new vault with a passphrase
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
            derived: Mutex::new(HashMap::new()),
        }
    }

    /// Create a vault from a key file. Trailing newlines are ignored.
    pub fn from_key_file(path: impl AsRef<Path>) -> VaultResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| VaultError::KeyFile {
            path: path.to_path_buf(),
            source,
        })?;

        let passphrase = content.trim_end_matches(['\r', '\n']);
        if passphrase.is_empty() {
            return Err(VaultError::MissingKey);
        }

        Ok(Self::new(passphrase))
    }

    /// Encrypt plaintext into a tagged vault blob
    pub fn encrypt(&self, plaintext: &str) -> VaultResult<String> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut payload = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&salt);
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        let secret = VaultSecret {
            version: FORMAT_VERSION.to_string(),
            cipher: CIPHER.to_string(),
            payload,
        };
        Ok(secret.to_string())
    }

    /// Decrypt a vault blob
    pub fn decrypt(&self, text: &str) -> VaultResult<String> {
        let secret = VaultSecret::parse(text)?;
        self.decrypt_secret(&secret)
    }

    /// Decrypt an already parsed secret
    pub fn decrypt_secret(&self, secret: &VaultSecret) -> VaultResult<String> {
        let key = self.derive_key(secret.salt())?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

        // GCM authentication failure is indistinguishable from a wrong key.
        let plaintext = cipher
            .decrypt(Nonce::from_slice(secret.nonce()), secret.ciphertext())
            .map_err(|_| VaultError::BadKey)?;

        String::from_utf8(plaintext)
            .map_err(|_| VaultError::Corrupt("decrypted content is not valid UTF-8".into()))
    }

    fn derive_key(&self, salt: &[u8]) -> VaultResult<[u8; KEY_LEN]> {
        if let Some(key) = self.derived.lock().get(salt) {
            return Ok(*key);
        }

        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

        self.derived.lock().insert(salt.to_vec(), key);
        Ok(key)
    }
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}
