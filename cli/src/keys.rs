//! Key issuance for new accounts.
//!
//! The ledger treats public keys as opaque bytes; this module plays the role
//! of the external issuer. Secret keys are stored hex-encoded under
//! `<data_dir>/keys/<username>.key` and reused if already present.

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::{SigningKey, VerifyingKey};
use veritas_chain::{ChainError, Result};

/// An Ed25519 signing keypair.
pub struct Keypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    fn from_secret_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| ChainError::Serialization(format!("bad key file: {e}")))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChainError::Serialization("secret key must be 32 bytes".into()))?;
        let signing_key = SigningKey::from_bytes(&secret);
        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Public key bytes attached to a RegisterUser transaction.
    pub fn public_bytes(&self) -> Vec<u8> {
        self.verifying_key.to_bytes().to_vec()
    }
}

/// Usernames become file names, so only `[A-Za-z0-9_-]` and non-leading
/// dots are allowed.
fn check_username(username: &str) -> Result<()> {
    let allowed = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if username.is_empty() || username.starts_with('.') || !allowed {
        return Err(ChainError::InvalidTransaction(format!(
            "username {username:?} may only contain letters, digits, '_', '-' and '.'"
        )));
    }
    Ok(())
}

fn key_path(data_dir: &Path, username: &str) -> PathBuf {
    data_dir.join("keys").join(format!("{username}.key"))
}

/// Load the user's keypair, issuing and saving a new one if none exists.
/// Returns the keypair and whether it was freshly issued.
pub fn issue(data_dir: &Path, username: &str) -> Result<(Keypair, bool)> {
    check_username(username)?;
    let path = key_path(data_dir, username);
    if path.exists() {
        let keypair = Keypair::from_secret_hex(&fs::read_to_string(&path)?)?;
        return Ok((keypair, false));
    }

    let keypair = Keypair::generate();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, hex::encode(keypair.signing_key.to_bytes()))?;
    Ok((keypair, true))
}
