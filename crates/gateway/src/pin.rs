//! PIN storage and verification.
//!
//! The PIN gates high-risk permission kinds. Only the argon2id hash is
//! stored, at `pin.json` under the instance root with 0600 permissions.

use std::path::{Path, PathBuf};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::{Deserialize, Serialize};

use sy_domain::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct PinRecord {
    hash: String,
}

pub struct PinStore {
    path: PathBuf,
}

impl PinStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("pin.json"),
        }
    }

    pub fn is_set(&self) -> bool {
        self.path.exists()
    }

    /// Hash and store a new PIN.
    pub fn set(&self, pin: &str) -> Result<()> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(pin.as_bytes(), &salt)
            .map_err(|e| Error::Other(format!("hashing PIN: {e}")))?
            .to_string();

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec(&PinRecord { hash })?;
        std::fs::write(&self.path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Verify a PIN attempt. False when no PIN is stored.
    pub fn verify(&self, pin: &str) -> bool {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return false;
        };
        let Ok(record) = serde_json::from_str::<PinRecord>(&raw) else {
            tracing::warn!(path = %self.path.display(), "malformed pin.json");
            return false;
        };
        let Ok(parsed) = PasswordHash::new(&record.hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok()
    }
}
