//! OS keychain storage for the token-store encryption key.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use keyring::Entry;
use tracing::info;

use crate::storage::cipher::KEY_LEN;
use crate::storage::StoreCipher;

const SERVICE_NAME: &str = "sessionguard";

/// Account name under which the store key is filed
const STORE_KEY_ACCOUNT: &str = "token-store-key";

pub struct KeychainKey;

impl KeychainKey {
    /// Fetch the store key, generating and saving one on first use.
    pub fn load_or_create() -> Result<[u8; KEY_LEN]> {
        let entry = Self::entry()?;
        match entry.get_password() {
            Ok(encoded) => Self::decode(&encoded),
            Err(keyring::Error::NoEntry) => {
                let key = StoreCipher::generate_key();
                entry
                    .set_password(&STANDARD.encode(key))
                    .context("Failed to store encryption key in keychain")?;
                info!("Generated new token store key");
                Ok(key)
            }
            Err(e) => Err(e).context("Failed to retrieve encryption key from keychain"),
        }
    }

    /// Remove the store key. Anything encrypted with it becomes unreadable.
    pub fn delete() -> Result<()> {
        Self::entry()?
            .delete_credential()
            .context("Failed to delete encryption key from keychain")?;
        Ok(())
    }

    /// Check if a store key exists
    pub fn exists() -> bool {
        Self::entry()
            .map(|entry| entry.get_password().is_ok())
            .unwrap_or(false)
    }

    fn entry() -> Result<Entry> {
        Entry::new(SERVICE_NAME, STORE_KEY_ACCOUNT).context("Failed to create keyring entry")
    }

    fn decode(encoded: &str) -> Result<[u8; KEY_LEN]> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .context("Keychain entry is not valid base64")?;
        match <[u8; KEY_LEN]>::try_from(bytes.as_slice()) {
            Ok(key) => Ok(key),
            Err(_) => bail!("Keychain entry has the wrong length for a store key"),
        }
    }
}
