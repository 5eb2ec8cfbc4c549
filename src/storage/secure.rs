//! Secure backend: token records in the operating-system credential store
//! (macOS Keychain, Windows Credential Manager, Linux Secret Service).

use keyring::Entry;

use super::{StoredTokenRecord, TokenStorage};
use crate::error::SdkError;
use crate::token::AccessToken;

/// Keyring service name under which token records are filed.
const KEYRING_SERVICE: &str = "net.oneid.sdk";

pub struct SecureStore {
    service: String,
}

impl SecureStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    /// Use a custom keyring service name instead of the SDK default.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, identifier: &str) -> Result<Entry, SdkError> {
        Entry::new(&self.service, identifier)
            .map_err(|e| SdkError::Storage(format!("keyring entry unavailable: {e}")))
    }
}

impl Default for SecureStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStorage for SecureStore {
    fn get(&self, identifier: &str) -> Result<Option<AccessToken>, SdkError> {
        match self.entry(identifier)?.get_password() {
            Ok(raw) => StoredTokenRecord::decode(&raw),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SdkError::Storage(format!("keyring read failed: {e}"))),
        }
    }

    fn put(&self, identifier: &str, token: &AccessToken) -> Result<(), SdkError> {
        let raw = StoredTokenRecord::encode(token)?;
        self.entry(identifier)?
            .set_password(&raw)
            .map_err(|e| SdkError::Storage(format!("keyring write failed: {e}")))
    }

    fn update(&self, identifier: &str, token: &AccessToken) -> Result<(), SdkError> {
        // The keyring applies create-or-replace either way.
        self.put(identifier, token)
    }

    fn remove(&self, identifier: &str) -> Result<(), SdkError> {
        match self.entry(identifier)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SdkError::Storage(format!("keyring delete failed: {e}"))),
        }
    }
}
