//! Durable token storage: backend capability, record format, and the
//! multi-backend coordinator.

mod coordinator;
mod secure;
mod simple;

pub use coordinator::TokenStore;
pub use secure::SecureStore;
pub use simple::SimpleStore;

use serde::{Deserialize, Serialize};

use crate::error::SdkError;
use crate::token::AccessToken;

/// Version written into every persisted record. Records with a different
/// version are treated as absent on read so the token shape can evolve.
pub const SCHEMA_VERSION: u32 = 1;

/// Capability implemented by every durable token store.
///
/// Absence of a record is a normal outcome of [`get`](TokenStorage::get),
/// never an error. [`put`](TokenStorage::put) and
/// [`update`](TokenStorage::update) are both create-or-replace; they are kept
/// as separate operations so a backend can apply different durability or
/// locking behavior for a first write versus a refresh write.
/// Implementations must tolerate concurrent calls.
pub trait TokenStorage: Send + Sync {
    fn get(&self, identifier: &str) -> Result<Option<AccessToken>, SdkError>;
    fn put(&self, identifier: &str, token: &AccessToken) -> Result<(), SdkError>;
    fn update(&self, identifier: &str, token: &AccessToken) -> Result<(), SdkError>;
    /// Best-effort delete; absence of the record is not an error.
    fn remove(&self, identifier: &str) -> Result<(), SdkError>;
}

/// Closed set of built-in backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Operating-system credential store (keychain / credential manager).
    SecureStore,
    /// Plain key-value record in the application data directory.
    SimpleStore,
}

/// Serialized form of a token record, shared by all backends.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredTokenRecord {
    pub version: u32,
    #[serde(flatten)]
    pub token: AccessToken,
}

impl StoredTokenRecord {
    pub(crate) fn encode(token: &AccessToken) -> Result<String, SdkError> {
        let record = StoredTokenRecord {
            version: SCHEMA_VERSION,
            token: token.clone(),
        };
        serde_json::to_string(&record)
            .map_err(|e| SdkError::Storage(format!("failed to encode token record: {e}")))
    }

    /// Decode a record from JSON, treating unknown schema versions as absent.
    pub(crate) fn decode(raw: &str) -> Result<Option<AccessToken>, SdkError> {
        let record: StoredTokenRecord = serde_json::from_str(raw)
            .map_err(|e| SdkError::Storage(format!("corrupt token record: {e}")))?;
        if record.version != SCHEMA_VERSION {
            log::warn!(
                "Ignoring token record with unsupported schema version {}",
                record.version
            );
            return Ok(None);
        }
        Ok(Some(record.token))
    }
}
