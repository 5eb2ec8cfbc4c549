//! Simple backend: one JSON record file per identifier in the application
//! data directory.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use log::debug;

use super::{StoredTokenRecord, TokenStorage};
use crate::error::SdkError;
use crate::token::AccessToken;

pub struct SimpleStore {
    dir: PathBuf,
}

impl SimpleStore {
    /// Store records under the platform data directory.
    pub fn new() -> Result<Self, SdkError> {
        let dir = dirs::data_local_dir()
            .ok_or_else(|| SdkError::Storage("no local data directory available".into()))?
            .join("OneID");
        Ok(Self { dir })
    }

    /// Store records under an explicit directory.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{identifier}.json"))
    }
}

impl TokenStorage for SimpleStore {
    fn get(&self, identifier: &str) -> Result<Option<AccessToken>, SdkError> {
        let path = self.record_path(identifier);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SdkError::Storage(format!("failed to read {path:?}: {e}"))),
        };
        StoredTokenRecord::decode(&raw)
    }

    fn put(&self, identifier: &str, token: &AccessToken) -> Result<(), SdkError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| SdkError::Storage(format!("failed to create {:?}: {e}", self.dir)))?;
        let path = self.record_path(identifier);
        let raw = StoredTokenRecord::encode(token)?;
        fs::write(&path, raw)
            .map_err(|e| SdkError::Storage(format!("failed to write {path:?}: {e}")))?;
        debug!("Token record written to {:?}", path);
        Ok(())
    }

    fn update(&self, identifier: &str, token: &AccessToken) -> Result<(), SdkError> {
        self.put(identifier, token)
    }

    fn remove(&self, identifier: &str) -> Result<(), SdkError> {
        let path = self.record_path(identifier);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SdkError::Storage(format!("failed to delete {path:?}: {e}"))),
        }
    }
}
