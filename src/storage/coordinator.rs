//! Single logical storage surface over ordered read and write backend lists.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use super::{BackendKind, SecureStore, SimpleStore, TokenStorage};
use crate::error::SdkError;
use crate::token::AccessToken;

/// Coordinates reads and writes across the registered storage backends.
///
/// Reads walk `read_order` and stop at the first backend holding a token (the
/// earliest-listed backend wins; conflicting tokens are never merged). Writes
/// fan out to every backend in `write_order`: the aggregate result is the AND
/// of the individual results, and every write is attempted regardless of
/// earlier failures so one broken backend cannot starve the healthy ones.
///
/// The coordinator adds no locking of its own beyond deciding which backends
/// to call; each backend serializes its own I/O.
pub struct TokenStore {
    identifier: String,
    read_order: Vec<BackendKind>,
    write_order: Vec<BackendKind>,
    backends: HashMap<BackendKind, Arc<dyn TokenStorage>>,
}

impl TokenStore {
    /// Build a store over the default backend implementations, instantiating
    /// each kind referenced by either list exactly once.
    pub fn new(
        identifier: impl Into<String>,
        read_order: Vec<BackendKind>,
        write_order: Vec<BackendKind>,
    ) -> Result<Self, SdkError> {
        let mut backends: HashMap<BackendKind, Arc<dyn TokenStorage>> = HashMap::new();
        for kind in read_order.iter().chain(write_order.iter()) {
            if backends.contains_key(kind) {
                continue;
            }
            let backend: Arc<dyn TokenStorage> = match kind {
                BackendKind::SecureStore => Arc::new(SecureStore::new()),
                BackendKind::SimpleStore => Arc::new(SimpleStore::new()?),
            };
            backends.insert(*kind, backend);
        }
        Self::with_backends(identifier, read_order, write_order, backends)
    }

    /// Build a store over explicit backend instances.
    ///
    /// Every kind appearing in either list must have an instance in the
    /// mapping.
    pub fn with_backends(
        identifier: impl Into<String>,
        read_order: Vec<BackendKind>,
        write_order: Vec<BackendKind>,
        backends: HashMap<BackendKind, Arc<dyn TokenStorage>>,
    ) -> Result<Self, SdkError> {
        for kind in read_order.iter().chain(write_order.iter()) {
            if !backends.contains_key(kind) {
                return Err(SdkError::InvalidParam(format!(
                    "no backend instance registered for {kind:?}"
                )));
            }
        }
        Ok(Self {
            identifier: identifier.into(),
            read_order,
            write_order,
            backends,
        })
    }

    /// Return the token from the first read backend that has one.
    pub fn load(&self) -> Option<AccessToken> {
        self.load_with_source().map(|(token, _)| token)
    }

    /// Like [`load`](Self::load), but after a hit the found token is written
    /// into every write backend other than the one that produced it, healing
    /// backends that lost their copy. Replication failures are logged and
    /// swallowed.
    pub fn load_and_replicate(&self) -> Option<AccessToken> {
        let (token, source) = self.load_with_source()?;
        for kind in &self.write_order {
            if *kind == source {
                continue;
            }
            if let Err(e) = self.backends[kind].put(&self.identifier, &token) {
                warn!("Replicating token to {kind:?} failed: {e}");
            }
        }
        Some(token)
    }

    fn load_with_source(&self) -> Option<(AccessToken, BackendKind)> {
        for kind in &self.read_order {
            match self.backends[kind].get(&self.identifier) {
                Ok(Some(token)) => {
                    debug!("Token loaded from {kind:?}");
                    return Some((token, *kind));
                }
                Ok(None) => {}
                Err(e) => warn!("Token read from {kind:?} failed: {e}"),
            }
        }
        None
    }

    /// Write the token to every write backend. False if any backend failed;
    /// the remaining backends are still attempted.
    pub fn store(&self, token: &AccessToken) -> bool {
        self.write_all(token, |backend, id, token| backend.put(id, token), "store")
    }

    /// Same aggregation semantics as [`store`](Self::store), using each
    /// backend's update operation.
    pub fn update(&self, token: &AccessToken) -> bool {
        self.write_all(
            token,
            |backend, id, token| backend.update(id, token),
            "update",
        )
    }

    /// Delete the record from every registered backend, read or write set, so
    /// no stale copy can resurface from a backend outside the write list.
    pub fn remove(&self) {
        for (kind, backend) in &self.backends {
            if let Err(e) = backend.remove(&self.identifier) {
                warn!("Token removal from {kind:?} failed: {e}");
            }
        }
    }

    fn write_all<F>(&self, token: &AccessToken, op: F, what: &str) -> bool
    where
        F: Fn(&dyn TokenStorage, &str, &AccessToken) -> Result<(), SdkError>,
    {
        let mut ok = true;
        for kind in &self.write_order {
            if let Err(e) = op(self.backends[kind].as_ref(), &self.identifier, token) {
                warn!("Token {what} to {kind:?} failed: {e}");
                ok = false;
            }
        }
        ok
    }
}
