//! Pending request table - tracks in-flight deferred queries.
//!
//! An entry exists exactly while a query's deferred result is outstanding.
//! Entries are removed by dropping the [`PendingGuard`] returned on insertion,
//! so a query task that fails, panics or is aborted still cleans up.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::endpoint::CancelHandle;
use crate::error::BridgeError;

struct PendingEntry {
    cancel: Option<CancelHandle>,
    started_at: Instant,
}

/// In-flight queries keyed by the identifier the backend supplied.
#[derive(Default)]
pub struct PendingRequests {
    entries: DashMap<String, PendingEntry>,
}

impl PendingRequests {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Track `identifier` until the returned guard is dropped.
    ///
    /// An identifier that is already in flight is rejected; the existing
    /// entry and its cancel handle are left untouched.
    pub fn register(
        self: &Arc<Self>,
        identifier: &str,
        cancel: Option<CancelHandle>,
    ) -> Result<PendingGuard, BridgeError> {
        match self.entries.entry(identifier.to_string()) {
            Entry::Occupied(_) => Err(BridgeError::DuplicateIdentifier(identifier.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    cancel,
                    started_at: Instant::now(),
                });
                Ok(PendingGuard {
                    identifier: identifier.to_string(),
                    table: Arc::clone(self),
                })
            }
        }
    }

    /// Invoke the cancel handle for `identifier`.
    ///
    /// The entry stays until the query settles.
    pub fn cancel(&self, identifier: &str) -> Result<(), BridgeError> {
        let handle = match self.entries.get(identifier) {
            None => return Err(BridgeError::NoCancellation(identifier.to_string())),
            Some(entry) => entry.cancel.clone(),
        };

        let handle = handle.ok_or_else(|| BridgeError::NotCancellable(identifier.to_string()))?;
        handle.cancel();
        Ok(())
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Removes its entry from the pending table on drop.
pub struct PendingGuard {
    identifier: String,
    table: Arc<PendingRequests>,
}

impl PendingGuard {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some((_, entry)) = self.table.entries.remove(&self.identifier) {
            tracing::trace!(
                identifier = %self.identifier,
                elapsed_ms = entry.started_at.elapsed().as_millis() as u64,
                "Query settled"
            );
        }
    }
}
