//! User-visible error log.
//!
//! The bridge appends; the UI reads and dismisses entries one at a time.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Append-only (from the bridge) list of error messages.
#[derive(Clone)]
pub struct ErrorLog {
    entries: Arc<StdMutex<Vec<String>>>,
    changed: Arc<watch::Sender<usize>>,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorLog {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            entries: Arc::new(StdMutex::new(Vec::new())),
            changed: Arc::new(changed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, message: impl Into<String>) {
        let len = {
            let mut entries = self.lock();
            entries.push(message.into());
            entries.len()
        };
        self.changed.send_replace(len);
    }

    /// Remove the entry at `index`, as the UI's dismiss button does.
    pub fn dismiss(&self, index: usize) -> Option<String> {
        let (removed, len) = {
            let mut entries = self.lock();
            if index >= entries.len() {
                return None;
            }
            let removed = entries.remove(index);
            (removed, entries.len())
        };
        self.changed.send_replace(len);
        Some(removed)
    }

    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Receiver that observes the entry count after every change.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.changed.subscribe()
    }
}

impl std::fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.lock().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_dismiss_in_order() {
        let log = ErrorLog::new();
        log.push("first");
        log.push("second");
        log.push("third");

        assert_eq!(log.dismiss(1), Some("second".to_string()));
        assert_eq!(log.entries(), vec!["first", "third"]);
        assert_eq!(log.dismiss(5), None);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn clones_share_entries() {
        let log = ErrorLog::new();
        let ui = log.clone();
        log.push("boom");
        assert_eq!(ui.entries(), vec!["boom"]);
        ui.dismiss(0);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let log = ErrorLog::new();
        let mut rx = log.subscribe();
        log.push("boom");
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
    }
}
