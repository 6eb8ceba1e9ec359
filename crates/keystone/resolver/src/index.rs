//! Concurrent credential index
//!
//! Maps a public identity to the latest signed credential. Writers are
//! reconciliation workers, readers are lookup handlers; both go through a
//! sharded concurrent map so neither side blocks the other for long.
//!
//! Each entry also records whether its credential has been announced on the
//! bus, so a failed announcement is retried even when the credential itself
//! did not change.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexEntry {
    credential: String,
    announced: bool,
}

/// Identity to credential map, last writer wins per identity
#[derive(Debug, Clone, Default)]
pub struct CredentialIndex {
    entries: Arc<DashMap<String, IndexEntry>>,
}

impl CredentialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `credential` for `identity`. Returns whether the stored value changed.
    ///
    /// A changed credential starts out unannounced.
    pub fn upsert(&self, identity: impl Into<String>, credential: impl Into<String>) -> bool {
        let credential = credential.into();
        let fresh = IndexEntry {
            credential,
            announced: false,
        };
        match self.entries.entry(identity.into()) {
            Entry::Occupied(mut entry) => {
                if entry.get().credential == fresh.credential {
                    false
                } else {
                    entry.insert(fresh);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
                true
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<String> {
        self.entries
            .get(identity)
            .map(|entry| entry.value().credential.clone())
    }

    pub fn remove(&self, identity: &str) -> Option<String> {
        self.entries.remove(identity).map(|(_, entry)| entry.credential)
    }

    /// Whether the credential stored for `identity` still has to be announced
    pub fn is_pending(&self, identity: &str) -> bool {
        self.entries
            .get(identity)
            .map_or(false, |entry| !entry.value().announced)
    }

    /// Record that `credential` went out on the bus. Ignored if the entry
    /// was replaced in the meantime.
    pub fn mark_announced(&self, identity: &str, credential: &str) {
        if let Some(mut entry) = self.entries.get_mut(identity) {
            if entry.credential == credential {
                entry.announced = true;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_reports_changes() {
        let index = CredentialIndex::new();
        assert!(index.upsert("AABC", "jwt-1"));
        assert!(!index.upsert("AABC", "jwt-1"));
        assert!(index.upsert("AABC", "jwt-2"));
        assert_eq!(index.get("AABC").as_deref(), Some("jwt-2"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_pending_until_announced() {
        let index = CredentialIndex::new();
        assert!(!index.is_pending("AABC"));

        index.upsert("AABC", "jwt-1");
        assert!(index.is_pending("AABC"));

        // Stale acknowledgement for a replaced credential
        index.upsert("AABC", "jwt-2");
        index.mark_announced("AABC", "jwt-1");
        assert!(index.is_pending("AABC"));

        index.mark_announced("AABC", "jwt-2");
        assert!(!index.is_pending("AABC"));
        assert!(!index.upsert("AABC", "jwt-2"));
        assert!(!index.is_pending("AABC"));
    }

    #[test]
    fn test_remove() {
        let index = CredentialIndex::new();
        index.upsert("AABC", "jwt");
        assert_eq!(index.remove("AABC").as_deref(), Some("jwt"));
        assert!(index.get("AABC").is_none());
        assert!(index.remove("AABC").is_none());
        assert!(index.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_and_writers() {
        let index = CredentialIndex::new();
        let mut handles = Vec::new();

        for writer in 0..8 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..100 {
                    index.upsert(format!("A{writer}"), format!("jwt-{writer}-{round}"));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for reader in 0..8 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    if let Some(value) = index.get(&format!("A{reader}")) {
                        assert!(value.starts_with(&format!("jwt-{reader}-")));
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(index.len(), 8);
        assert_eq!(index.get("A3").as_deref(), Some("jwt-3-99"));
    }
}
