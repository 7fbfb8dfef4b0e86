//! Single-flight coordination of background searches
//!
//! A background search is keyed by (requester country, file path). The first
//! request for a key wins the right to search; every later request for the
//! same key gets the last-resort redirect without starting another search
//! until the file changes. A settled key can be re-armed once, when the link
//! its search produced turns out to be stale.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

/// Result of asking for permission to search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPermission {
    /// The caller must run the search
    Granted,
    /// A search for this key is running or already finished
    AlreadyClaimed,
}

impl SearchPermission {
    pub fn is_granted(self) -> bool {
        matches!(self, SearchPermission::Granted)
    }
}

/// State of a claimed key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Searching,
    Settled,
}

/// Per-(country, file) search flags
///
/// Flags are grouped by file so that file-level invalidation touches one entry.
/// An absent key means no search was claimed since the file last changed.
#[derive(Debug, Default)]
pub struct DedupCoordinator {
    searches: Mutex<HashMap<String, HashMap<String, SearchState>>>,
}

impl DedupCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check and claim the search flag for `(country, file)`
    ///
    /// Returns true exactly once per key until the flag is cleared again.
    pub async fn should_start_search(&self, country: &str, file: &str) -> bool {
        self.claim(country, file).await.is_granted()
    }

    /// Same as [`Self::should_start_search`] with a typed answer
    pub async fn claim(&self, country: &str, file: &str) -> SearchPermission {
        let mut searches = self.searches.lock().await;
        let countries = searches.entry(file.to_string()).or_default();

        if countries.contains_key(country) {
            debug!("Search for {} from {:?} already claimed", file, country);
            SearchPermission::AlreadyClaimed
        } else {
            countries.insert(country.to_string(), SearchState::Searching);
            debug!("Search for {} from {:?} claimed", file, country);
            SearchPermission::Granted
        }
    }

    /// Mark the search of a key as finished; the key stays claimed
    pub async fn settle(&self, country: &str, file: &str) {
        let mut searches = self.searches.lock().await;
        if let Some(state) = searches.get_mut(file).and_then(|c| c.get_mut(country)) {
            *state = SearchState::Settled;
        }
    }

    /// Unclaim a settled key so the next request may search again
    ///
    /// A key whose search is still running is left alone. Returns whether the
    /// key was re-armed.
    pub async fn rearm(&self, country: &str, file: &str) -> bool {
        let mut searches = self.searches.lock().await;
        let Some(countries) = searches.get_mut(file) else {
            return false;
        };
        if countries.get(country) == Some(&SearchState::Settled) {
            countries.remove(country);
            debug!("Re-armed search for {} from {:?}", file, country);
            true
        } else {
            false
        }
    }

    /// Current state of a key, `None` if unclaimed
    pub async fn state(&self, country: &str, file: &str) -> Option<SearchState> {
        self.searches
            .lock()
            .await
            .get(file)
            .and_then(|countries| countries.get(country))
            .copied()
    }

    /// Clear the flag of every country for a created or rewritten file
    pub async fn reset_on_file_change(&self, file: &str) {
        let mut searches = self.searches.lock().await;
        if let Some(countries) = searches.get_mut(file) {
            debug!("Reset {} search flags of {}", countries.len(), file);
            countries.clear();
        }
    }

    /// Drop every entry of a deleted file
    pub async fn forget(&self, file: &str) {
        if self.searches.lock().await.remove(file).is_some() {
            debug!("Forgot search flags of {}", file);
        }
    }

    /// Number of searches still running
    pub async fn in_flight(&self) -> usize {
        self.searches
            .lock()
            .await
            .values()
            .flat_map(|countries| countries.values())
            .filter(|state| **state == SearchState::Searching)
            .count()
    }
}
