//! Local authoritative copy of the federation list.
//!
//! The store only ever moves forward: a list replaces the stored one only if
//! its version is strictly higher. Readers are lock-free.

use crate::federation::FederationList;
use crate::prelude::{debug, info};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Storage of the current federation list.
///
/// Implementations must make [`LocalListStore::replace_if_newer`] atomic with
/// respect to concurrent writers: the version comparison and the write happen
/// under one lock.
pub trait LocalListStore: Send + Sync + 'static {
    /// Version of the stored list, `None` if nothing is stored yet.
    fn latest_version(&self) -> Option<i64>;

    /// Stores `list` if its version is higher than the stored one.
    ///
    /// Returns `true` if the list was stored.
    fn replace_if_newer(&self, list: FederationList) -> bool;

    /// The stored list.
    fn current(&self) -> Option<Arc<FederationList>>;
}

/// Process-local [`LocalListStore`].
#[derive(Default)]
pub struct InMemoryListStore {
    current: ArcSwapOption<FederationList>,
    // Serializes writers; readers go through `current` only.
    write_lock: Mutex<()>,
}

impl InMemoryListStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for InMemoryListStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryListStore")
            .field("version", &self.latest_version())
            .finish()
    }
}

impl LocalListStore for InMemoryListStore {
    fn latest_version(&self) -> Option<i64> {
        self.current.load_full().map(|list| list.version())
    }

    fn replace_if_newer(&self, list: FederationList) -> bool {
        // Poisoning cannot leave `current` half-written.
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let stored = self.latest_version();
        if stored.is_some_and(|v| list.version() <= v) {
            debug!(
                "Discarding federation list: received={}, stored={stored:?}",
                list.version()
            );
            return false;
        }

        info!("Storing federation list: {list}, previous={stored:?}");
        self.current.store(Some(Arc::new(list)));
        true
    }

    fn current(&self) -> Option<Arc<FederationList>> {
        self.current.load_full()
    }
}

/// Answer to [`query_current`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ListQuery {
    /// The stored list, newer than the caller's copy.
    Current(Arc<FederationList>),
    /// The caller's copy is up to date.
    NotModified,
    /// No list has been stored yet.
    Empty,
}

/// Serves the stored list to local consumers.
///
/// A caller holding version `if_newer_than` gets [`ListQuery::NotModified`]
/// unless the stored version is strictly higher.
pub fn query_current<S: LocalListStore + ?Sized>(
    store: &S,
    if_newer_than: Option<i64>,
) -> ListQuery {
    let Some(list) = store.current() else {
        return ListQuery::Empty;
    };
    match if_newer_than {
        Some(known) if known >= list.version() => ListQuery::NotModified,
        _ => ListQuery::Current(list),
    }
}
