//! Display-name cache shared across chat sessions.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use ticketchat_core::UserId;

/// User ID to display name, shared by every session that clones it.
///
/// Writes are last-write-wins; the cache is for display only and never
/// gates message handling.
#[derive(Clone, Debug, Default)]
pub struct UserDirectory {
    names: Arc<DashMap<UserId, String>>,
}

impl UserDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved display name, if any.
    pub fn display_name(&self, id: &UserId) -> Option<String> {
        self.names.get(id).map(|entry| entry.value().clone())
    }

    /// Record a display name.
    pub fn insert(&self, id: UserId, name: String) {
        let _ = self.names.insert(id, name);
    }

    /// Record many display names.
    pub fn extend(&self, entries: impl IntoIterator<Item = (UserId, String)>) {
        for (id, name) in entries {
            self.insert(id, name);
        }
    }

    /// IDs from `ids` with no cached name, deduplicated, in input order.
    pub fn unknown<'a>(&self, ids: impl IntoIterator<Item = &'a UserId>) -> Vec<UserId> {
        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|id| !self.names.contains_key(*id) && seen.insert(*id))
            .cloned()
            .collect()
    }

    /// Number of cached names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_entries() {
        let a = UserDirectory::new();
        let b = a.clone();
        a.insert(UserId::from("u-1"), "Ada".into());
        assert_eq!(b.display_name(&UserId::from("u-1")).as_deref(), Some("Ada"));
    }

    #[test]
    fn last_write_wins() {
        let dir = UserDirectory::new();
        dir.insert(UserId::from("u-1"), "Ada".into());
        dir.extend([(UserId::from("u-1"), "Ada L.".into())]);
        assert_eq!(dir.display_name(&UserId::from("u-1")).as_deref(), Some("Ada L."));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn unknown_skips_cached_and_duplicates() {
        let dir = UserDirectory::new();
        dir.insert(UserId::from("u-1"), "Ada".into());
        let ids = [
            UserId::from("u-2"),
            UserId::from("u-1"),
            UserId::from("u-3"),
            UserId::from("u-2"),
        ];
        assert_eq!(dir.unknown(&ids), vec![UserId::from("u-2"), UserId::from("u-3")]);
    }
}
