use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::rbac::types::{Permission, Role};

#[derive(Debug)]
struct CachedEntry {
    roles: Vec<Role>,
    permissions: Arc<Vec<Permission>>,
}

/// Per-user effective permission cache.
///
/// Readers capture [`generation`](Self::generation) before reading the
/// store and pass it back to [`insert`](Self::insert); any invalidation in
/// between bumps the generation and the stale result is dropped.
#[derive(Debug, Default)]
pub struct PermissionCache {
    generation: AtomicU64,
    // One lock over the whole map so the generation check and the insert are a single step
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<Vec<Permission>>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(user_id).map(|e| e.permissions.clone())
    }

    /// Returns false when an invalidation happened after `observed`.
    pub fn insert(
        &self,
        user_id: &str,
        roles: Vec<Role>,
        permissions: Arc<Vec<Permission>>,
        observed: u64,
    ) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) != observed {
            return false;
        }
        entries.insert(
            user_id.to_string(),
            CachedEntry { roles, permissions },
        );
        true
    }

    /// An assignment of `user_id` changed.
    pub fn invalidate_user(&self, user_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.remove(user_id);
    }

    /// A grant of `role` changed; every cached holder is stale.
    pub fn invalidate_role(&self, role: Role) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.retain(|_, e| !e.roles.contains(&role));
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
