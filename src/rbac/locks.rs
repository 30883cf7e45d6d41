use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::rbac::types::Role;

/// Logical key a mutation is serialized on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    Grant { role: Role, permission_id: String },
    Assignment { user_id: String, role: Role },
    Permission(String),
}

/// Rendered form doubles as the idempotency key reported on `Unavailable`.
impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Grant {
                role,
                permission_id,
            } => write!(f, "grant:{role}:{permission_id}"),
            LockKey::Assignment { user_id, role } => write!(f, "assignment:{user_id}:{role}"),
            LockKey::Permission(id) => write!(f, "permission:{id}"),
        }
    }
}

/// In-process table of per-key async mutexes. Entries exist only while a
/// task holds or waits for the key.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    table: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of `key`.
    pub async fn lock(&self, key: LockKey) -> KeyGuard {
        let mutex = self
            .table
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            table: self.table.clone(),
            key,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Releases the key on drop and reclaims the table entry once nobody else
/// references it.
pub struct KeyGuard {
    table: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so the guard's own reference to the mutex is gone.
        self.guard.take();
        // Waiters hold a clone of the Arc, so a count of one means only the
        // table still references it.
        self.table
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
