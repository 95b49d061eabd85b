// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

type Entries = HashMap<i64, (u64, watch::Sender<bool>)>;

/// Operations whose remote submission is currently in flight, keyed by
/// operation id. Owned by the use-case context; entries disappear when the
/// guard returned by [`SubmissionRegistry::register`] is dropped.
#[derive(Clone, Default)]
pub struct SubmissionRegistry {
    entries: Arc<Mutex<Entries>>,
    generation: Arc<AtomicU64>,
}

impl SubmissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, operation_id: i64) -> SubmissionGuard {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        self.lock().insert(operation_id, (generation, tx));
        SubmissionGuard {
            registry: self.clone(),
            operation_id,
            generation,
            receiver: rx,
        }
    }

    /// Signals the in-flight submission of `operation_id`, if any.
    pub fn cancel(&self, operation_id: i64) -> bool {
        match self.lock().get(&operation_id) {
            Some((_, tx)) => {
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, operation_id: i64) -> bool {
        self.lock().contains_key(&operation_id)
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct SubmissionGuard {
    registry: SubmissionRegistry,
    operation_id: i64,
    generation: u64,
    receiver: watch::Receiver<bool>,
}

impl SubmissionGuard {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }
}

impl Drop for SubmissionGuard {
    fn drop(&mut self) {
        let mut entries = self.registry.lock();
        if entries
            .get(&self.operation_id)
            .is_some_and(|(generation, _)| *generation == self.generation)
        {
            entries.remove(&self.operation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_drop_removes_entry() {
        let registry = SubmissionRegistry::new();
        let guard = registry.register(7);
        assert!(registry.is_active(7));
        drop(guard);
        assert!(!registry.is_active(7));
        assert!(!registry.cancel(7));
    }

    #[test]
    fn stale_guard_does_not_remove_newer_registration() {
        let registry = SubmissionRegistry::new();
        let old = registry.register(7);
        let _new = registry.register(7);
        drop(old);
        assert!(registry.is_active(7));
    }

    #[test]
    fn cancel_is_visible_to_the_submitting_guard() {
        let registry = SubmissionRegistry::new();
        let guard = registry.register(3);
        assert!(!guard.is_cancelled());

        assert!(registry.clone().cancel(3));

        assert!(guard.is_cancelled());
    }
}
