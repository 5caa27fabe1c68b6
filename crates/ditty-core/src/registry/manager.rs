//! Shared registry handle for multi-threaded hosts.
//!
//! The [`SharedRegistry`] wraps a [`LoopRegistry`] in an `Arc<RwLock>` so
//! that writers and the scheduler thread serialize against each other.
//! Snapshots are copied under the read lock, so one evaluation always sees
//! one consistent registry state.

use crossbeam_channel::Receiver;
use std::sync::{Arc, PoisonError, RwLock};

use super::model::LoopRegistry;
use crate::error::Result;
use crate::events::{EventTemplate, LoopChange, LoopDescriptor};

/// Thread-safe handle to a loop registry.
#[derive(Clone, Default)]
pub struct SharedRegistry {
    registry: Arc<RwLock<LoopRegistry>>,
}

impl SharedRegistry {
    /// Create a handle around an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle around an existing registry.
    pub fn with_registry(registry: LoopRegistry) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
        }
    }

    /// Read the registry with a closure.
    pub fn with_read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&LoopRegistry) -> R,
    {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        f(&registry)
    }

    /// Mutate the registry with a closure under the write lock.
    pub fn with_write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut LoopRegistry) -> R,
    {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut registry)
    }

    /// Insert, update or delete a loop. See [`LoopRegistry::set`].
    pub fn set_loop(
        &self,
        id: impl Into<String>,
        events: Vec<EventTemplate>,
        length: Option<f64>,
    ) -> Result<LoopChange> {
        self.with_write(|registry| registry.set(id, events, length))
    }

    /// Delete a loop.
    pub fn remove_loop(&self, id: impl Into<String>) -> LoopChange {
        self.with_write(|registry| registry.remove(id))
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> Receiver<LoopChange> {
        self.with_write(LoopRegistry::subscribe)
    }

    /// Copy of all live loops, taken atomically.
    pub fn snapshot(&self) -> Vec<LoopDescriptor> {
        self.with_read(LoopRegistry::snapshot)
    }

    /// Current registry version.
    pub fn version(&self) -> u64 {
        self.with_read(LoopRegistry::version)
    }
}

impl std::fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegistry")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clones_share_state() {
        let a = SharedRegistry::new();
        let b = a.clone();
        a.set_loop("kick", vec![EventTemplate::new(0.0, 1.0)], None)
            .unwrap();
        assert_eq!(b.snapshot().len(), 1);
        assert_eq!(b.version(), 1);
    }

    #[test]
    fn test_writes_from_other_thread() {
        let registry = SharedRegistry::new();
        let rx = registry.subscribe();
        let writer = registry.clone();
        thread::spawn(move || {
            for i in 0..10 {
                writer
                    .set_loop(format!("loop{i}"), vec![EventTemplate::new(0.0, 1.0)], None)
                    .unwrap();
            }
        })
        .join()
        .unwrap();

        let ids: Vec<String> = registry.snapshot().into_iter().map(|d| d.id).collect();
        assert_eq!(ids.len(), 10);
        assert_eq!(ids[0], "loop0");
        assert_eq!(rx.try_iter().count(), 10);
    }

    #[test]
    fn test_remove_loop() {
        let registry = SharedRegistry::new();
        registry
            .set_loop("a", vec![EventTemplate::new(0.0, 1.0)], None)
            .unwrap();
        let change = registry.remove_loop("a");
        assert!(change.is_deletion());
        assert!(registry.snapshot().is_empty());
        assert!(registry.with_read(|r| r.is_tombstone("a")));
    }
}
