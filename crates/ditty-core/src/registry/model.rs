//! The loop registry.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::events::{EventTemplate, Loop, LoopChange, LoopDescriptor, DEFAULT_LOOP_LENGTH};
use crate::scheduler::wrap;

/// Set of active loops keyed by identifier.
///
/// Deleted loops are kept as tombstones until [`LoopRegistry::prune_tombstones`],
/// so a deleted id can be told apart from one that never existed. Iteration
/// order is insertion order and carries no priority.
#[derive(Debug)]
pub struct LoopRegistry {
    loops: HashMap<String, Option<Loop>>,
    ids: Vec<String>,
    default_length: f64,
    subscribers: Vec<Sender<LoopChange>>,
    version: u64,
}

impl Default for LoopRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopRegistry {
    /// Create an empty registry with the default loop length of 8 beats.
    pub fn new() -> Self {
        Self {
            loops: HashMap::new(),
            ids: Vec::new(),
            default_length: DEFAULT_LOOP_LENGTH,
            subscribers: Vec::new(),
            version: 0,
        }
    }

    /// Create an empty registry using `length` for loops created without one.
    pub fn with_default_length(length: f64) -> Result<Self> {
        if !is_valid_length(length) {
            return Err(Error::Config(format!(
                "default loop length must be a finite number of beats > 0, got {length}"
            )));
        }
        Ok(Self {
            default_length: length,
            ..Self::new()
        })
    }

    /// Register a channel that receives one [`LoopChange`] per `set` call.
    pub fn subscribe(&mut self) -> Receiver<LoopChange> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Insert, update or delete a loop.
    ///
    /// Non-empty `events` create or replace the loop; the id joins the
    /// iteration order only when newly created. Empty `events` delete it.
    /// Negative durations are clamped to 0 and positions are wrapped into
    /// `0.0..length`. Returns the change that was broadcast to subscribers.
    pub fn set(
        &mut self,
        id: impl Into<String>,
        events: Vec<EventTemplate>,
        length: Option<f64>,
    ) -> Result<LoopChange> {
        let id = id.into();
        if events.is_empty() {
            return Ok(self.remove(id));
        }

        let length = length.unwrap_or(self.default_length);
        if !is_valid_length(length) {
            return Err(Error::InvalidLength { id, length });
        }
        let events: Vec<EventTemplate> = events
            .into_iter()
            .map(|template| sanitize(&id, template, length))
            .collect();

        let is_new = !matches!(self.loops.get(&id), Some(Some(_)));
        if is_new {
            self.ids.push(id.clone());
        }
        log::debug!(
            "loop '{}' {} ({} events, length {})",
            id,
            if is_new { "created" } else { "updated" },
            events.len(),
            length
        );
        self.loops.insert(
            id.clone(),
            Some(Loop {
                length,
                events: events.clone(),
            }),
        );
        Ok(self.broadcast(LoopChange::Updated(LoopDescriptor { id, length, events })))
    }

    /// Apply a full descriptor.
    pub fn update(&mut self, descriptor: LoopDescriptor) -> Result<LoopChange> {
        self.set(descriptor.id, descriptor.events, Some(descriptor.length))
    }

    /// Delete a loop, leaving a tombstone.
    pub fn remove(&mut self, id: impl Into<String>) -> LoopChange {
        let id = id.into();
        self.ids.retain(|existing| existing != &id);
        self.loops.insert(id.clone(), None);
        log::debug!("loop '{}' deleted", id);
        self.broadcast(LoopChange::Deleted { id })
    }

    /// Forget deleted loops, returning how many tombstones were dropped.
    ///
    /// The scheduler only reads snapshots, so pruning never affects stop
    /// events still waiting for a deleted loop.
    pub fn prune_tombstones(&mut self) -> usize {
        let before = self.loops.len();
        self.loops.retain(|_, entry| entry.is_some());
        before - self.loops.len()
    }

    fn broadcast(&mut self, change: LoopChange) -> LoopChange {
        self.version = self.version.wrapping_add(1);
        self.subscribers
            .retain(|subscriber| subscriber.send(change.clone()).is_ok());
        change
    }

    /// Look up a live loop.
    pub fn get(&self, id: &str) -> Option<&Loop> {
        self.loops.get(id).and_then(Option::as_ref)
    }

    /// Cycle length of a live loop.
    pub fn length_of(&self, id: &str) -> Option<f64> {
        self.get(id).map(|lp| lp.length)
    }

    /// Check whether the id names a live loop.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Check whether the id was known but has been deleted.
    pub fn is_tombstone(&self, id: &str) -> bool {
        matches!(self.loops.get(id), Some(None))
    }

    /// Live loop ids in insertion order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of live loops.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if there are no live loops.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Monotonically increasing counter bumped by every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Loop length applied when `set` is called without one.
    pub fn default_length(&self) -> f64 {
        self.default_length
    }

    /// All live loops in insertion order.
    pub fn snapshot(&self) -> Vec<LoopDescriptor> {
        self.ids
            .iter()
            .filter_map(|id| {
                self.get(id).map(|lp| LoopDescriptor {
                    id: id.clone(),
                    length: lp.length,
                    events: lp.events.clone(),
                })
            })
            .collect()
    }
}

fn is_valid_length(length: f64) -> bool {
    length.is_finite() && length > 0.0
}

fn sanitize(id: &str, mut template: EventTemplate, length: f64) -> EventTemplate {
    if !template.duration.is_finite() || template.duration < 0.0 {
        log::warn!(
            "loop '{}': event at {} has invalid duration {}, clamping to 0",
            id,
            template.position,
            template.duration
        );
        template.duration = 0.0;
    }
    if !template.position.is_finite() {
        log::warn!("loop '{}': non-finite event position, using 0", id);
        template.position = 0.0;
    } else if template.position < 0.0 || template.position >= length {
        let wrapped = wrap(template.position, length);
        log::debug!(
            "loop '{}': wrapping event position {} to {}",
            id,
            template.position,
            wrapped
        );
        template.position = wrapped;
    }
    template
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kick() -> Vec<EventTemplate> {
        vec![EventTemplate::new(0.0, 2.0).with_arg("kick")]
    }

    #[test]
    fn test_set_creates_with_default_length() {
        let mut registry = LoopRegistry::new();
        registry.set("a", kick(), None).unwrap();
        assert_eq!(registry.length_of("a"), Some(8.0));
        assert_eq!(registry.ids(), ["a".to_string()]);
        assert_eq!(registry.get("a").unwrap().events, kick());
    }

    #[test]
    fn test_update_keeps_insertion_order() {
        let mut registry = LoopRegistry::new();
        registry.set("a", kick(), Some(4.0)).unwrap();
        registry.set("b", kick(), Some(4.0)).unwrap();
        registry.set("a", kick(), Some(16.0)).unwrap();
        assert_eq!(registry.ids(), ["a".to_string(), "b".to_string()]);
        assert_eq!(registry.length_of("a"), Some(16.0));
    }

    #[test]
    fn test_empty_events_delete() {
        let mut registry = LoopRegistry::new();
        registry.set("a", kick(), None).unwrap();
        registry.set("b", kick(), None).unwrap();
        let change = registry.set("a", Vec::new(), None).unwrap();
        assert!(change.is_deletion());
        assert!(!registry.contains("a"));
        assert!(registry.is_tombstone("a"));
        assert_eq!(registry.ids(), ["b".to_string()]);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_recreate_after_delete_appends() {
        let mut registry = LoopRegistry::new();
        registry.set("a", kick(), None).unwrap();
        registry.set("b", kick(), None).unwrap();
        registry.remove("a");
        registry.set("a", kick(), None).unwrap();
        assert_eq!(registry.ids(), ["b".to_string(), "a".to_string()]);
        assert!(!registry.is_tombstone("a"));
    }

    #[test]
    fn test_invalid_length_rejected() {
        let mut registry = LoopRegistry::new();
        let err = registry.set("a", kick(), Some(0.0)).unwrap_err();
        assert!(matches!(err, Error::InvalidLength { .. }));
        assert!(registry.set("a", kick(), Some(f64::NAN)).is_err());
        assert!(registry.is_empty());
        assert_eq!(registry.version(), 0);
    }

    #[test]
    fn test_malformed_templates_sanitized() {
        let mut registry = LoopRegistry::new();
        registry
            .set(
                "a",
                vec![EventTemplate::new(-1.0, -3.0), EventTemplate::new(9.0, 1.0)],
                Some(8.0),
            )
            .unwrap();
        let events = &registry.get("a").unwrap().events;
        assert_eq!(events[0].position, 7.0);
        assert_eq!(events[0].duration, 0.0);
        assert_eq!(events[1].position, 1.0);
    }

    #[test]
    fn test_tiny_negative_position_wraps_inside_cycle() {
        let mut registry = LoopRegistry::new();
        registry
            .set("a", vec![EventTemplate::new(-1e-20, 1.0)], Some(8.0))
            .unwrap();
        let position = registry.get("a").unwrap().events[0].position;
        assert!((0.0..8.0).contains(&position), "position {position} outside cycle");
    }

    #[test]
    fn test_set_and_remove_share_deletion() {
        let mut registry = LoopRegistry::new();
        let rx = registry.subscribe();
        registry.set("a", kick(), None).unwrap();
        registry.set("b", kick(), None).unwrap();

        let via_set = registry.set("a", Vec::new(), None).unwrap();
        let via_remove = registry.remove("b");
        assert_eq!(via_set, LoopChange::Deleted { id: "a".to_string() });
        assert_eq!(via_remove, LoopChange::Deleted { id: "b".to_string() });
        assert_eq!(registry.version(), 4);
        assert_eq!(rx.try_iter().count(), 4);
        assert!(registry.is_tombstone("a") && registry.is_tombstone("b"));
    }

    #[test]
    fn test_prune_tombstones() {
        let mut registry = LoopRegistry::new();
        for round in 0..3 {
            let id = format!("loop-{round}");
            registry.set(id.as_str(), kick(), None).unwrap();
            registry.remove(id);
        }
        registry.set("live", kick(), None).unwrap();
        assert_eq!(registry.loops.len(), 4);

        assert_eq!(registry.prune_tombstones(), 3);
        assert_eq!(registry.loops.len(), 1);
        assert!(!registry.is_tombstone("loop-0"));
        assert!(registry.contains("live"));
        assert_eq!(registry.prune_tombstones(), 0);
    }

    #[test]
    fn test_notifications() {
        let mut registry = LoopRegistry::new();
        let rx = registry.subscribe();
        registry.set("a", kick(), Some(4.0)).unwrap();
        registry.set("a", Vec::new(), None).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(
            first,
            LoopChange::Updated(LoopDescriptor {
                id: "a".to_string(),
                length: 4.0,
                events: kick(),
            })
        );
        let second = rx.try_recv().unwrap();
        assert_eq!(second, LoopChange::Deleted { id: "a".to_string() });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let mut registry = LoopRegistry::new();
        let rx = registry.subscribe();
        drop(rx);
        registry.set("a", kick(), None).unwrap();
        assert!(registry.subscribers.is_empty());
    }

    #[test]
    fn test_update_from_descriptor() {
        let mut registry = LoopRegistry::new();
        let descriptor = LoopDescriptor::new("a", 3.0).with_event(EventTemplate::new(1.0, 1.0));
        registry.update(descriptor.clone()).unwrap();
        assert_eq!(registry.snapshot(), vec![descriptor]);
    }

    #[test]
    fn test_default_length_validation() {
        assert!(LoopRegistry::with_default_length(-1.0).is_err());
        let registry = LoopRegistry::with_default_length(16.0).unwrap();
        assert_eq!(registry.default_length(), 16.0);
    }
}
