//! Change-notification channel.
//!
//! # Responsibility
//! - Accept change events from any thread (network/session I/O).
//! - Hand queued events to the single consumer turn with the listeners that
//!   match them.
//!
//! # Invariants
//! - `drain` is the only marshalling boundary; listeners are never invoked
//!   from producer threads.
//! - A closed channel accepts no events and no new listeners.
//! - Listener ids are never reused within one channel.

use crate::model::entity::EntityId;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Kind of change announced for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// One change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_id: EntityId,
    pub kind: ChangeKind,
    /// Entity revision after the change.
    pub revision: u64,
}

impl ChangeEvent {
    pub fn added(entity_id: EntityId, revision: u64) -> Self {
        Self {
            entity_id,
            kind: ChangeKind::Added,
            revision,
        }
    }

    pub fn updated(entity_id: EntityId, revision: u64) -> Self {
        Self {
            entity_id,
            kind: ChangeKind::Updated,
            revision,
        }
    }

    pub fn removed(entity_id: EntityId, revision: u64) -> Self {
        Self {
            entity_id,
            kind: ChangeKind::Removed,
            revision,
        }
    }
}

/// Listener registration handle.
pub type ListenerId = u64;

/// Listener predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    /// Only events for this entity; `None` matches every entity.
    pub entity: Option<EntityId>,
    /// Only this kind; `None` matches every kind.
    pub kind: Option<ChangeKind>,
    /// Only events with a revision strictly greater than this floor.
    pub after_revision: u64,
}

impl ChangeFilter {
    /// Matches every event.
    pub fn any() -> Self {
        Self {
            entity: None,
            kind: None,
            after_revision: 0,
        }
    }

    /// Matches `Updated` events of one entity newer than `floor`.
    pub fn entity_updates(entity: EntityId, floor: u64) -> Self {
        Self {
            entity: Some(entity),
            kind: Some(ChangeKind::Updated),
            after_revision: floor,
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.entity.map_or(true, |entity| entity == event.entity_id)
            && self.kind.map_or(true, |kind| kind == event.kind)
            && event.revision > self.after_revision
    }
}

/// One drained event with the listeners it matched at drain time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub event: ChangeEvent,
    pub listeners: Vec<ListenerId>,
}

#[derive(Debug)]
struct ChannelState {
    listeners: BTreeMap<ListenerId, ChangeFilter>,
    queue: VecDeque<ChangeEvent>,
    next_listener: ListenerId,
    closed: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            listeners: BTreeMap::new(),
            queue: VecDeque::new(),
            next_listener: 1,
            closed: false,
        }
    }
}

/// Shared handle to one change channel.
///
/// Clones refer to the same channel; the handle is `Send + Sync`, so
/// producers on I/O threads can publish while the owning panel drains.
#[derive(Debug, Clone, Default)]
pub struct ChangeChannel {
    inner: Arc<Mutex<ChannelState>>,
}

impl ChangeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one event. Returns `false` when the channel is closed.
    pub fn publish(&self, event: ChangeEvent) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.queue.push_back(event);
        true
    }

    /// Registers one listener. Returns `None` when the channel is closed.
    pub fn subscribe(&self, filter: ChangeFilter) -> Option<ListenerId> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.insert(id, filter);
        Some(id)
    }

    /// Removes one listener. Unknown ids are a no-op returning `false`.
    pub fn unsubscribe(&self, listener: ListenerId) -> bool {
        self.lock().listeners.remove(&listener).is_some()
    }

    /// Raises the revision floor of one listener; floors never go down.
    pub fn raise_floor(&self, listener: ListenerId, revision: u64) -> bool {
        match self.lock().listeners.get_mut(&listener) {
            Some(filter) => {
                filter.after_revision = filter.after_revision.max(revision);
                true
            }
            None => false,
        }
    }

    pub fn filter_of(&self, listener: ListenerId) -> Option<ChangeFilter> {
        self.lock().listeners.get(&listener).cloned()
    }

    pub fn active_listeners(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Drains every queued event.
    pub fn drain(&self) -> Vec<Delivery> {
        self.drain_up_to(usize::MAX)
    }

    /// Drains at most `max` queued events, oldest first.
    ///
    /// Events matching no listener are dropped.
    pub fn drain_up_to(&self, max: usize) -> Vec<Delivery> {
        let mut state = self.lock();
        let count = state.queue.len().min(max);
        let events: Vec<ChangeEvent> = state.queue.drain(..count).collect();
        let mut deliveries = Vec::with_capacity(events.len());
        let mut dropped = 0_usize;
        for event in events {
            let listeners: Vec<ListenerId> = state
                .listeners
                .iter()
                .filter(|(_, filter)| filter.matches(&event))
                .map(|(id, _)| *id)
                .collect();
            if listeners.is_empty() {
                dropped += 1;
                continue;
            }
            deliveries.push(Delivery { event, listeners });
        }
        if dropped > 0 {
            debug!("event=channel_drain module=change status=ok dropped={dropped}");
        }
        deliveries
    }

    /// Closes the channel, dropping queued events and listeners.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.queue.clear();
        state.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // Channel state stays structurally valid even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
