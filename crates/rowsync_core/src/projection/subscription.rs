//! Per-row listener bookkeeping on the panel's change channel.
//!
//! # Invariants
//! - At most one listener per row identity.
//! - Disposal is idempotent and unregisters the listener from the channel.

use crate::change::{ChangeChannel, ChangeFilter, ListenerId};
use crate::model::entity::EntityId;
use log::warn;
use std::collections::HashMap;

#[derive(Debug)]
pub struct SubscriptionManager {
    channel: ChangeChannel,
    listeners: HashMap<EntityId, ListenerId>,
    owners: HashMap<ListenerId, EntityId>,
}

impl SubscriptionManager {
    pub fn new(channel: ChangeChannel) -> Self {
        Self {
            channel,
            listeners: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    pub fn channel(&self) -> &ChangeChannel {
        &self.channel
    }

    /// Registers the `Updated` listener of one row, filtered above `floor`.
    ///
    /// Returns `false` when a listener already exists or the channel is closed.
    pub fn attach(&mut self, id: EntityId, floor: u64) -> bool {
        if self.listeners.contains_key(&id) {
            return false;
        }
        match self.channel.subscribe(ChangeFilter::entity_updates(id, floor)) {
            Some(listener) => {
                self.listeners.insert(id, listener);
                self.owners.insert(listener, id);
                true
            }
            None => {
                warn!("event=subscription_attach module=projection status=skipped reason=channel_closed");
                false
            }
        }
    }

    /// Raises the revision floor of one row's listener.
    pub fn advance(&self, id: EntityId, revision: u64) {
        if let Some(listener) = self.listeners.get(&id) {
            self.channel.raise_floor(*listener, revision);
        }
    }

    /// Releases the listener of one row. Returns whether one was active.
    pub fn dispose(&mut self, id: EntityId) -> bool {
        match self.listeners.remove(&id) {
            Some(listener) => {
                self.owners.remove(&listener);
                self.channel.unsubscribe(listener);
                true
            }
            None => false,
        }
    }

    /// Releases every listener and returns how many were active.
    pub fn dispose_all(&mut self) -> usize {
        let ids: Vec<EntityId> = self.listeners.keys().copied().collect();
        ids.into_iter().filter(|id| self.dispose(*id)).count()
    }

    pub fn is_subscribed(&self, id: EntityId) -> bool {
        self.listeners.contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn owner_of(&self, listener: ListenerId) -> Option<EntityId> {
        self.owners.get(&listener).copied()
    }

    pub fn listener_of(&self, id: EntityId) -> Option<ListenerId> {
        self.listeners.get(&id).copied()
    }
}
