//! Observable ordered list used for row children.
//!
//! # Responsibility
//! - Hold an ordered sequence and notify observers of every structural change.
//! - Give the view-binding layer add/remove/move notifications equivalent to a
//!   reactive collection.
//!
//! # Invariants
//! - Every mutation emits exactly one change per affected item, after the
//!   mutation has been applied.
//! - Observers are called synchronously on the mutating (consumer) turn.

use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};

/// Observer registration handle.
pub type ObserverId = u64;

/// Structural change emitted by an [`ObservableList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListChange<T> {
    Inserted { index: usize, item: T },
    Removed { index: usize, item: T },
    Moved { from: usize, to: usize, item: T },
}

type Observer<T> = Box<dyn FnMut(&ListChange<T>)>;

/// Ordered list with change notification.
pub struct ObservableList<T> {
    items: Vec<T>,
    observers: Vec<(ObserverId, Observer<T>)>,
    next_observer: ObserverId,
}

impl<T> Default for ObservableList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            observers: Vec::new(),
            next_observer: 1,
        }
    }
}

impl<T: Debug> Debug for ObservableList<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableList")
            .field("items", &self.items)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq> ObservableList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    pub fn position(&self, item: &T) -> Option<usize> {
        self.items.iter().position(|current| current == item)
    }

    /// Registers one observer and returns its handle.
    pub fn observe(&mut self, observer: impl FnMut(&ListChange<T>) + 'static) -> ObserverId {
        let id = self.next_observer;
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Removes one observer. Returns `false` when the handle is unknown.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(current, _)| *current != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Inserts at `index`, clamped to the current length.
    pub fn insert(&mut self, index: usize, item: T) -> usize {
        let index = index.min(self.items.len());
        self.items.insert(index, item.clone());
        self.notify(ListChange::Inserted { index, item });
        index
    }

    pub fn push(&mut self, item: T) -> usize {
        self.insert(self.items.len(), item)
    }

    /// Returns the index at which `item` keeps the list sorted under `compare`.
    ///
    /// `compare(probe, item)` orders an existing element against the new one;
    /// the result is the first position whose element is not less than `item`.
    pub fn insertion_index_by(&self, mut compare: impl FnMut(&T) -> Ordering) -> usize {
        self.items
            .partition_point(|probe| compare(probe) == Ordering::Less)
    }

    /// Removes the first occurrence of `item` and returns its former index.
    pub fn remove(&mut self, item: &T) -> Option<usize> {
        let index = self.position(item)?;
        self.remove_at(index);
        Some(index)
    }

    pub fn remove_at(&mut self, index: usize) -> Option<T> {
        if index >= self.items.len() {
            return None;
        }
        let item = self.items.remove(index);
        self.notify(ListChange::Removed {
            index,
            item: item.clone(),
        });
        Some(item)
    }

    /// Moves one element. Returns `false` for out-of-range or no-op moves.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        if from >= self.items.len() || to >= self.items.len() || from == to {
            return false;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item.clone());
        self.notify(ListChange::Moved { from, to, item });
        true
    }

    /// Rearranges the list into `target` order using moves only.
    ///
    /// `target` must be a permutation of the current items; otherwise the list
    /// is left unchanged and `false` is returned.
    pub fn reorder(&mut self, target: &[T]) -> bool {
        if target.len() != self.items.len() || target.iter().any(|item| !self.contains(item)) {
            return false;
        }
        let mut moved = false;
        for (to, wanted) in target.iter().enumerate() {
            let from = match self.items[to..].iter().position(|item| item == wanted) {
                Some(offset) => to + offset,
                None => return moved,
            };
            if from != to {
                moved |= self.move_item(from, to);
            }
        }
        moved
    }

    /// Removes every item, last first, and returns them in list order.
    pub fn clear(&mut self) -> Vec<T> {
        let mut removed = Vec::with_capacity(self.items.len());
        while let Some(item) = self.remove_at(self.items.len().wrapping_sub(1)) {
            removed.push(item);
        }
        removed.reverse();
        removed
    }

    fn notify(&mut self, change: ListChange<T>) {
        for (_, observer) in self.observers.iter_mut() {
            observer(&change);
        }
    }
}
