//! Subscription registry backing the store's notification bus.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::StoreSnapshot;

/// Callback invoked synchronously after every store mutation.
pub type Observer = Box<dyn FnMut(&StoreSnapshot) + Send + 'static>;

/// Handle returned by `Store::subscribe`. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    next_id: u64,
    observers: BTreeMap<SubscriptionId, Observer>,
}

impl SubscriptionRegistry {
    pub fn add(&mut self, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.observers.insert(id, observer);
        id
    }

    /// Remove exactly one observer. Returns false if it was already gone.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.observers.remove(&id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn notify(&mut self, snapshot: &StoreSnapshot) {
        for observer in self.observers.values_mut() {
            observer(snapshot);
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("next_id", &self.next_id)
            .field("observers", &self.observers.len())
            .finish()
    }
}
