//! Load/unload notification channels
//!
//! Any number of listeners can attach to an [`ObserverList`] and detach again
//! at any time through the [`SubscriptionId`] returned on subscription.
//! Listeners run synchronously, in subscription order.

use std::collections::BTreeMap;
use std::fmt;

/// Handle returned by [`ObserverList::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Snapshot of an atlas handed to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasEvent<'a> {
    /// Tag of the atlas
    pub tag: &'a str,

    /// Reference count at notification time (always 0 for unloads)
    pub ref_count: u32,

    /// Number of sprites in the atlas's lookup table
    pub sprite_count: usize,
}

type Callback = Box<dyn FnMut(&AtlasEvent<'_>) + Send>;

/// Multi-subscriber notification channel
#[derive(Default)]
pub struct ObserverList {
    callbacks: BTreeMap<SubscriptionId, Callback>,
    next_id: u64,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&AtlasEvent<'_>) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.callbacks.insert(id, Box::new(callback));
        id
    }

    /// Detach a listener; returns `false` if it was not attached
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    pub fn notify(&mut self, event: &AtlasEvent<'_>) {
        for callback in self.callbacks.values_mut() {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("subscribers", &self.callbacks.len())
            .finish()
    }
}
