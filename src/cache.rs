//! In-memory cache of aggregated windows, one per subscription.
//!
//! No TTL and no eviction: daily billing changes at most once a day and a
//! differing window simply replaces the stored one. Fetches are serialized
//! per subscription through [`WindowCache::fetch_lock`].

use crate::models::SubscriptionWindow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Default)]
pub struct WindowCache {
    windows: RwLock<HashMap<String, Arc<SubscriptionWindow>>>,
    fetch_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored window regardless of its dates.
    pub fn lookup(&self, subscription_id: &str) -> Option<Arc<SubscriptionWindow>> {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subscription_id)
            .cloned()
    }

    /// Replaces whatever window was stored for the subscription.
    pub fn store(&self, subscription_id: &str, window: SubscriptionWindow) -> Arc<SubscriptionWindow> {
        let window = Arc::new(window);
        self.windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subscription_id.to_string(), Arc::clone(&window));
        window
    }

    /// Lock held across an upstream fetch for one subscription.
    pub fn fetch_lock(&self, subscription_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .fetch_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(subscription_id.to_string()).or_default())
    }

    pub fn len(&self) -> usize {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
