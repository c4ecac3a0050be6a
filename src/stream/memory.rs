use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use super::{CollectionStore, Delivery, Query, Record, Subscription, decode_documents};

#[derive(Debug, Clone)]
enum StoreEvent {
    Documents(Arc<Vec<Value>>),
    Failed(String),
}

/// In-process document store.
///
/// Each collection is a `watch` channel, so a slow subscriber skips
/// intermediate versions and only sees the latest full collection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<Mutex<HashMap<String, watch::Sender<StoreEvent>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new full version of `collection`.
    pub fn replace(&self, collection: &str, docs: Vec<Value>) {
        debug!(collection, documents = docs.len(), "Collection replaced");
        self.sender(collection)
            .send_replace(StoreEvent::Documents(Arc::new(docs)));
    }

    /// Breaks every current subscription on `collection`. The failure sticks
    /// until the next [`MemoryStore::replace`].
    pub fn fail(&self, collection: &str, reason: &str) {
        debug!(collection, reason, "Collection failed");
        self.sender(collection)
            .send_replace(StoreEvent::Failed(reason.to_string()));
    }

    fn sender(&self, collection: &str) -> watch::Sender<StoreEvent> {
        let mut collections = self
            .collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collections
            .entry(collection.to_string())
            .or_insert_with(|| watch::channel(StoreEvent::Documents(Arc::new(Vec::new()))).0)
            .clone()
    }
}

impl CollectionStore for MemoryStore {
    fn subscribe<T: Record>(&self, query: Query) -> Subscription<T> {
        let mut rx = self.sender(&query.collection).subscribe();
        let filter = query.clone();

        Subscription::spawn(query, move |tx| async move {
            loop {
                let event = rx.borrow_and_update().clone();
                match event {
                    StoreEvent::Documents(docs) => {
                        let matching: Vec<Value> =
                            docs.iter().filter(|d| filter.matches(d)).cloned().collect();
                        let records = decode_documents::<T>(&matching);
                        if tx.send(Delivery::Snapshot(records)).await.is_err() {
                            return;
                        }
                    }
                    StoreEvent::Failed(reason) => {
                        let _ = tx.send(Delivery::Error(reason)).await;
                        return;
                    }
                }

                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
    }
}
