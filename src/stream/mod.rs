//! Live collection subscriptions.
//!
//! A store delivers the *entire* current collection every time any member
//! changes. Consumers never see deltas, so a snapshot always replaces
//! whatever view they held before.

mod memory;
mod polling;

pub use memory::MemoryStore;
pub use polling::PollingStore;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Buffered deliveries per subscription before the producer waits.
const DELIVERY_BUFFER: usize = 16;

/// Anything that can be decoded from a store document.
///
/// `Default` stands in for documents that fail to decode, so a snapshot
/// keeps one record per document.
pub trait Record: DeserializeOwned + Default + Send + 'static {}

impl<T: DeserializeOwned + Default + Send + 'static> Record for T {}

/// One event on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    /// The full collection as of now.
    Snapshot(Vec<T>),
    /// The subscription failed. Nothing follows until re-subscribed.
    Error(String),
}

/// A collection name plus equality filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, String)>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Whether a raw document satisfies every filter.
    pub fn matches(&self, doc: &Value) -> bool {
        self.filters.iter().all(|(field, expected)| match doc.get(field) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == *expected,
        })
    }
}

/// A store that can stream collections matching a [`Query`].
pub trait CollectionStore: Send + Sync {
    /// Starts streaming `query`. Must be called from within a tokio runtime.
    fn subscribe<T: Record>(&self, query: Query) -> Subscription<T>;
}

/// Receiving end of a live query.
///
/// Dropping the subscription releases its producer; calling
/// [`Subscription::unsubscribe`] more than once is harmless.
pub struct Subscription<T> {
    query: Query,
    rx: mpsc::Receiver<Delivery<T>>,
    producer: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Wires a channel for a producer task. The producer gets the sender and
    /// returns when the receiver goes away.
    pub(crate) fn spawn<F, Fut>(query: Query, producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<Delivery<T>>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        let handle = tokio::spawn(producer(tx));
        Self {
            query,
            rx,
            producer: Some(handle),
        }
    }
}

impl<T> Subscription<T> {
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn is_active(&self) -> bool {
        self.producer.is_some()
    }

    /// Next delivery in order, or `None` once the stream has ended or been
    /// unsubscribed.
    pub async fn next(&mut self) -> Option<Delivery<T>> {
        if self.producer.is_none() {
            return None;
        }
        self.rx.recv().await
    }

    /// Stops the producer. Returns `false` if it was already stopped.
    pub fn unsubscribe(&mut self) -> bool {
        match self.producer.take() {
            Some(handle) => {
                handle.abort();
                self.rx.close();
                debug!(collection = %self.query.collection, "Unsubscribed");
                true
            }
            None => false,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Decodes each document independently; undecodable documents become
/// `T::default()`.
pub fn decode_documents<T: Record>(docs: &[Value]) -> Vec<T> {
    docs.iter()
        .map(|doc| {
            serde_json::from_value(doc.clone()).unwrap_or_else(|e| {
                debug!(error = %e, "Undecodable document kept as malformed record");
                T::default()
            })
        })
        .collect()
}
