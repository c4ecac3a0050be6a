use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{CollectionStore, Delivery, Query, Record, Subscription, decode_documents};
use crate::fetch::{HttpClient, fetch_bytes};

/// A document store exposed over HTTP as `GET {base}/{collection}?field=value`,
/// each response being a JSON array of documents.
///
/// The store has no push channel, so each subscription polls and only emits
/// when the response body differs from the last one it delivered.
pub struct PollingStore<C> {
    client: Arc<C>,
    base_url: Url,
    poll_interval: Duration,
}

impl<C: HttpClient + 'static> PollingStore<C> {
    pub fn new(client: C, base_url: &str, poll_interval: Duration) -> Result<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).with_context(|| format!("invalid store url '{base_url}'"))?;
        Ok(Self {
            client: Arc::new(client),
            base_url,
            poll_interval,
        })
    }

    pub fn collection_url(&self, query: &Query) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&query.collection)
            .with_context(|| format!("invalid collection '{}'", query.collection))?;
        if !query.filters.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (field, value) in &query.filters {
                pairs.append_pair(field, value);
            }
        }
        Ok(url)
    }
}

impl<C: HttpClient + 'static> CollectionStore for PollingStore<C> {
    fn subscribe<T: Record>(&self, query: Query) -> Subscription<T> {
        let url = self.collection_url(&query);
        let client = self.client.clone();
        let interval = self.poll_interval;

        Subscription::spawn(query, move |tx| poll_collection(client, url, interval, tx))
    }
}

#[tracing::instrument(skip_all, fields(url = tracing::field::Empty))]
async fn poll_collection<C: HttpClient, T: Record>(
    client: Arc<C>,
    url: Result<Url>,
    interval: Duration,
    tx: mpsc::Sender<Delivery<T>>,
) {
    let url = match url {
        Ok(url) => url,
        Err(e) => {
            let _ = tx.send(Delivery::Error(format!("{e:#}"))).await;
            return;
        }
    };
    tracing::Span::current().record("url", url.as_str());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_body: Option<Vec<u8>> = None;

    loop {
        ticker.tick().await;

        let body = match fetch_bytes(client.as_ref(), url.as_str()).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Collection fetch failed");
                let _ = tx.send(Delivery::Error(format!("{e:#}"))).await;
                return;
            }
        };

        if last_body.as_deref() == Some(body.as_slice()) {
            continue;
        }

        let docs: Vec<Value> = match serde_json::from_slice(&body) {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "Collection body is not a JSON array");
                let _ = tx
                    .send(Delivery::Error(format!("undecodable collection: {e}")))
                    .await;
                return;
            }
        };

        debug!(documents = docs.len(), "Collection changed");
        if tx.send(Delivery::Snapshot(decode_documents(&docs))).await.is_err() {
            return;
        }
        last_body = Some(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    fn store(base: &str) -> PollingStore<BasicClient> {
        PollingStore::new(BasicClient::new(), base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_collection_url_appends_filters() {
        let store = store("https://store.example.com/v1");
        let url = store
            .collection_url(&Query::collection("users").where_eq("role", "shipper"))
            .unwrap();
        assert_eq!(url.as_str(), "https://store.example.com/v1/users?role=shipper");
    }

    #[test]
    fn test_collection_url_without_filters() {
        let store = store("https://store.example.com/v1/");
        let url = store.collection_url(&Query::collection("loads")).unwrap();
        assert_eq!(url.as_str(), "https://store.example.com/v1/loads");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let store = PollingStore::new(BasicClient::new(), "not a url", Duration::from_secs(1));
        assert!(store.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_store_reports_error() {
        let store = store("http://127.0.0.1:9/");
        let mut sub = store.subscribe::<crate::model::LoadRecord>(Query::collection("loads"));

        assert!(matches!(sub.next().await, Some(Delivery::Error(_))));
        assert_eq!(sub.next().await, None);
    }
}
