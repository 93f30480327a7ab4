//! Ordered provider list plus consumer list.
//!
//! Classification is first-match-wins in registration order. Extraction runs
//! URL by URL and never lets one failure abort the batch. Delivery is
//! detached: the caller gets control back before any consumer finishes.

use crate::consumer::Consumer;
use crate::extractor::{Extractor, IncomingUrl, Media};
use std::sync::Arc;
use tracing::Instrument;

#[derive(Clone, Default)]
pub struct Registry {
    extractors: Vec<Arc<dyn Extractor>>,
    consumers: Vec<Arc<dyn Consumer>>,
}

impl Registry {
    pub fn new(extractors: Vec<Arc<dyn Extractor>>, consumers: Vec<Arc<dyn Consumer>>) -> Self {
        Self {
            extractors,
            consumers,
        }
    }

    pub fn consumers(&self) -> &[Arc<dyn Consumer>] {
        &self.consumers
    }

    /// Recognized URLs, each tagged by the first extractor that claims it.
    /// Unrecognized strings are dropped; input order is kept.
    pub fn classify<S: AsRef<str>>(&self, urls: &[S]) -> Vec<IncomingUrl> {
        urls.iter()
            .filter_map(|url| self.recognize(url.as_ref()))
            .collect()
    }

    pub fn recognize(&self, url: &str) -> Option<IncomingUrl> {
        self.extractors.iter().find_map(|e| e.recognize(url))
    }

    /// True when `urls` is non-empty and every entry is recognized.
    pub fn recognizes_all<S: AsRef<str>>(&self, urls: &[S]) -> bool {
        !urls.is_empty() && urls.iter().all(|url| self.recognize(url.as_ref()).is_some())
    }

    fn owner(&self, url: &IncomingUrl) -> Option<&Arc<dyn Extractor>> {
        self.extractors.iter().find(|e| e.owns(url.service))
    }

    /// Extract every URL in order and concatenate the results.
    ///
    /// A URL whose extraction fails contributes nothing; the rest still run.
    pub async fn extract_all(&self, urls: &[IncomingUrl]) -> Vec<Media> {
        let mut result = Vec::new();

        for url in urls {
            let Some(extractor) = self.owner(url) else {
                tracing::warn!(url = %url.normalized, service = %url.service, "no extractor owns URL");
                continue;
            };

            match extractor.extract(url).await {
                Ok(media) => {
                    tracing::info!(
                        url = %url.normalized,
                        service = %url.service,
                        count = media.len(),
                        "extracted media"
                    );
                    result.extend(media);
                }
                Err(e) => {
                    tracing::error!(
                        url = %url.normalized,
                        service = %url.service,
                        error = %e,
                        "extraction failed"
                    );
                }
            }
        }

        result
    }

    /// Hand the batch to every consumer on its own detached task.
    pub fn deliver(&self, media: Vec<Media>) {
        if media.is_empty() || self.consumers.is_empty() {
            return;
        }

        let batch = Arc::new(media);
        let batch_id = uuid::Uuid::new_v4().to_string();

        for consumer in &self.consumers {
            let consumer = consumer.clone();
            let batch = batch.clone();
            let span = tracing::info_span!("deliver", consumer = consumer.name(), batch = %batch_id);
            tokio::spawn(
                async move {
                    consumer.consume(&batch).await;
                    tracing::debug!(count = batch.len(), "batch delivered");
                }
                .instrument(span),
            );
        }
    }
}
