//! HTTP surface: the Telegram webhook, the generic submission endpoint and a
//! liveness probe, all sharing one `AppState`.

mod api;
mod response;
mod webhook;

pub use response::{Outcome, RelayResponse};

use crate::extractor::{IncomingUrl, Media};
use crate::registry::Registry;
use crate::store::{Store, StoreError};
use crate::telegram::{TelegramClient, TelegramError};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Everything a handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub store: Arc<Store>,
    /// Present when a bot token is configured.
    pub telegram: Option<TelegramClient>,
    pub bot_token: String,
    /// When set, only users who sent `/auth <secret>` may use the bot.
    pub auth_secret: Option<String>,
}

impl AppState {
    /// Run a store operation off the async runtime.
    pub(crate) async fn with_store<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    /// Fire a Telegram call without waiting for it.
    pub(crate) fn detach_telegram<F, Fut>(&self, what: &'static str, call: F)
    where
        F: FnOnce(TelegramClient) -> Fut,
        Fut: Future<Output = Result<(), TelegramError>> + Send + 'static,
    {
        let Some(client) = self.telegram.clone() else {
            tracing::debug!(what, "telegram not configured, skipping");
            return;
        };
        let fut = call(client);
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                tracing::warn!(what, error = %e, "telegram call failed");
            }
        });
    }

    /// classify, then dedup unless forced, then extract and hand off for delivery.
    ///
    /// `attached` is media that came with the request itself (a forwarded
    /// photo) and goes out ahead of anything extracted.
    pub(crate) async fn relay(
        &self,
        urls: &[String],
        force: bool,
        attached: Vec<Media>,
    ) -> Relayed {
        let classified = self.registry.classify(urls);

        let (fresh, duplicates) = if force || classified.is_empty() {
            (classified, Vec::new())
        } else {
            let batch = classified.clone();
            match self.with_store(move |store| store.partition(batch)).await {
                Ok(partition) => (partition.fresh, partition.duplicates),
                Err(e) => {
                    // A broken gate lets everything through
                    tracing::error!(error = %e, "dedup partition failed, treating all URLs as fresh");
                    (classified, Vec::new())
                }
            }
        };

        let mut media = attached;
        media.extend(self.registry.extract_all(&fresh).await);

        if !media.is_empty() {
            self.registry.deliver(media.clone());
        }

        tracing::info!(
            fresh = fresh.len(),
            duplicates = duplicates.len(),
            media = media.len(),
            force,
            "relayed request"
        );

        Relayed {
            recognized: fresh.len() + duplicates.len(),
            media,
            duplicates,
        }
    }
}

pub(crate) struct Relayed {
    pub recognized: usize,
    pub media: Vec<Media>,
    pub duplicates: Vec<IncomingUrl>,
}

async fn health() -> &'static str {
    "ok"
}

pub fn build_app(state: AppState, submit_path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/:token/message", post(webhook::handle_update))
        .route(submit_path, post(api::submit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
