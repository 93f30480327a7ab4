mod dropbox;
mod s3;
mod telegram;

pub use dropbox::DropboxConsumer;
pub use s3::S3Consumer;
pub use telegram::TelegramConsumer;

use crate::extractor::{ExtractError, Media};
use crate::telegram::TelegramError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Telegram error: {0}")]
    Telegram(#[from] TelegramError),
    #[error("Download failed: {0}")]
    Download(#[from] ExtractError),
    #[error("{service} returned {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("S3 error: {0}")]
    S3(String),
}

/// A destination that republishes extracted media.
#[async_trait]
pub trait Consumer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, media: &Media) -> Result<(), DeliveryError>;

    /// Deliver a batch in order. Failures are logged per item and do not stop the batch.
    async fn consume(&self, media: &[Media]) {
        for item in media {
            if let Err(e) = self.deliver(item).await {
                tracing::error!(
                    consumer = self.name(),
                    url = %item.url,
                    service = %item.service,
                    error = %e,
                    "delivery failed"
                );
            }
        }
    }
}
