use super::{Consumer, DeliveryError};
use crate::extractor::Media;
use crate::telegram::{InlineKeyboardMarkup, TelegramClient};
use async_trait::async_trait;

/// Republishes into a Telegram channel, each post carrying a like button.
pub struct TelegramConsumer {
    client: TelegramClient,
    channel: String,
}

impl TelegramConsumer {
    pub fn new(client: TelegramClient, channel: &str) -> Self {
        Self {
            client,
            channel: channel.to_string(),
        }
    }
}

/// Author line over source URL. Empty when neither is known.
fn caption(media: &Media) -> Option<String> {
    let lines: Vec<&str> = [media.author.as_deref(), Some(media.source_url.as_str())]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[async_trait]
impl Consumer for TelegramConsumer {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, media: &Media) -> Result<(), DeliveryError> {
        let caption = caption(media);
        self.client
            .send_media(
                &self.channel,
                media,
                caption.as_deref(),
                &InlineKeyboardMarkup::like(0),
            )
            .await?;
        Ok(())
    }
}
