//! Telegram Bot API plumbing: the outbound client, webhook payload types and
//! helpers for reading URLs and commands out of messages.

mod client;
mod types;

pub use client::{TelegramClient, TelegramError};
pub use types::*;

/// URLs carried by a message's `url` and `text_link` entities, in entity order.
///
/// Entity offsets count UTF-16 code units, so the text is sliced on that scale.
pub fn extract_urls(text: &str, entities: &[MessageEntity]) -> Vec<String> {
    if text.is_empty() && entities.iter().all(|e| e.kind != "text_link") {
        return Vec::new();
    }

    let units: Vec<u16> = text.encode_utf16().collect();
    let mut urls = Vec::new();

    for entity in entities {
        match entity.kind.as_str() {
            "url" => {
                let end = entity.offset.saturating_add(entity.length);
                let Some(slice) = units.get(entity.offset..end) else {
                    tracing::debug!(offset = entity.offset, length = entity.length, "url entity out of range");
                    continue;
                };
                urls.push(String::from_utf16_lossy(slice));
            }
            "text_link" => {
                if let Some(url) = &entity.url {
                    urls.push(url.clone());
                }
            }
            _ => {}
        }
    }

    urls
}

impl Message {
    /// URLs from the text and, for media messages, the caption.
    pub fn urls(&self) -> Vec<String> {
        let mut urls = extract_urls(self.text.as_deref().unwrap_or(""), &self.entities);
        urls.extend(self.caption_urls());
        urls
    }

    pub fn caption_urls(&self) -> Vec<String> {
        extract_urls(self.caption.as_deref().unwrap_or(""), &self.caption_entities)
    }

    /// Highest-resolution rendition of the attached photo, if any.
    pub fn largest_photo(&self) -> Option<&PhotoSize> {
        self.photo
            .iter()
            .max_by_key(|p| (u64::from(p.width) * u64::from(p.height), p.file_size.unwrap_or(0)))
    }
}

/// Bot commands the relay understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    /// `/auth <secret>`
    Auth(String),
    Revoke,
    Unknown(String),
}

/// Parse a leading `/command[@bot] [args]`. Plain text is not a command.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;

    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_lowercase();

    Some(match name.as_str() {
        "start" => Command::Start,
        "auth" => Command::Auth(args.to_string()),
        "revoke" => Command::Revoke,
        _ => Command::Unknown(name),
    })
}
