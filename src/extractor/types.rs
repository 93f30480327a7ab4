use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Upstream returned {status} for {url}")]
    Upstream { status: u16, url: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Authentication required")]
    AuthRequired,
    #[error("Content not available")]
    NotAvailable,
}

impl From<serde_json::Error> for ExtractError {
    fn from(e: serde_json::Error) -> Self {
        ExtractError::Parse(e.to_string())
    }
}

/// Platform tag carried by every `IncomingUrl` and `Media`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Service {
    Twitter,
    Pixiv,
    Tumblr,
    Danbooru,
    Misskey,
    Bluesky,
    Instagram,
    Telegram,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Twitter => "Twitter",
            Service::Pixiv => "Pixiv",
            Service::Tumblr => "Tumblr",
            Service::Danbooru => "Danbooru",
            Service::Misskey => "Misskey",
            Service::Bluesky => "Bluesky",
            Service::Instagram => "Instagram",
            Service::Telegram => "Telegram",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
}

/// One extracted unit of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub url: String,
    /// Raw bytes, present when the extractor downloaded (or transcoded) the file itself.
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    #[serde(rename = "serviceName")]
    pub service: Service,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(rename = "authorURL", skip_serializing_if = "Option::is_none")]
    pub author_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "externalFileID", skip_serializing_if = "Option::is_none")]
    pub external_file_id: Option<String>,
}

impl Media {
    pub fn new(
        service: Service,
        kind: MediaKind,
        file_name: impl Into<String>,
        url: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            url: url.into(),
            bytes: None,
            kind,
            source_url: source_url.into(),
            service,
            author: None,
            author_url: None,
            title: None,
            description: None,
            external_file_id: None,
        }
    }

    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_author(mut self, author: Option<String>, author_url: Option<String>) -> Self {
        self.author = author.filter(|s| !s.is_empty());
        self.author_url = author_url.filter(|s| !s.is_empty());
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title.filter(|s| !s.is_empty());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|s| !s.is_empty());
        self
    }

    pub fn with_external_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.external_file_id = Some(file_id.into());
        self
    }
}

/// A raw URL string after a provider recognized it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingUrl {
    pub service: Service,
    pub original: String,
    /// Canonical form; the dedup key is derived from this.
    pub normalized: String,
    /// Instance host or account handle for federated platforms.
    pub host: Option<String>,
    pub str_id: String,
    pub int_id: Option<u64>,
}

impl IncomingUrl {
    pub fn new(
        service: Service,
        original: impl Into<String>,
        normalized: impl Into<String>,
        str_id: impl Into<String>,
    ) -> Self {
        let str_id = str_id.into();
        Self {
            service,
            original: original.into(),
            normalized: normalized.into(),
            host: None,
            int_id: str_id.parse().ok(),
            str_id,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn dedup_key(&self) -> String {
        self.normalized.to_lowercase()
    }
}

/// Last path segment of a URL, without query string or fragment.
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("file")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_serializes_with_wire_names() {
        let media = Media::new(
            Service::Twitter,
            MediaKind::Photo,
            "@user_abc.jpg",
            "https://pbs.twimg.com/media/abc.jpg",
            "https://x.com/user/status/1",
        )
        .with_bytes(vec![1, 2, 3])
        .with_author(Some("User".into()), None);

        let value = serde_json::to_value(&media).unwrap();
        assert_eq!(value["fileName"], "@user_abc.jpg");
        assert_eq!(value["type"], "photo");
        assert_eq!(value["sourceURL"], "https://x.com/user/status/1");
        assert_eq!(value["serviceName"], "Twitter");
        assert_eq!(value["author"], "User");
        assert!(value.get("bytes").is_none());
        assert!(value.get("authorURL").is_none());
    }

    #[test]
    fn dedup_key_is_case_insensitive() {
        let a = IncomingUrl::new(Service::Twitter, "x", "https://x.com/User/status/1", "1");
        let b = IncomingUrl::new(Service::Twitter, "x", "https://x.com/user/status/1", "1");
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.int_id, Some(1));
    }

    #[test]
    fn file_name_strips_query() {
        assert_eq!(
            file_name_from_url("https://pbs.twimg.com/media/abc.jpg?name=orig"),
            "abc.jpg"
        );
        assert_eq!(file_name_from_url("https://example.com/"), "file");
    }
}
