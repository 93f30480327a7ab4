use super::types::*;
use super::Extractor;
use crate::config::BlueskyConfig;
use crate::ffmpeg;
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::LazyLock;

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://bsky\.app/profile/([^/\s?#]+)/post/([^/\s?#]+)").unwrap()
});

pub struct BlueskyExtractor {
    client: reqwest::Client,
    api_base: String,
}

impl BlueskyExtractor {
    pub fn new(client: reqwest::Client, config: &BlueskyConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn xrpc<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ExtractError> {
        let url = format!("{}/xrpc/{}", self.api_base, method);
        let resp = self.client.get(&url).query(query).send().await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url,
            });
        }

        Ok(resp.json().await?)
    }

    async fn resolve_did(&self, handle: &str) -> Result<String, ExtractError> {
        if handle.starts_with("did:") {
            return Ok(handle.to_string());
        }

        #[derive(Deserialize)]
        struct Profile {
            did: String,
        }

        let profile: Profile = self
            .xrpc("app.bsky.actor.getProfile", &[("actor", handle)])
            .await?;
        Ok(profile.did)
    }

    async fn embed_media(&self, embed: &Embed, source_url: &str, rkey: &str) -> Vec<Media> {
        // A quote post with attachments carries them in `media`
        let embed = match embed {
            Embed::RecordWithMedia { media } => media.as_ref(),
            other => other,
        };

        match embed {
            Embed::Images { images } => images
                .iter()
                .map(|image| {
                    Media::new(
                        Service::Bluesky,
                        MediaKind::Photo,
                        image_file_name(&image.fullsize),
                        &image.fullsize,
                        source_url,
                    )
                })
                .collect(),
            Embed::Video { playlist } => {
                let file_name = format!("{}.mp4", rkey);
                let media = match ffmpeg::remux_to_mp4(playlist).await {
                    Ok(mp4) => Media::new(Service::Bluesky, MediaKind::Video, file_name, playlist, source_url)
                        .with_bytes(mp4),
                    Err(e) => {
                        tracing::warn!(url = %playlist, error = %e, "HLS remux failed, passing playlist through");
                        Media::new(Service::Bluesky, MediaKind::Video, file_name, playlist, source_url)
                    }
                };
                vec![media]
            }
            Embed::RecordWithMedia { .. } | Embed::Other => Vec::new(),
        }
    }
}

/// CDN fullsize URLs end in `<cid>@jpeg`.
fn image_file_name(url: &str) -> String {
    let name = file_name_from_url(url);
    match name.rsplit_once('@') {
        Some((cid, ext)) => format!("{}.{}", cid, ext),
        None => name,
    }
}

#[async_trait]
impl Extractor for BlueskyExtractor {
    fn service(&self) -> Service {
        Service::Bluesky
    }

    fn recognize(&self, url: &str) -> Option<IncomingUrl> {
        let caps = URL_REGEX.captures(url)?;
        let handle = &caps[1];
        let rkey = &caps[2];
        Some(
            IncomingUrl::new(
                Service::Bluesky,
                url,
                format!("https://bsky.app/profile/{}/post/{}", handle, rkey),
                rkey,
            )
            .with_host(handle),
        )
    }

    async fn extract(&self, url: &IncomingUrl) -> Result<Vec<Media>, ExtractError> {
        let handle = url
            .host
            .as_deref()
            .ok_or_else(|| ExtractError::InvalidUrl(url.original.clone()))?;
        let did = self.resolve_did(handle).await?;
        let uri = format!("at://{}/app.bsky.feed.post/{}", did, url.str_id);

        let thread: ThreadResponse = self
            .xrpc(
                "app.bsky.feed.getPostThread",
                &[("uri", uri.as_str()), ("depth", "0"), ("parentHeight", "0")],
            )
            .await?;

        let post = match thread.thread {
            ThreadView::Post { post } => post,
            ThreadView::Unavailable => return Err(ExtractError::NotAvailable),
        };

        let Some(embed) = &post.embed else {
            return Ok(Vec::new());
        };

        let author = post
            .author
            .display_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| post.author.handle.clone());
        let author_url = format!("https://bsky.app/profile/{}", post.author.handle);

        Ok(self
            .embed_media(embed, &url.normalized, &url.str_id)
            .await
            .into_iter()
            .map(|m| {
                m.with_author(Some(author.clone()), Some(author_url.clone()))
                    .with_description(post.record.text.clone())
            })
            .collect())
    }
}

// ============ Response structs ============

#[derive(Debug, Deserialize)]
struct ThreadResponse {
    thread: ThreadView,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
enum ThreadView {
    #[serde(rename = "app.bsky.feed.defs#threadViewPost")]
    Post { post: PostView },
    #[serde(other)]
    Unavailable,
}

#[derive(Debug, Deserialize)]
struct PostView {
    author: Author,
    #[serde(default)]
    record: PostRecord,
    #[serde(default)]
    embed: Option<Embed>,
}

#[derive(Debug, Deserialize)]
struct Author {
    handle: String,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PostRecord {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
enum Embed {
    #[serde(rename = "app.bsky.embed.images#view")]
    Images { images: Vec<ImageView> },
    #[serde(rename = "app.bsky.embed.video#view")]
    Video { playlist: String },
    #[serde(rename = "app.bsky.embed.recordWithMedia#view")]
    RecordWithMedia { media: Box<Embed> },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ImageView {
    fullsize: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread_fixture(embed: serde_json::Value) -> ThreadResponse {
        serde_json::from_value(serde_json::json!({
            "thread": {
                "$type": "app.bsky.feed.defs#threadViewPost",
                "post": {
                    "uri": "at://did:plc:abc/app.bsky.feed.post/3kxyz",
                    "author": {"did": "did:plc:abc", "handle": "alice.bsky.social", "displayName": "Alice"},
                    "record": {"$type": "app.bsky.feed.post", "text": "look"},
                    "embed": embed
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn recognizes_post_urls() {
        let b = BlueskyExtractor::new(reqwest::Client::new(), &BlueskyConfig::default());
        let incoming = b
            .recognize("https://bsky.app/profile/alice.bsky.social/post/3kxyz?ref=share")
            .unwrap();
        assert_eq!(
            incoming.normalized,
            "https://bsky.app/profile/alice.bsky.social/post/3kxyz"
        );
        assert_eq!(incoming.host.as_deref(), Some("alice.bsky.social"));
        assert_eq!(incoming.str_id, "3kxyz");
        assert_eq!(b.recognize(&incoming.normalized).unwrap().normalized, incoming.normalized);
        assert!(b.recognize("https://bsky.app/profile/alice.bsky.social").is_none());
    }

    #[tokio::test]
    async fn image_embed_maps_fullsize_urls() {
        let b = BlueskyExtractor::new(reqwest::Client::new(), &BlueskyConfig::default());
        let thread = thread_fixture(serde_json::json!({
            "$type": "app.bsky.embed.images#view",
            "images": [
                {"thumb": "t1", "fullsize": "https://cdn.bsky.app/img/feed_fullsize/plain/did:plc:abc/bafkrei1@jpeg", "alt": ""},
                {"thumb": "t2", "fullsize": "https://cdn.bsky.app/img/feed_fullsize/plain/did:plc:abc/bafkrei2@jpeg", "alt": ""}
            ]
        }));
        let ThreadView::Post { post } = thread.thread else {
            panic!("expected post");
        };

        let media = b
            .embed_media(post.embed.as_ref().unwrap(), "https://bsky.app/profile/a/post/3kxyz", "3kxyz")
            .await;
        assert_eq!(media.len(), 2);
        assert_eq!(media[0].file_name, "bafkrei1.jpeg");
        assert_eq!(media[1].kind, MediaKind::Photo);
        assert_eq!(post.record.text.as_deref(), Some("look"));
        assert_eq!(post.author.display_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn record_with_media_unwraps_inner_images() {
        let b = BlueskyExtractor::new(reqwest::Client::new(), &BlueskyConfig::default());
        let thread = thread_fixture(serde_json::json!({
            "$type": "app.bsky.embed.recordWithMedia#view",
            "record": {"record": {}},
            "media": {
                "$type": "app.bsky.embed.images#view",
                "images": [{"fullsize": "https://cdn.bsky.app/img/x@png"}]
            }
        }));
        let ThreadView::Post { post } = thread.thread else {
            panic!("expected post");
        };

        let media = b.embed_media(post.embed.as_ref().unwrap(), "src", "r").await;
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].file_name, "x.png");
    }

    #[test]
    fn unknown_embeds_and_missing_threads_parse() {
        let thread = thread_fixture(serde_json::json!({
            "$type": "app.bsky.embed.external#view",
            "external": {"uri": "https://example.com"}
        }));
        let ThreadView::Post { post } = thread.thread else {
            panic!("expected post");
        };
        assert!(matches!(post.embed, Some(Embed::Other)));

        let missing: ThreadResponse = serde_json::from_value(serde_json::json!({
            "thread": {"$type": "app.bsky.feed.defs#notFoundPost", "uri": "at://x", "notFound": true}
        }))
        .unwrap();
        assert!(matches!(missing.thread, ThreadView::Unavailable));
    }
}
