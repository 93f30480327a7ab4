use super::types::*;
use super::Extractor;
use crate::config::InstagramConfig;
use crate::downloader::USER_AGENT;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

const OEMBED_URL: &str = "https://api.instagram.com/oembed/";

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:www\.)?instagram\.com/(p|reel)/([A-Za-z0-9_-]+)").unwrap()
});

static OG_META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+property="og:([\w:]+)"\s+content="([^"]*)""#).unwrap()
});

/// One way of turning a post page into media. Tried in configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstagramStrategy {
    /// `/{p|reel}/{id}/media/?size=l`, accepted when it answers with an image.
    /// Skipped for video posts, where it only yields the cover still.
    DirectMedia,
    /// `og:video` / `og:image` from the post page.
    Html,
    /// Public oEmbed thumbnail.
    Oembed,
}

/// OpenGraph data gathered from the post page before any strategy runs.
#[derive(Debug, Default, Clone, PartialEq)]
struct PageMeta {
    title: Option<String>,
    description: Option<String>,
    author: Option<String>,
    author_url: Option<String>,
    is_video: bool,
    image: Option<String>,
    video: Option<String>,
}

impl PageMeta {
    fn from_html(html: &str) -> Self {
        let mut og: HashMap<String, String> = HashMap::new();
        for caps in OG_META.captures_iter(html) {
            og.entry(caps[1].to_string())
                .or_insert_with(|| unescape_html(&caps[2]));
        }

        let title = og.get("title").cloned().filter(|t| !t.is_empty());
        // "<name> on Instagram: <caption>"
        let author = title
            .as_ref()
            .and_then(|t| t.split_once(" on Instagram"))
            .map(|(name, _)| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Self {
            author_url: author.as_ref().map(|a| format!("https://www.instagram.com/{}/", a)),
            author,
            title,
            description: og.get("description").cloned().filter(|d| !d.is_empty()),
            is_video: og.get("type").is_some_and(|t| t.contains("video")),
            image: og.get("image").cloned().filter(|u| !u.is_empty()),
            video: og
                .get("video")
                .or_else(|| og.get("video:secure_url"))
                .cloned()
                .filter(|u| !u.is_empty()),
        }
    }
}

fn unescape_html(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub struct InstagramExtractor {
    client: reqwest::Client,
    strategies: Vec<InstagramStrategy>,
}

impl InstagramExtractor {
    pub fn new(client: reqwest::Client, config: &InstagramConfig) -> Self {
        Self {
            client,
            strategies: config.strategies.clone(),
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String, ExtractError> {
        let resp = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(resp.text().await?)
    }

    async fn direct_media(
        &self,
        url: &IncomingUrl,
        meta: &PageMeta,
    ) -> Result<Vec<Media>, ExtractError> {
        if meta.is_video {
            return Ok(Vec::new());
        }
        let media_url = format!("{}media/?size=l", url.normalized);

        let resp = self
            .client
            .get(&media_url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        let is_image = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("image"));

        if !resp.status().is_success() || !is_image {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url: media_url,
            });
        }

        // Redirects land on the CDN file
        let resolved = resp.url().to_string();
        Ok(vec![Media::new(
            Service::Instagram,
            MediaKind::Photo,
            format!("instagram_{}.jpg", url.str_id),
            resolved,
            &url.normalized,
        )])
    }

    fn html(&self, url: &IncomingUrl, meta: &PageMeta) -> Vec<Media> {
        let (kind, media_url) = match (&meta.video, &meta.image) {
            (Some(video), _) => (MediaKind::Video, video),
            (None, Some(image)) => (MediaKind::Photo, image),
            (None, None) => return Vec::new(),
        };
        let ext = if kind == MediaKind::Video { "mp4" } else { "jpg" };

        vec![Media::new(
            Service::Instagram,
            kind,
            format!("instagram_{}.{}", url.str_id, ext),
            media_url,
            &url.normalized,
        )]
    }

    async fn oembed(&self, url: &IncomingUrl) -> Result<Vec<Media>, ExtractError> {
        let resp = self
            .client
            .get(OEMBED_URL)
            .query(&[("url", url.normalized.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url: OEMBED_URL.to_string(),
            });
        }

        let data: OembedResponse = resp.json().await?;
        let Some(thumbnail) = data.thumbnail_url.filter(|t| !t.is_empty()) else {
            return Ok(Vec::new());
        };

        let author_url = data
            .author_name
            .as_ref()
            .map(|a| format!("https://www.instagram.com/{}/", a));

        Ok(vec![Media::new(
            Service::Instagram,
            MediaKind::Photo,
            format!("instagram_{}.jpg", url.str_id),
            thumbnail,
            &url.normalized,
        )
        .with_author(data.author_name, author_url)
        .with_title(data.title)])
    }
}

#[async_trait]
impl Extractor for InstagramExtractor {
    fn service(&self) -> Service {
        Service::Instagram
    }

    fn recognize(&self, url: &str) -> Option<IncomingUrl> {
        let caps = URL_REGEX.captures(url)?;
        let path_type = caps[1].to_lowercase();
        let id = &caps[2];
        Some(IncomingUrl::new(
            Service::Instagram,
            url,
            format!("https://www.instagram.com/{}/{}/", path_type, id),
            id,
        ))
    }

    async fn extract(&self, url: &IncomingUrl) -> Result<Vec<Media>, ExtractError> {
        let meta = match self.fetch_page(&url.normalized).await {
            Ok(html) => PageMeta::from_html(&html),
            Err(e) => {
                tracing::debug!(url = %url.normalized, error = %e, "instagram page metadata unavailable");
                PageMeta::default()
            }
        };

        let mut last_error = ExtractError::NotAvailable;
        for strategy in &self.strategies {
            let outcome = match strategy {
                InstagramStrategy::DirectMedia => self.direct_media(url, &meta).await,
                InstagramStrategy::Html => Ok(self.html(url, &meta)),
                InstagramStrategy::Oembed => self.oembed(url).await,
            };

            match outcome {
                Ok(media) if !media.is_empty() => {
                    tracing::info!(url = %url.normalized, ?strategy, "extracted instagram media");
                    return Ok(media
                        .into_iter()
                        .map(|m| complete_meta(m, &meta))
                        .collect());
                }
                Ok(_) => {
                    tracing::debug!(url = %url.normalized, ?strategy, "instagram strategy found nothing");
                }
                Err(e) => {
                    tracing::debug!(url = %url.normalized, ?strategy, error = %e, "instagram strategy failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Fill fields the strategy left empty from the page metadata.
fn complete_meta(mut media: Media, meta: &PageMeta) -> Media {
    if media.author.is_none() {
        media.author = meta.author.clone();
        media.author_url = meta.author_url.clone();
    }
    if media.title.is_none() {
        media.title = meta.title.clone();
    }
    if media.description.is_none() {
        media.description = meta.description.clone();
    }
    media
}

#[derive(Debug, Deserialize)]
struct OembedResponse {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{local_client, serve};
    use axum::http::header::CONTENT_TYPE;
    use axum::routing::get;
    use axum::Router;

    const POST_PAGE: &str = r#"
        <html><head>
        <meta property="og:type" content="video.other" />
        <meta property="og:title" content="Jane Doe on Instagram: &quot;sunset&quot;" />
        <meta property="og:description" content="12 likes, 1 comment" />
        <meta property="og:image" content="https://scontent.cdninstagram.com/v/t51/abc.jpg?stp=1&amp;oh=2" />
        <meta property="og:video" content="https://scontent.cdninstagram.com/v/t50/abc.mp4?oh=3&amp;oe=4" />
        </head></html>
    "#;

    fn extractor() -> InstagramExtractor {
        InstagramExtractor::new(reqwest::Client::new(), &InstagramConfig::default())
    }

    #[test]
    fn normalizes_post_and_reel_urls() {
        let ig = extractor();

        let post = ig
            .recognize("https://instagram.com/p/CxYz_12-ab?igsh=abc")
            .unwrap();
        assert_eq!(post.normalized, "https://www.instagram.com/p/CxYz_12-ab/");
        assert_eq!(post.str_id, "CxYz_12-ab");
        assert_eq!(ig.recognize(&post.normalized).unwrap().normalized, post.normalized);

        let reel = ig.recognize("https://www.instagram.com/reel/Abc123/").unwrap();
        assert_eq!(reel.normalized, "https://www.instagram.com/reel/Abc123/");

        assert!(ig.recognize("https://www.instagram.com/janedoe/").is_none());
    }

    #[test]
    fn page_meta_reads_open_graph_tags() {
        let meta = PageMeta::from_html(POST_PAGE);
        assert_eq!(meta.author.as_deref(), Some("Jane Doe"));
        assert_eq!(
            meta.author_url.as_deref(),
            Some("https://www.instagram.com/Jane Doe/")
        );
        assert_eq!(meta.title.as_deref(), Some("Jane Doe on Instagram: \"sunset\""));
        assert!(meta.is_video);
        assert_eq!(
            meta.video.as_deref(),
            Some("https://scontent.cdninstagram.com/v/t50/abc.mp4?oh=3&oe=4")
        );
    }

    #[test]
    fn html_strategy_prefers_video() {
        let ig = extractor();
        let url = ig.recognize("https://www.instagram.com/reel/Abc123/").unwrap();
        let meta = PageMeta::from_html(POST_PAGE);

        let media = ig.html(&url, &meta);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].kind, MediaKind::Video);
        assert_eq!(media[0].file_name, "instagram_Abc123.mp4");

        let completed = complete_meta(media[0].clone(), &meta);
        assert_eq!(completed.author.as_deref(), Some("Jane Doe"));
        assert_eq!(completed.description.as_deref(), Some("12 likes, 1 comment"));
    }

    #[test]
    fn html_strategy_without_og_media_is_empty() {
        let ig = extractor();
        let url = ig.recognize("https://www.instagram.com/p/Abc123/").unwrap();
        assert!(ig.html(&url, &PageMeta::default()).is_empty());
    }

    const PHOTO_PAGE: &str = r#"
        <meta property="og:type" content="article" />
        <meta property="og:image" content="https://scontent.cdninstagram.com/v/t51/still.jpg" />
    "#;

    /// Serves a post page and its `media/` endpoint (a JPEG) under `/{kind}/Abc/`.
    async fn stub_post(kind: &str, page: &'static str) -> (InstagramExtractor, IncomingUrl) {
        let app = Router::new()
            .route(&format!("/{}/Abc/", kind), get(move || async move { page }))
            .route(
                &format!("/{}/Abc/media/", kind),
                get(|| async { ([(CONTENT_TYPE, "image/jpeg")], vec![0xFF_u8, 0xD8, 0xFF]) }),
            );
        let base = serve(app).await;

        let config = InstagramConfig {
            strategies: vec![InstagramStrategy::DirectMedia, InstagramStrategy::Html],
        };
        let ig = InstagramExtractor::new(local_client(), &config);
        let normalized = format!("{}/{}/Abc/", base, kind);
        (ig, IncomingUrl::new(Service::Instagram, &normalized, &normalized, "Abc"))
    }

    #[tokio::test]
    async fn direct_media_is_always_a_photo() {
        let (ig, url) = stub_post("p", PHOTO_PAGE).await;

        let media = ig.extract(&url).await.unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].kind, MediaKind::Photo);
        assert_eq!(media[0].file_name, "instagram_Abc.jpg");
        assert!(media[0].url.ends_with("/p/Abc/media/?size=l"));
    }

    #[tokio::test]
    async fn reels_skip_direct_media_for_the_video() {
        let (ig, url) = stub_post("reel", POST_PAGE).await;

        let meta = PageMeta::from_html(POST_PAGE);
        assert!(ig.direct_media(&url, &meta).await.unwrap().is_empty());

        let media = ig.extract(&url).await.unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].kind, MediaKind::Video);
        assert_eq!(
            media[0].url,
            "https://scontent.cdninstagram.com/v/t50/abc.mp4?oh=3&oe=4"
        );
    }
}
