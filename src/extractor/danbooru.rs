use super::types::*;
use super::Extractor;
use crate::config::DanbooruConfig;
use crate::downloader::SimpleDownloader;
use crate::ffmpeg;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};

const POSTS_URL: &str = "https://danbooru.donmai.us/posts/";

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://danbooru\.donmai\.us/(?:posts|post/show)/(\d+)").unwrap()
});

/// Danbooru posts. Prefers the artist's original post when its source is a
/// platform one of the `upstream` extractors handles.
pub struct DanbooruExtractor {
    client: reqwest::Client,
    downloader: SimpleDownloader,
    config: DanbooruConfig,
    upstream: Vec<Arc<dyn Extractor>>,
}

impl DanbooruExtractor {
    pub fn new(
        client: reqwest::Client,
        config: &DanbooruConfig,
        upstream: Vec<Arc<dyn Extractor>>,
    ) -> Self {
        Self {
            downloader: SimpleDownloader::new(client.clone()),
            client,
            config: config.clone(),
            upstream,
        }
    }

    async fn fetch_post(&self, id: &str) -> Result<Post, ExtractError> {
        let url = format!("{}{}.json", POSTS_URL, id);

        let mut request = self.client.get(&url);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.api_key.as_ref());
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url,
            });
        }

        Ok(resp.json().await?)
    }

    /// Try each upstream extractor on the post's source; first non-empty result wins.
    async fn delegate(&self, source: &str) -> Option<Vec<Media>> {
        for extractor in &self.upstream {
            let Some(incoming) = extractor.recognize(source) else {
                continue;
            };
            match extractor.extract(&incoming).await {
                Ok(media) if !media.is_empty() => {
                    tracing::debug!(source, service = %incoming.service, "delegated danbooru post");
                    return Some(media);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(source, service = %incoming.service, error = %e, "upstream extraction failed");
                }
            }
        }
        None
    }

    /// The post's own file. GIFs are transcoded like every other animation.
    async fn own_asset(&self, post: Post, source_url: &str) -> Result<Vec<Media>, ExtractError> {
        let file_url = post.file_url.ok_or(ExtractError::NotAvailable)?;
        let file_name = file_name_from_url(&file_url);
        let author = post.tag_string_artist.filter(|a| !a.is_empty());
        let author_url = author
            .as_ref()
            .map(|a| format!("https://danbooru.donmai.us/posts?tags={}", urlencoding::encode(a)));

        let media = match kind_from_extension(&file_url) {
            MediaKind::Animation => {
                ffmpeg::animation_from_gif(
                    &self.downloader,
                    Service::Danbooru,
                    &file_url,
                    &file_name,
                    source_url,
                    &[],
                )
                .await
            }
            kind => Media::new(Service::Danbooru, kind, file_name, file_url, source_url),
        };

        Ok(vec![media.with_author(author, author_url)])
    }
}

#[async_trait]
impl Extractor for DanbooruExtractor {
    fn service(&self) -> Service {
        Service::Danbooru
    }

    fn recognize(&self, url: &str) -> Option<IncomingUrl> {
        let caps = URL_REGEX.captures(url)?;
        let id = &caps[1];
        Some(IncomingUrl::new(
            Service::Danbooru,
            url,
            format!("{}{}", POSTS_URL, id),
            id,
        ))
    }

    async fn extract(&self, url: &IncomingUrl) -> Result<Vec<Media>, ExtractError> {
        let post = self.fetch_post(&url.str_id).await?;

        if let Some(source) = post.upstream_source() {
            if let Some(media) = self.delegate(&source).await {
                return Ok(media);
            }
        }

        self.own_asset(post, &url.normalized).await
    }
}

fn kind_from_extension(url: &str) -> MediaKind {
    let name = file_name_from_url(url).to_lowercase();
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("mp4") | Some("webm") => MediaKind::Video,
        Some("gif") => MediaKind::Animation,
        _ => MediaKind::Photo,
    }
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    pixiv_id: Option<u64>,
    #[serde(default)]
    tag_string_artist: Option<String>,
}

impl Post {
    /// Source URL to delegate to. A Pixiv image CDN source is rewritten to its
    /// artwork page so the Pixiv extractor recognizes it.
    fn upstream_source(&self) -> Option<String> {
        if let Some(pixiv_id) = self.pixiv_id.filter(|id| *id != 0) {
            return Some(format!("https://www.pixiv.net/artworks/{}", pixiv_id));
        }
        self.source.clone().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{local_client, serve};
    use axum::http::header::CONTENT_TYPE;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubPixiv {
        media: Vec<Media>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Extractor for StubPixiv {
        fn service(&self) -> Service {
            Service::Pixiv
        }

        fn recognize(&self, url: &str) -> Option<IncomingUrl> {
            url.starts_with("https://www.pixiv.net/artworks/")
                .then(|| IncomingUrl::new(Service::Pixiv, url, url, "1"))
        }

        async fn extract(&self, _url: &IncomingUrl) -> Result<Vec<Media>, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.media.clone())
        }
    }

    fn extractor(upstream: Vec<Arc<dyn Extractor>>) -> DanbooruExtractor {
        DanbooruExtractor::new(reqwest::Client::new(), &DanbooruConfig::default(), upstream)
    }

    #[test]
    fn recognizes_post_urls() {
        let d = extractor(vec![]);
        let incoming = d.recognize("https://danbooru.donmai.us/posts/4242?q=tag").unwrap();
        assert_eq!(incoming.normalized, "https://danbooru.donmai.us/posts/4242");
        assert_eq!(incoming.int_id, Some(4242));
        assert_eq!(
            d.recognize("http://danbooru.donmai.us/post/show/4242").unwrap().normalized,
            incoming.normalized
        );
        assert!(d.recognize("https://danbooru.donmai.us/posts?tags=cat").is_none());
    }

    #[test]
    fn pixiv_id_wins_over_raw_source() {
        let post: Post = serde_json::from_value(serde_json::json!({
            "source": "https://i.pximg.net/img-original/img/2020/01/01/00/00/00/777_p0.png",
            "file_url": "https://cdn.donmai.us/original/aa/bb/aabb.png",
            "pixiv_id": 777
        }))
        .unwrap();
        assert_eq!(
            post.upstream_source().as_deref(),
            Some("https://www.pixiv.net/artworks/777")
        );

        let plain: Post = serde_json::from_value(serde_json::json!({
            "source": "",
            "pixiv_id": null
        }))
        .unwrap();
        assert!(plain.upstream_source().is_none());
    }

    #[test]
    fn kind_follows_extension() {
        assert_eq!(kind_from_extension("https://cdn.donmai.us/a.mp4"), MediaKind::Video);
        assert_eq!(kind_from_extension("https://cdn.donmai.us/a.GIF"), MediaKind::Animation);
        assert_eq!(kind_from_extension("https://cdn.donmai.us/a.jpg"), MediaKind::Photo);
    }

    #[tokio::test]
    async fn delegation_returns_upstream_media() {
        let upstream_media = Media::new(
            Service::Pixiv,
            MediaKind::Photo,
            "777_p0.png",
            "https://i.pximg.net/777_p0.png",
            "https://www.pixiv.net/artworks/777",
        );
        let pixiv = Arc::new(StubPixiv {
            media: vec![upstream_media],
            calls: AtomicUsize::new(0),
        });
        let upstream: Arc<dyn Extractor> = pixiv.clone();
        let d = extractor(vec![upstream]);

        let media = d.delegate("https://www.pixiv.net/artworks/777").await.unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].service, Service::Pixiv);
        assert_eq!(pixiv.calls.load(Ordering::SeqCst), 1);

        assert!(d.delegate("https://example.com/x.png").await.is_none());
    }

    #[tokio::test]
    async fn empty_upstream_result_falls_through() {
        let pixiv: Arc<dyn Extractor> = Arc::new(StubPixiv {
            media: vec![],
            calls: AtomicUsize::new(0),
        });
        let d = extractor(vec![pixiv]);
        assert!(d.delegate("https://www.pixiv.net/artworks/1").await.is_none());
    }

    #[tokio::test]
    async fn gif_fallback_is_downloaded_for_transcoding() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/data/abcd.gif",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ([(CONTENT_TYPE, "image/gif")], b"GIF89a".to_vec())
                }
            }),
        );
        let base = serve(app).await;

        let d = DanbooruExtractor::new(local_client(), &DanbooruConfig::default(), vec![]);
        let post: Post = serde_json::from_value(serde_json::json!({
            "file_url": format!("{}/data/abcd.gif", base),
            "tag_string_artist": "someone"
        }))
        .unwrap();

        let media = d
            .own_asset(post, "https://danbooru.donmai.us/posts/1")
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].kind, MediaKind::Animation);
        assert_eq!(media[0].service, Service::Danbooru);
        assert_eq!(media[0].source_url, "https://danbooru.donmai.us/posts/1");
        assert_eq!(media[0].author.as_deref(), Some("someone"));
    }

    #[tokio::test]
    async fn still_fallback_passes_url_through() {
        let d = extractor(vec![]);
        let post: Post = serde_json::from_value(serde_json::json!({
            "file_url": "https://cdn.donmai.us/original/aa/bb/aabb.png"
        }))
        .unwrap();

        let media = d
            .own_asset(post, "https://danbooru.donmai.us/posts/2")
            .await
            .unwrap();
        assert_eq!(media[0].kind, MediaKind::Photo);
        assert_eq!(media[0].url, "https://cdn.donmai.us/original/aa/bb/aabb.png");
        assert!(media[0].bytes.is_none());
    }
}
