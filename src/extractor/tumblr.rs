use super::types::*;
use super::Extractor;
use crate::downloader::SimpleDownloader;
use crate::ffmpeg;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://([\w-]+)\.tumblr\.com/post/(\d+)(?:/([\w-]+))?").unwrap()
});

// tumblr_<hash>_<size>.<ext> on numbered media hosts
static LEGACY_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)src="(https?://\d+\.media\.tumblr\.com/\w+/)(tumblr_\w+?_)(\d+)\.(jpe?g|gif|png)"#)
        .unwrap()
});

// <hash>/<hash>/s<W>x<H>[_c<n>]/<name>.<ext>
static MODERN_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(https?://\d+\.media\.tumblr\.com/[\w-]+/[\w-]+/)s\d+x\d+(?:_c\d+)?/([\w-]+\.(?:jpe?g|gif|png|webp))"#,
    )
    .unwrap()
});

const LARGEST_SIZE: &str = "s2048x3072";

pub struct TumblrExtractor {
    client: reqwest::Client,
    downloader: SimpleDownloader,
}

impl TumblrExtractor {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            downloader: SimpleDownloader::new(client.clone()),
            client,
        }
    }
}

#[async_trait]
impl Extractor for TumblrExtractor {
    fn service(&self) -> Service {
        Service::Tumblr
    }

    fn recognize(&self, url: &str) -> Option<IncomingUrl> {
        let caps = URL_REGEX.captures(url)?;
        let blog = &caps[1];
        let id = &caps[2];
        let normalized = match caps.get(3) {
            Some(slug) => format!("https://{}.tumblr.com/post/{}/{}", blog, id, slug.as_str()),
            None => format!("https://{}.tumblr.com/post/{}", blog, id),
        };
        Some(IncomingUrl::new(Service::Tumblr, url, normalized, id).with_host(blog))
    }

    async fn extract(&self, url: &IncomingUrl) -> Result<Vec<Media>, ExtractError> {
        let resp = self.client.get(&url.normalized).send().await?;
        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url: url.normalized.clone(),
            });
        }
        let html = resp.text().await?;

        let images = scrape_images(&html);
        if images.is_empty() {
            tracing::debug!(url = %url.normalized, "no tumblr media found in page");
        }

        let author_url = url.host.as_ref().map(|blog| format!("https://{}.tumblr.com/", blog));

        let mut result = Vec::with_capacity(images.len());
        for image in images {
            let media = if image.url.to_lowercase().ends_with(".gif") {
                ffmpeg::animation_from_gif(
                    &self.downloader,
                    Service::Tumblr,
                    &image.url,
                    &image.file_name,
                    &url.normalized,
                    &[],
                )
                .await
            } else {
                Media::new(
                    Service::Tumblr,
                    MediaKind::Photo,
                    image.file_name,
                    image.url,
                    &url.normalized,
                )
            };
            result.push(media.with_author(url.host.clone(), author_url.clone()));
        }

        Ok(result)
    }
}

#[derive(Debug, PartialEq)]
struct ScrapedImage {
    url: String,
    file_name: String,
}

/// Post images upgraded to their largest rendition, in page order, without repeats.
fn scrape_images(html: &str) -> Vec<ScrapedImage> {
    let mut found: Vec<(usize, ScrapedImage)> = Vec::new();

    for caps in LEGACY_IMAGE.captures_iter(html) {
        let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let prefix = &caps[2];
        let ext = &caps[4];
        found.push((
            start,
            ScrapedImage {
                url: format!("{}{}1280.{}", &caps[1], prefix, ext),
                file_name: format!("{}.{}", prefix.trim_end_matches('_'), ext),
            },
        ));
    }

    for caps in MODERN_IMAGE.captures_iter(html) {
        let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
        found.push((
            start,
            ScrapedImage {
                url: format!("{}{}/{}", &caps[1], LARGEST_SIZE, &caps[2]),
                file_name: caps[2].to_string(),
            },
        ));
    }

    found.sort_by_key(|(start, _)| *start);

    let mut result: Vec<ScrapedImage> = Vec::new();
    for (_, image) in found {
        if !result.iter().any(|seen| seen.url == image.url) {
            result.push(image);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_post_urls() {
        let t = TumblrExtractor::new(reqwest::Client::new());

        let with_slug = t
            .recognize("https://staff.tumblr.com/post/123456/some-slug?source=share")
            .unwrap();
        assert_eq!(with_slug.normalized, "https://staff.tumblr.com/post/123456/some-slug");
        assert_eq!(with_slug.host.as_deref(), Some("staff"));
        assert_eq!(t.recognize(&with_slug.normalized).unwrap().normalized, with_slug.normalized);

        let bare = t.recognize("http://staff.tumblr.com/post/123456").unwrap();
        assert_eq!(bare.normalized, "https://staff.tumblr.com/post/123456");

        assert!(t.recognize("https://staff.tumblr.com/archive").is_none());
        assert!(t.recognize("https://www.tumblr.com/dashboard").is_none());
    }

    #[test]
    fn upgrades_legacy_and_modern_images_in_order() {
        let html = r#"
            <img src="https://64.media.tumblr.com/abc123/def-456/s640x960/photo_one.jpg">
            <img src="https://66.media.tumblr.com/0f1e2d/tumblr_abcDEF_500.gif">
            <img src="https://64.media.tumblr.com/abc123/def-456/s250x400/photo_one.jpg">
            <img src="https://64.media.tumblr.com/aaa/bbb/s500x750_c1/second.png">
        "#;

        let images = scrape_images(html);
        assert_eq!(
            images,
            vec![
                ScrapedImage {
                    url: "https://64.media.tumblr.com/abc123/def-456/s2048x3072/photo_one.jpg".into(),
                    file_name: "photo_one.jpg".into(),
                },
                ScrapedImage {
                    url: "https://66.media.tumblr.com/0f1e2d/tumblr_abcDEF_1280.gif".into(),
                    file_name: "tumblr_abcDEF.gif".into(),
                },
                ScrapedImage {
                    url: "https://64.media.tumblr.com/aaa/bbb/s2048x3072/second.png".into(),
                    file_name: "second.png".into(),
                },
            ]
        );
    }

    #[test]
    fn page_without_media_yields_nothing() {
        assert!(scrape_images("<html><body>text only</body></html>").is_empty());
    }
}
