use super::types::*;
use super::Extractor;
use crate::config::PixivConfig;
use crate::downloader::SimpleDownloader;
use crate::ffmpeg;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use tokio::sync::Mutex;

const OAUTH_URL: &str = "https://oauth.secure.pixiv.net/auth/token";
const API_BASE: &str = "https://app-api.pixiv.net";
const ARTWORK_PREFIX: &str = "https://www.pixiv.net/artworks/";
const REFERER: &str = "https://www.pixiv.net/";
const APP_UA: &str = "PixivAndroidApp/5.0.234 (Android 11; Pixel 5)";
const CLIENT_HASH_SALT: &str = "28c1fdd170a5204386cb1313c7077b34f83e4aaf4aa829ce78c231e05b0bae2c";

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:www\.|touch\.)?pixiv\.net/\S*?(?:illust_id=|artworks/)(\d+)").unwrap()
});

#[derive(Debug, Clone)]
struct OauthToken {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

pub struct PixivExtractor {
    client: reqwest::Client,
    downloader: SimpleDownloader,
    config: PixivConfig,
    token: Mutex<Option<OauthToken>>,
}

impl PixivExtractor {
    pub fn new(client: reqwest::Client, config: &PixivConfig) -> Self {
        Self {
            downloader: SimpleDownloader::new(client.clone()),
            client,
            config: config.clone(),
            token: Mutex::new(None),
        }
    }

    fn app_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let (time, hash) = client_hash(Utc::now());
        request
            .header("User-Agent", APP_UA)
            .header("Accept-Language", "en_US")
            .header("App-OS", "android")
            .header("App-OS-Version", "11")
            .header("App-Version", "5.0.234")
            .header("X-Client-Time", time)
            .header("X-Client-Hash", hash)
    }

    /// Cached access token, refreshed or re-authorized when it expires.
    async fn access_token(&self) -> Result<String, ExtractError> {
        let mut guard = self.token.lock().await;

        if let Some(token) = guard.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.access_token.clone());
            }
        }

        let refresh_token = guard
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .or_else(|| self.config.refresh_token.clone());

        let mut form: Vec<(&str, String)> = vec![
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
            ("get_secure_url", "true".to_string()),
            ("include_policy", "true".to_string()),
        ];
        match (refresh_token, &self.config.username, &self.config.password) {
            (Some(refresh), _, _) => {
                form.push(("grant_type", "refresh_token".to_string()));
                form.push(("refresh_token", refresh));
            }
            (None, Some(username), Some(password)) => {
                form.push(("grant_type", "password".to_string()));
                form.push(("username", username.clone()));
                form.push(("password", password.clone()));
            }
            _ => return Err(ExtractError::AuthRequired),
        }

        let resp = self
            .app_headers(self.client.post(OAUTH_URL))
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url: OAUTH_URL.to_string(),
            });
        }

        let body: Value = resp.json().await?;
        let token = parse_token(body, Utc::now())?;
        tracing::debug!(expires_at = %token.expires_at, "pixiv token refreshed");

        let access_token = token.access_token.clone();
        *guard = Some(token);
        Ok(access_token)
    }

    async fn illust_detail(&self, illust_id: &str) -> Result<Illust, ExtractError> {
        let access_token = self.access_token().await?;
        let url = format!("{}/v1/illust/detail", API_BASE);

        let resp = self
            .app_headers(self.client.get(&url))
            .query(&[("illust_id", illust_id)])
            .bearer_auth(access_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url,
            });
        }

        let detail: IllustDetail = resp.json().await?;
        Ok(detail.illust)
    }

    async fn extract_pages(&self, illust: &Illust, source_url: &str) -> Vec<Media> {
        let mut result = Vec::new();

        for image_url in page_urls(illust) {
            match self.downloader.download(&image_url, &[("Referer", REFERER)]).await {
                Ok(bytes) => result.push(
                    Media::new(
                        Service::Pixiv,
                        MediaKind::Photo,
                        file_name_from_url(&image_url),
                        image_url,
                        source_url,
                    )
                    .with_bytes(bytes),
                ),
                Err(e) => {
                    tracing::error!(error = %e, url = %image_url, "Get pixiv image failed");
                }
            }
        }

        result
    }

    async fn extract_ugoira(&self, source_url: &str) -> Result<Media, ExtractError> {
        let resp = self
            .client
            .post(&self.config.ugoira_endpoint)
            .form(&[("format", "gif"), ("url", source_url)])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url: self.config.ugoira_endpoint.clone(),
            });
        }

        #[derive(Deserialize)]
        struct ConvertResponse {
            url: String,
        }

        let converted: ConvertResponse = resp.json().await?;
        let file_name = file_name_from_url(&converted.url);

        Ok(ffmpeg::animation_from_gif(
            &self.downloader,
            Service::Pixiv,
            &converted.url,
            &file_name,
            source_url,
            &[],
        )
        .await)
    }
}

#[async_trait]
impl Extractor for PixivExtractor {
    fn service(&self) -> Service {
        Service::Pixiv
    }

    fn recognize(&self, url: &str) -> Option<IncomingUrl> {
        let caps = URL_REGEX.captures(url)?;
        let id = &caps[1];
        Some(IncomingUrl::new(
            Service::Pixiv,
            url,
            format!("{}{}", ARTWORK_PREFIX, id),
            id,
        ))
    }

    async fn extract(&self, url: &IncomingUrl) -> Result<Vec<Media>, ExtractError> {
        let illust = self.illust_detail(&url.str_id).await?;

        let media = match illust.r#type.as_str() {
            "illust" | "manga" => self.extract_pages(&illust, &url.normalized).await,
            "ugoira" => vec![self.extract_ugoira(&url.normalized).await?],
            other => {
                tracing::warn!(kind = other, id = %url.str_id, "unknown pixiv illust type");
                Vec::new()
            }
        };

        let author_url = format!("https://www.pixiv.net/users/{}", illust.user.id);
        Ok(media
            .into_iter()
            .map(|m| {
                m.with_author(Some(illust.user.name.clone()), Some(author_url.clone()))
                    .with_title(Some(illust.title.clone()))
                    .with_description(Some(illust.caption.clone()))
            })
            .collect())
    }
}

/// `X-Client-Time` / `X-Client-Hash` pair expected by the app API.
fn client_hash(now: DateTime<Utc>) -> (String, String) {
    let time = now.format("%Y-%m-%dT%H:%M:%S+00:00").to_string();
    let hash = format!("{:x}", md5::compute(format!("{}{}", time, CLIENT_HASH_SALT)));
    (time, hash)
}

fn parse_token(body: Value, now: DateTime<Utc>) -> Result<OauthToken, ExtractError> {
    // Older responses wrap the token in `response`
    let body = match body.get("response") {
        Some(inner) => inner.clone(),
        None => body,
    };
    let token: TokenResponse = serde_json::from_value(body)?;
    // Renew a minute early
    let lifetime = (token.expires_in - 60).max(0);
    Ok(OauthToken {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at: now + Duration::seconds(lifetime),
    })
}

/// Original-size page URLs, in page order.
fn page_urls(illust: &Illust) -> Vec<String> {
    if illust.page_count <= 1 || illust.meta_pages.is_empty() {
        illust
            .meta_single_page
            .get("original_image_url")
            .or_else(|| illust.image_urls.get("large"))
            .cloned()
            .into_iter()
            .collect()
    } else {
        illust
            .meta_pages
            .iter()
            .filter_map(|page| page.image_urls.get("original").cloned())
            .collect()
    }
}

// ============ Response structs ============

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct IllustDetail {
    illust: Illust,
}

#[derive(Debug, Deserialize)]
struct Illust {
    #[serde(default)]
    title: String,
    r#type: String,
    #[serde(default)]
    caption: String,
    #[serde(default)]
    image_urls: HashMap<String, String>,
    #[serde(default)]
    page_count: u32,
    #[serde(default)]
    meta_single_page: HashMap<String, String>,
    #[serde(default)]
    meta_pages: Vec<MetaPage>,
    user: IllustUser,
}

#[derive(Debug, Deserialize)]
struct MetaPage {
    image_urls: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct IllustUser {
    id: u64,
    #[serde(default)]
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn extractor() -> PixivExtractor {
        PixivExtractor::new(reqwest::Client::new(), &PixivConfig::default())
    }

    #[test]
    fn recognizes_artwork_and_legacy_urls() {
        let p = extractor();
        for url in [
            "https://www.pixiv.net/artworks/12345678",
            "https://www.pixiv.net/en/artworks/12345678?utm=x",
            "https://www.pixiv.net/member_illust.php?mode=medium&illust_id=12345678",
            "http://touch.pixiv.net/member_illust.php?illust_id=12345678",
        ] {
            let incoming = p.recognize(url).expect(url);
            assert_eq!(incoming.normalized, "https://www.pixiv.net/artworks/12345678");
            assert_eq!(incoming.int_id, Some(12345678));
        }
        assert!(p.recognize("https://www.pixiv.net/users/1").is_none());

        let again = p.recognize("https://www.pixiv.net/artworks/12345678").unwrap();
        assert_eq!(p.recognize(&again.normalized).unwrap(), again);
    }

    #[test]
    fn single_page_prefers_original() {
        let illust: Illust = serde_json::from_value(serde_json::json!({
            "type": "illust",
            "page_count": 1,
            "image_urls": {"large": "https://i.pximg.net/large.jpg"},
            "meta_single_page": {"original_image_url": "https://i.pximg.net/img-original/1_p0.png"},
            "meta_pages": [],
            "user": {"id": 7, "name": "artist"}
        }))
        .unwrap();
        assert_eq!(page_urls(&illust), vec!["https://i.pximg.net/img-original/1_p0.png"]);
    }

    #[test]
    fn manga_expands_pages_in_order() {
        let illust: Illust = serde_json::from_value(serde_json::json!({
            "type": "manga",
            "page_count": 3,
            "meta_pages": [
                {"image_urls": {"original": "https://i.pximg.net/1_p0.jpg"}},
                {"image_urls": {"original": "https://i.pximg.net/1_p1.jpg"}},
                {"image_urls": {"original": "https://i.pximg.net/1_p2.jpg"}}
            ],
            "user": {"id": 7}
        }))
        .unwrap();
        assert_eq!(
            page_urls(&illust),
            vec![
                "https://i.pximg.net/1_p0.jpg",
                "https://i.pximg.net/1_p1.jpg",
                "https://i.pximg.net/1_p2.jpg"
            ]
        );
    }

    #[test]
    fn token_accepts_wrapped_and_flat_bodies() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let flat = parse_token(
            serde_json::json!({"access_token": "a", "refresh_token": "r", "expires_in": 3600}),
            now,
        )
        .unwrap();
        assert_eq!(flat.access_token, "a");
        assert_eq!(flat.expires_at, now + Duration::seconds(3540));

        let wrapped = parse_token(
            serde_json::json!({"response": {"access_token": "b", "expires_in": 10}}),
            now,
        )
        .unwrap();
        assert_eq!(wrapped.access_token, "b");
        assert_eq!(wrapped.expires_at, now);
    }

    #[test]
    fn client_hash_is_md5_of_time_and_salt() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (time, hash) = client_hash(now);
        assert_eq!(time, "2024-01-01T00:00:00+00:00");
        assert_eq!(hash.len(), 32);
        assert_eq!(
            hash,
            format!("{:x}", md5::compute(format!("{}{}", time, CLIENT_HASH_SALT)))
        );
    }

    #[tokio::test]
    async fn missing_credentials_require_auth() {
        let p = extractor();
        assert!(matches!(p.access_token().await, Err(ExtractError::AuthRequired)));
    }
}
