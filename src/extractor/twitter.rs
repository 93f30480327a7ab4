use super::types::*;
use super::Extractor;
use crate::config::TwitterConfig;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

const BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs=1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";
const GUEST_TOKEN_URL: &str = "https://api.x.com/1.1/guest/activate.json";
const GRAPHQL_URL: &str = "https://x.com/i/api/graphql/2ICDjqPd81tulZcYrtpTuQ/TweetResultByRestId";
const TWEET_DETAIL_URL: &str = "https://x.com/i/api/graphql/q94uRCEn65LZThakYcPT6g/TweetDetail";
const SYNDICATION_URL: &str = "https://cdn.syndication.twimg.com/tweet-result";
const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/115.0";
const USER_PREFIX: &str = "https://x.com/";

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:(?:www|mobile)\.)?(?:vx|fx|fixup)?(?:twitter|x)\.com/(?:(\w+)|i/web)/status/(\d+)")
        .unwrap()
});

pub struct TwitterExtractor {
    client: reqwest::Client,
    bearer_token: String,
    auth_token: Option<String>,
}

impl TwitterExtractor {
    pub fn new(client: reqwest::Client, config: &TwitterConfig) -> Self {
        Self {
            client,
            bearer_token: config
                .bearer_token
                .clone()
                .unwrap_or_else(|| BEARER_TOKEN.to_string()),
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
        }
    }

    async fn fetch_guest_token(&self) -> Result<String, ExtractError> {
        let resp = self
            .client
            .post(GUEST_TOKEN_URL)
            .header(AUTHORIZATION, format!("Bearer {}", self.bearer_token))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url: GUEST_TOKEN_URL.to_string(),
            });
        }

        #[derive(Deserialize)]
        struct GuestTokenResponse {
            guest_token: String,
        }

        let data: GuestTokenResponse = resp.json().await?;
        Ok(data.guest_token)
    }

    async fn fetch_from_syndication(&self, tweet_id: &str) -> Result<Tweet, ExtractError> {
        let url = format!("{}?id={}&token=x", SYNDICATION_URL, tweet_id);

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url,
            });
        }

        let data: SyndicationResponse = resp.json().await?;
        Ok(parse_syndication_response(data))
    }

    async fn fetch_from_graphql(
        &self,
        tweet_id: &str,
        guest_token: &str,
    ) -> Result<Tweet, ExtractError> {
        let (variables, features) = build_graphql_params(tweet_id);
        let url = format!(
            "{}?variables={}&features={}",
            GRAPHQL_URL,
            urlencoding::encode(&variables),
            urlencoding::encode(&features)
        );

        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.bearer_token))
            .header("x-guest-token", guest_token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url: GRAPHQL_URL.to_string(),
            });
        }

        let body: Value = resp.json().await?;
        let result = body
            .pointer("/data/tweetResult/result")
            .cloned()
            .ok_or(ExtractError::NotAvailable)?;
        parse_graphql_result(serde_json::from_value(result)?)
    }

    /// Logged-in `TweetDetail` call. X accepts any CSRF token as long as the
    /// `ct0` cookie and the `x-csrf-token` header agree.
    async fn fetch_from_tweet_detail(
        &self,
        tweet_id: &str,
        auth_token: &str,
    ) -> Result<Tweet, ExtractError> {
        let csrf_token = uuid::Uuid::new_v4().simple().to_string();
        let (variables, features) = build_tweet_detail_params(tweet_id);
        let url = format!(
            "{}?variables={}&features={}&fieldToggles={}",
            TWEET_DETAIL_URL,
            urlencoding::encode(&variables),
            urlencoding::encode(&features),
            urlencoding::encode(r#"{"withAuxiliaryUserLabels":false,"withArticleRichContentState":false}"#)
        );

        let mut headers = HeaderMap::new();
        let header = |value: String| {
            HeaderValue::from_str(&value).map_err(|e| ExtractError::Parse(e.to_string()))
        };
        headers.insert(AUTHORIZATION, header(format!("Bearer {}", self.bearer_token))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
        headers.insert("x-twitter-auth-type", HeaderValue::from_static("OAuth2Session"));
        headers.insert("x-twitter-client-language", HeaderValue::from_static("en"));
        headers.insert("x-twitter-active-user", HeaderValue::from_static("yes"));
        headers.insert("x-csrf-token", header(csrf_token.clone())?);
        headers.insert(
            COOKIE,
            header(format!("ct0={}; auth_token={}", csrf_token, auth_token))?,
        );

        let resp = self.client.get(&url).headers(headers).send().await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url: TWEET_DETAIL_URL.to_string(),
            });
        }

        let body: Value = resp.json().await?;
        parse_tweet_detail(&body, tweet_id)
    }
}

#[async_trait]
impl Extractor for TwitterExtractor {
    fn service(&self) -> Service {
        Service::Twitter
    }

    fn recognize(&self, url: &str) -> Option<IncomingUrl> {
        let caps = URL_REGEX.captures(url)?;
        // i/web share links carry no handle; x.com/i/status/{id} resolves the same
        let user = caps.get(1).map_or("i", |m| m.as_str());
        let id = &caps[2];
        let normalized = format!("{}{}/status/{}", USER_PREFIX, user, id);
        Some(IncomingUrl::new(Service::Twitter, url, normalized, id))
    }

    async fn extract(&self, url: &IncomingUrl) -> Result<Vec<Media>, ExtractError> {
        let tweet_id = url.str_id.as_str();

        let tweet = if let Some(auth_token) = &self.auth_token {
            self.fetch_from_tweet_detail(tweet_id, auth_token).await?
        } else {
            match self.fetch_from_syndication(tweet_id).await {
                Ok(tweet) if !tweet.media.is_empty() => tweet,
                result => {
                    if let Err(e) = result {
                        tracing::debug!(error = %e, tweet_id, "syndication failed, trying guest GraphQL");
                    }
                    let guest_token = self.fetch_guest_token().await?;
                    self.fetch_from_graphql(tweet_id, &guest_token).await?
                }
            }
        };

        Ok(tweet.into_media(&url.normalized))
    }
}

// ============ Intermediate tweet ============

#[derive(Debug, Default)]
struct Tweet {
    screen_name: Option<String>,
    name: Option<String>,
    text: String,
    media: Vec<TweetMedia>,
}

#[derive(Debug)]
struct TweetMedia {
    kind: MediaKind,
    url: String,
    /// Name derived from the CDN path, before the author prefix.
    file_name: String,
}

impl Tweet {
    fn into_media(self, source_url: &str) -> Vec<Media> {
        let author_url = self
            .screen_name
            .as_ref()
            .map(|s| format!("{}{}", USER_PREFIX, s));
        let prefix = self.screen_name.clone().unwrap_or_default();
        let author = self.name.clone().or_else(|| self.screen_name.clone());

        self.media
            .into_iter()
            .map(|m| {
                Media::new(
                    Service::Twitter,
                    m.kind,
                    format!("@{}_{}", prefix, m.file_name),
                    m.url,
                    source_url,
                )
                .with_author(author.clone(), author_url.clone())
                .with_description(Some(self.text.clone()))
            })
            .collect()
    }
}

fn photo(media_url_https: &str) -> TweetMedia {
    TweetMedia {
        kind: MediaKind::Photo,
        url: get_high_quality_image_url(media_url_https),
        file_name: file_name_from_url(media_url_https),
    }
}

fn video(kind: MediaKind, variants: &[Variant]) -> Option<TweetMedia> {
    let best = variants
        .iter()
        .filter(|v| v.content_type == "video/mp4")
        .max_by_key(|v| v.bitrate.unwrap_or(0))?;
    Some(TweetMedia {
        kind,
        url: best.url.clone(),
        file_name: file_name_from_url(&best.url),
    })
}

fn collect_media(entities: &[EntityMedia]) -> Vec<TweetMedia> {
    entities
        .iter()
        .filter_map(|media| match media.r#type.as_str() {
            "photo" => Some(photo(&media.media_url_https)),
            "video" => media
                .video_info
                .as_ref()
                .and_then(|info| video(MediaKind::Video, &info.variants)),
            "animated_gif" => media
                .video_info
                .as_ref()
                .and_then(|info| video(MediaKind::Animation, &info.variants)),
            _ => None,
        })
        .collect()
}

fn parse_syndication_response(data: SyndicationResponse) -> Tweet {
    let mut media = collect_media(data.media_details.as_deref().unwrap_or_default());

    // Single-video tweets sometimes only carry the top-level `video` field
    if media.is_empty() {
        if let Some(src) = data.video.as_ref().and_then(|v| {
            v.variants
                .iter()
                .filter(|variant| variant.r#type == "video/mp4")
                .find_map(|variant| variant.src.clone())
        }) {
            media.push(TweetMedia {
                kind: MediaKind::Video,
                file_name: file_name_from_url(&src),
                url: src,
            });
        }
    }

    Tweet {
        screen_name: data.user.as_ref().map(|u| u.screen_name.clone()),
        name: data.user.and_then(|u| u.name),
        text: data.text,
        media,
    }
}

/// Walk a `TweetDetail` timeline to the focal tweet's result.
fn parse_tweet_detail(body: &Value, tweet_id: &str) -> Result<Tweet, ExtractError> {
    let instructions = body
        .pointer("/data/threaded_conversation_with_injections_v2/instructions")
        .and_then(Value::as_array)
        .ok_or_else(|| ExtractError::Parse("missing timeline instructions".into()))?;

    let entry_id = format!("tweet-{}", tweet_id);
    let result = instructions
        .iter()
        .filter_map(|i| i.get("entries").and_then(Value::as_array))
        .flatten()
        .find(|entry| entry.get("entryId").and_then(Value::as_str) == Some(entry_id.as_str()))
        .and_then(|entry| entry.pointer("/content/itemContent/tweet_results/result"))
        .cloned()
        .ok_or(ExtractError::NotAvailable)?;

    parse_graphql_result(serde_json::from_value(result)?)
}

fn parse_graphql_result(result: GraphQLResult) -> Result<Tweet, ExtractError> {
    match result.typename.as_deref() {
        Some("TweetTombstone") => return Err(ExtractError::NotAvailable),
        Some("TweetUnavailable") => {
            return match result.reason.as_deref() {
                Some("NsfwLoggedOut") | Some("Protected") => Err(ExtractError::AuthRequired),
                _ => Err(ExtractError::NotAvailable),
            };
        }
        _ => {}
    }

    // TweetWithVisibilityResults nests the real tweet one level down
    let (legacy, core) = match (&result.legacy, &result.tweet) {
        (Some(legacy), _) => (legacy, result.core.as_ref()),
        (None, Some(tweet)) => (
            tweet
                .legacy
                .as_ref()
                .ok_or_else(|| ExtractError::Parse("Could not find tweet data".into()))?,
            tweet.core.as_ref(),
        ),
        (None, None) => return Err(ExtractError::Parse("Could not find tweet data".into())),
    };

    let user = core.and_then(|c| c.user_results.result.as_ref());
    let screen_name = user.and_then(|u| {
        u.core
            .as_ref()
            .and_then(|c| c.screen_name.clone())
            .or_else(|| u.legacy.as_ref().and_then(|l| l.screen_name.clone()))
    });
    let name = user.and_then(|u| {
        u.core
            .as_ref()
            .and_then(|c| c.name.clone())
            .or_else(|| u.legacy.as_ref().and_then(|l| l.name.clone()))
    });

    let plain = legacy.entities.as_ref().map(|e| e.media.as_slice()).unwrap_or_default();
    let extended = legacy
        .extended_entities
        .as_ref()
        .map(|e| e.media.as_slice())
        .unwrap_or_default();
    let entities = if extended.len() >= plain.len() { extended } else { plain };

    Ok(Tweet {
        screen_name,
        name,
        text: display_text(&legacy.full_text, legacy.display_text_range.as_deref()),
        media: collect_media(entities),
    })
}

// ============ Helper functions ============

fn build_graphql_params(tweet_id: &str) -> (String, String) {
    let variables = serde_json::json!({
        "tweetId": tweet_id,
        "withCommunity": false,
        "includePromotedContent": false,
        "withVoice": false
    });

    (variables.to_string(), features().to_string())
}

fn build_tweet_detail_params(tweet_id: &str) -> (String, String) {
    let variables = serde_json::json!({
        "focalTweetId": tweet_id,
        "with_rux_injections": false,
        "includePromotedContent": true,
        "withCommunity": true,
        "withQuickPromoteEligibilityTweetFields": true,
        "withBirdwatchNotes": true,
        "withVoice": true,
        "withV2Timeline": true
    });

    (variables.to_string(), features().to_string())
}

fn features() -> Value {
    serde_json::json!({
        "rweb_lists_timeline_redesign_enabled": true,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": false,
        "tweet_awards_web_tipping_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "responsive_web_media_download_video_enabled": false,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_enhance_cards_enabled": false
    })
}

/// Visible part of a tweet's text; `display_text_range` counts code points.
fn display_text(full_text: &str, range: Option<&[usize]>) -> String {
    match range {
        Some([start, end]) if start <= end => full_text
            .chars()
            .skip(*start)
            .take(end - start)
            .collect(),
        _ => full_text.to_string(),
    }
}

fn get_high_quality_image_url(image_url: &str) -> String {
    let base_url = image_url.split('?').next().unwrap_or(image_url);
    let format = if base_url.ends_with(".png") {
        "png"
    } else if base_url.ends_with(".webp") {
        "webp"
    } else {
        "jpg"
    };
    match base_url.rsplit_once('.') {
        Some((stem, _)) if stem.contains("/media/") => {
            format!("{}?format={}&name=orig", stem, format)
        }
        _ => format!("{}?format={}&name=orig", base_url, format),
    }
}

// ============ Response structs ============

#[derive(Debug, Deserialize)]
struct SyndicationResponse {
    #[serde(default)]
    text: String,
    user: Option<SyndicationUser>,
    #[serde(rename = "mediaDetails")]
    media_details: Option<Vec<EntityMedia>>,
    video: Option<SyndicationVideo>,
}

#[derive(Debug, Deserialize)]
struct SyndicationUser {
    screen_name: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SyndicationVideo {
    variants: Vec<SyndicationVideoVariant>,
}

#[derive(Debug, Deserialize)]
struct SyndicationVideoVariant {
    r#type: String,
    src: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQLResult {
    #[serde(rename = "__typename")]
    typename: Option<String>,
    legacy: Option<GraphQLLegacy>,
    core: Option<GraphQLCore>,
    tweet: Option<Box<GraphQLResult>>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQLCore {
    user_results: GraphQLUserResults,
}

#[derive(Debug, Deserialize)]
struct GraphQLUserResults {
    result: Option<GraphQLUser>,
}

#[derive(Debug, Deserialize)]
struct GraphQLUser {
    legacy: Option<GraphQLUserNames>,
    core: Option<GraphQLUserNames>,
}

#[derive(Debug, Deserialize)]
struct GraphQLUserNames {
    screen_name: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQLLegacy {
    #[serde(default)]
    full_text: String,
    display_text_range: Option<Vec<usize>>,
    entities: Option<MediaEntities>,
    extended_entities: Option<MediaEntities>,
}

#[derive(Debug, Deserialize)]
struct MediaEntities {
    #[serde(default)]
    media: Vec<EntityMedia>,
}

#[derive(Debug, Deserialize)]
struct EntityMedia {
    r#type: String,
    #[serde(default)]
    media_url_https: String,
    video_info: Option<VideoInfo>,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    variants: Vec<Variant>,
}

#[derive(Debug, Deserialize)]
struct Variant {
    #[serde(default)]
    bitrate: Option<i64>,
    content_type: String,
    url: String,
}
