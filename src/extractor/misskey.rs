use super::types::*;
use super::Extractor;
use crate::config::MisskeyConfig;
use crate::downloader::{SimpleDownloader, USER_AGENT};
use crate::ffmpeg;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

/// Notes on a configured set of Misskey instances.
pub struct MisskeyExtractor {
    client: reqwest::Client,
    downloader: SimpleDownloader,
    url_regex: Option<Regex>,
}

impl MisskeyExtractor {
    pub fn new(client: reqwest::Client, config: &MisskeyConfig) -> Self {
        Self {
            downloader: SimpleDownloader::new(client.clone()),
            client,
            url_regex: instance_regex(&config.instances),
        }
    }

    async fn fetch_note(&self, host: &str, note_id: &str) -> Result<Note, ExtractError> {
        let url = format!("https://{}/api/notes/show", host);

        let resp = self
            .client
            .post(&url)
            .header("User-Agent", USER_AGENT)
            .json(&serde_json::json!({ "noteId": note_id }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ExtractError::Upstream {
                status: resp.status().as_u16(),
                url,
            });
        }

        Ok(resp.json().await?)
    }
}

fn instance_regex(instances: &[String]) -> Option<Regex> {
    if instances.is_empty() {
        return None;
    }
    let hosts: Vec<String> = instances.iter().map(|h| regex::escape(h)).collect();
    let pattern = format!(r"(?i)https?://({})/notes/(\w+)", hosts.join("|"));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(error = %e, "invalid misskey instance list");
            None
        }
    }
}

#[async_trait]
impl Extractor for MisskeyExtractor {
    fn service(&self) -> Service {
        Service::Misskey
    }

    fn recognize(&self, url: &str) -> Option<IncomingUrl> {
        let caps = self.url_regex.as_ref()?.captures(url)?;
        let host = caps[1].to_lowercase();
        let id = &caps[2];
        Some(
            IncomingUrl::new(
                Service::Misskey,
                url,
                format!("https://{}/notes/{}", host, id),
                id,
            )
            .with_host(host),
        )
    }

    async fn extract(&self, url: &IncomingUrl) -> Result<Vec<Media>, ExtractError> {
        let host = url
            .host
            .as_deref()
            .ok_or_else(|| ExtractError::InvalidUrl(url.original.clone()))?;
        let note = self.fetch_note(host, &url.str_id).await?;

        let author_url = format!("https://{}/@{}", host, note.user.username);
        let mut result = Vec::new();

        for file in &note.files {
            let media = if file.r#type == "image/gif" {
                ffmpeg::animation_from_gif(
                    &self.downloader,
                    Service::Misskey,
                    &file.url,
                    &file.name,
                    &url.normalized,
                    &[],
                )
                .await
            } else {
                let kind = match file.r#type.split('/').next() {
                    Some("image") => MediaKind::Photo,
                    Some("video") => MediaKind::Video,
                    _ => continue,
                };
                Media::new(Service::Misskey, kind, &file.name, &file.url, &url.normalized)
            };

            result.push(
                media
                    .with_author(note.user.display_name(), Some(author_url.clone()))
                    .with_description(note.text.clone()),
            );
        }

        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct Note {
    #[serde(default)]
    text: Option<String>,
    user: NoteUser,
    #[serde(default)]
    files: Vec<NoteFile>,
}

#[derive(Debug, Deserialize)]
struct NoteUser {
    #[serde(default)]
    name: Option<String>,
    username: String,
}

impl NoteUser {
    fn display_name(&self) -> Option<String> {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| Some(self.username.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct NoteFile {
    name: String,
    r#type: String,
    url: String,
}
