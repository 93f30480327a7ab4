use super::{Consumer, DeliveryError};
use crate::config::DropboxConfig;
use crate::extractor::Media;
use async_trait::async_trait;
use serde_json::json;

const UPLOAD_URL: &str = "https://content.dropboxapi.com/2/files/upload";
const SAVE_URL_URL: &str = "https://api.dropboxapi.com/2/files/save_url";

/// Archives media into a Dropbox folder, one subfolder per service.
pub struct DropboxConsumer {
    client: reqwest::Client,
    access_token: String,
    save_path: String,
}

impl DropboxConsumer {
    pub fn new(client: reqwest::Client, access_token: &str, config: &DropboxConfig) -> Self {
        Self {
            client,
            access_token: access_token.to_string(),
            save_path: config.save_path.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, media: &Media) -> String {
        format!("{}/{}/{}", self.save_path, media.service, media.file_name)
    }

    async fn check(resp: reqwest::Response) -> Result<(), DeliveryError> {
        if resp.status().is_success() {
            return Ok(());
        }
        Err(DeliveryError::Api {
            service: "dropbox",
            status: resp.status().as_u16(),
            body: resp.text().await.unwrap_or_default(),
        })
    }
}

/// `Dropbox-API-Arg` must be ASCII; everything else goes out as `\uXXXX`.
fn header_safe_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    for c in value.to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[async_trait]
impl Consumer for DropboxConsumer {
    fn name(&self) -> &'static str {
        "dropbox"
    }

    async fn deliver(&self, media: &Media) -> Result<(), DeliveryError> {
        let path = self.path_for(media);

        let resp = match &media.bytes {
            Some(bytes) => {
                let arg = json!({
                    "path": path,
                    "mode": "add",
                    "autorename": true,
                    "mute": true,
                });
                self.client
                    .post(UPLOAD_URL)
                    .bearer_auth(&self.access_token)
                    .header("Dropbox-API-Arg", header_safe_json(&arg))
                    .header("Content-Type", "application/octet-stream")
                    .body(bytes.clone())
                    .send()
                    .await?
            }
            None => {
                self.client
                    .post(SAVE_URL_URL)
                    .bearer_auth(&self.access_token)
                    .json(&json!({ "path": path, "url": media.url }))
                    .send()
                    .await?
            }
        };

        Self::check(resp).await?;
        tracing::debug!(%path, "saved to dropbox");
        Ok(())
    }
}
