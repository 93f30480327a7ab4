use crate::extractor::ExtractError;
use futures::StreamExt;
use reqwest::Client;

/// Upper bound on a single in-memory download.
const MAX_BYTES: usize = 50 * 1024 * 1024;

/// Downloads a media file fully into memory.
#[derive(Clone)]
pub struct SimpleDownloader {
    client: Client,
}

impl SimpleDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn download(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Vec<u8>, ExtractError> {
        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(ExtractError::Upstream {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mut buf = Vec::with_capacity(
            response.content_length().unwrap_or(0).min(MAX_BYTES as u64) as usize,
        );
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > MAX_BYTES {
                return Err(ExtractError::Parse(format!(
                    "{} exceeds {} bytes",
                    url, MAX_BYTES
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        tracing::debug!(url, size = buf.len(), "downloaded media");
        Ok(buf)
    }
}
