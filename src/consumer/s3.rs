use super::{Consumer, DeliveryError};
use crate::config::S3Config;
use crate::downloader::SimpleDownloader;
use crate::extractor::Media;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

/// Archives media into an S3 (or S3-compatible) bucket.
pub struct S3Consumer {
    client: Client,
    bucket: String,
    save_path: String,
    downloader: SimpleDownloader,
}

impl S3Consumer {
    pub fn new(http: reqwest::Client, bucket: &str, config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "vget-relay",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
            save_path: config.save_path.trim_end_matches('/').to_string(),
            downloader: SimpleDownloader::new(http),
        }
    }
}

fn object_key(save_path: &str, media: &Media) -> String {
    format!(
        "{}/{}/{}",
        save_path,
        media.service.as_str().to_lowercase(),
        media.file_name
    )
}

#[async_trait]
impl Consumer for S3Consumer {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn deliver(&self, media: &Media) -> Result<(), DeliveryError> {
        let body = match &media.bytes {
            Some(bytes) => bytes.clone(),
            None => self.downloader.download(&media.url, &[]).await?,
        };
        let key = object_key(&self.save_path, media);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| DeliveryError::S3(DisplayErrorContext(e).to_string()))?;

        tracing::debug!(bucket = %self.bucket, %key, "uploaded to s3");
        Ok(())
    }
}
