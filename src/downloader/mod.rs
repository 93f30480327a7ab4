mod simple;

pub use simple::SimpleDownloader;

use std::time::Duration;

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Build the HTTP client shared by every extractor and consumer.
///
/// `insecure` disables TLS certificate verification (local debugging only).
pub fn build_client(insecure: bool) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .cookie_store(true)
        .danger_accept_invalid_certs(insecure)
        .build()
        .unwrap_or_default()
}
