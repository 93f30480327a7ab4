mod bluesky;
mod danbooru;
mod instagram;
mod misskey;
mod pixiv;
mod tumblr;
mod twitter;
mod types;

pub use bluesky::BlueskyExtractor;
pub use danbooru::DanbooruExtractor;
pub use instagram::{InstagramExtractor, InstagramStrategy};
pub use misskey::MisskeyExtractor;
pub use pixiv::PixivExtractor;
pub use tumblr::TumblrExtractor;
pub use twitter::TwitterExtractor;
pub use types::*;

use async_trait::async_trait;

/// A provider adapter: recognizes one platform's URLs and fetches their media.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn service(&self) -> Service;

    /// Pure pattern match against the URL text. Never touches the network.
    fn recognize(&self, url: &str) -> Option<IncomingUrl>;

    fn owns(&self, service: Service) -> bool {
        self.service() == service
    }

    /// Fetch the media behind a URL this extractor recognized.
    ///
    /// Every returned `Media` carries a source URL and a service tag. Media
    /// obtained by delegating to another extractor keeps that extractor's tags.
    async fn extract(&self, url: &IncomingUrl) -> Result<Vec<Media>, ExtractError>;
}
