// Entry point for the relay server

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vget_relay::config::{self, Config};
use vget_relay::consumer::{Consumer, DropboxConsumer, S3Consumer, TelegramConsumer};
use vget_relay::extractor::{
    BlueskyExtractor, DanbooruExtractor, Extractor, InstagramExtractor, MisskeyExtractor,
    PixivExtractor, TumblrExtractor, TwitterExtractor,
};
use vget_relay::telegram::TelegramClient;
use vget_relay::{build_app, downloader, AppState, Registry, Store};

#[tokio::main]
async fn main() -> Result<()> {
    let debug_mode = config::debug_mode();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if debug_mode {
                    "debug,hyper=info,h2=info".into()
                } else {
                    "info,vget_relay=debug".into()
                }
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(debug = debug_mode, "Starting vget relay");

    let config = Config::load().context("Failed to load configuration")?;

    let store = Store::open(&config.store)
        .with_context(|| format!("Failed to open store at {}", config.store.path))?;
    tracing::info!(path = %config.store.path, "Store opened");

    let client = downloader::build_client(debug_mode);

    let telegram = (!config.telegram.bot_token.is_empty()).then(|| {
        TelegramClient::new(
            client.clone(),
            &config.telegram.api_base,
            &config.telegram.bot_token,
        )
    });
    if telegram.is_none() {
        tracing::warn!("No bot token configured, webhook disabled");
    }

    let registry = Registry::new(
        extractors(&config, &client),
        consumers(&config, &client, telegram.as_ref()),
    );
    tracing::info!(
        consumers = ?registry.consumers().iter().map(|c| c.name()).collect::<Vec<_>>(),
        "Registry ready"
    );

    let state = AppState {
        registry: Arc::new(registry),
        store: Arc::new(store),
        telegram,
        bot_token: config.telegram.bot_token.clone(),
        auth_secret: config.auth.secret.clone().filter(|s| !s.is_empty()),
    };
    let app = build_app(state, &config.server.submit_path);

    let addr = format!("0.0.0.0:{}", config.server.port);
    tracing::info!("Listening on {}", addr);
    tracing::info!("Submission endpoint: {}", config.server.submit_path);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Extractors in classification order. Danbooru sits first and hands posts
/// sourced from Twitter or Pixiv to those extractors.
fn extractors(config: &Config, client: &reqwest::Client) -> Vec<Arc<dyn Extractor>> {
    let twitter: Arc<dyn Extractor> =
        Arc::new(TwitterExtractor::new(client.clone(), &config.twitter));
    let pixiv: Arc<dyn Extractor> = Arc::new(PixivExtractor::new(client.clone(), &config.pixiv));

    vec![
        Arc::new(DanbooruExtractor::new(
            client.clone(),
            &config.danbooru,
            vec![twitter.clone(), pixiv.clone()],
        )),
        pixiv,
        Arc::new(TumblrExtractor::new(client.clone())),
        twitter,
        Arc::new(MisskeyExtractor::new(client.clone(), &config.misskey)),
        Arc::new(BlueskyExtractor::new(client.clone(), &config.bluesky)),
        Arc::new(InstagramExtractor::new(client.clone(), &config.instagram)),
    ]
}

fn consumers(
    config: &Config,
    client: &reqwest::Client,
    telegram: Option<&TelegramClient>,
) -> Vec<Arc<dyn Consumer>> {
    let mut consumers: Vec<Arc<dyn Consumer>> = Vec::new();

    match (telegram, config.telegram.channel.as_deref()) {
        (Some(telegram), Some(channel)) if !channel.is_empty() => {
            consumers.push(Arc::new(TelegramConsumer::new(telegram.clone(), channel)));
        }
        _ => tracing::info!("Telegram channel not configured"),
    }

    match config.dropbox.access_token.as_deref() {
        Some(token) if !token.is_empty() => {
            consumers.push(Arc::new(DropboxConsumer::new(
                client.clone(),
                token,
                &config.dropbox,
            )));
        }
        _ => tracing::info!("Dropbox not configured"),
    }

    match config.s3.bucket.as_deref() {
        Some(bucket) if !bucket.is_empty() => {
            consumers.push(Arc::new(S3Consumer::new(client.clone(), bucket, &config.s3)));
        }
        _ => tracing::info!("S3 not configured"),
    }

    consumers
}
