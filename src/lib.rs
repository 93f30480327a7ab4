pub mod config;
pub mod consumer;
pub mod downloader;
pub mod extractor;
pub mod ffmpeg;
pub mod registry;
pub mod server;
pub mod store;
pub mod telegram;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use registry::Registry;
pub use server::{build_app, AppState};
pub use store::Store;
