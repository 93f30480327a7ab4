use crate::downloader::SimpleDownloader;
use crate::extractor::{Media, MediaKind, Service};
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Transcode an animated GIF into an H.264 MP4 suitable for looping playback.
pub async fn gif_to_mp4(gif: Vec<u8>) -> Result<Vec<u8>, TranscodeError> {
    tokio::task::spawn_blocking(move || {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.gif");
        let output = dir.path().join("output.mp4");
        std::fs::write(&input, &gif)?;

        let mut cmd = FfmpegCommand::new();
        cmd.args(["-y"])
            .input(input.to_string_lossy())
            .args(["-movflags", "+faststart"])
            .args(["-pix_fmt", "yuv420p"])
            // libx264 needs even dimensions
            .args(["-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2"])
            .args(["-c:v", "libx264"])
            .output(output.to_string_lossy());

        run(cmd, &output)?;
        Ok(std::fs::read(&output)?)
    })
    .await?
}

/// Remux a remote stream (e.g. an HLS playlist) into a single MP4 without re-encoding.
pub async fn remux_to_mp4(input_url: &str) -> Result<Vec<u8>, TranscodeError> {
    let input_url = input_url.to_string();
    tokio::task::spawn_blocking(move || {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("output.mp4");

        let mut cmd = FfmpegCommand::new();
        cmd.args(["-y"])
            .input(&input_url)
            .args(["-c", "copy"])
            .args(["-bsf:a", "aac_adtstoasc"])
            .output(output.to_string_lossy());

        run(cmd, &output)?;
        Ok(std::fs::read(&output)?)
    })
    .await?
}

fn run(mut cmd: FfmpegCommand, output: &Path) -> Result<(), TranscodeError> {
    let mut child = cmd.spawn()?;

    let mut error_msg: Option<String> = None;
    let events = child
        .iter()
        .map_err(|e| TranscodeError::Ffmpeg(e.to_string()))?;

    for event in events {
        match event {
            FfmpegEvent::Log(LogLevel::Error, msg) => {
                tracing::debug!(%msg, "ffmpeg error");
                error_msg = Some(msg);
            }
            FfmpegEvent::Log(LogLevel::Fatal, msg) => {
                error_msg = Some(msg);
            }
            FfmpegEvent::Done => break,
            _ => {}
        }
    }

    // Done can arrive before the process exits; reap it either way
    let status = child.wait()?;
    if !status.success() {
        tracing::debug!(%status, "ffmpeg exited unsuccessfully");
    }

    let produced = std::fs::metadata(output).map(|m| m.len() > 0).unwrap_or(false);
    if !produced {
        return Err(TranscodeError::Ffmpeg(
            error_msg.unwrap_or_else(|| "ffmpeg produced no output".to_string()),
        ));
    }

    Ok(())
}

/// Download a GIF and turn it into an MP4 animation.
///
/// Falls back to passing the GIF URL through when download or transcoding fails.
pub async fn animation_from_gif(
    downloader: &SimpleDownloader,
    service: Service,
    gif_url: &str,
    file_name: &str,
    source_url: &str,
    headers: &[(&str, &str)],
) -> Media {
    let mp4_name = match file_name.rsplit_once('.') {
        Some((stem, _)) => format!("{}.mp4", stem),
        None => format!("{}.mp4", file_name),
    };

    let transcoded = match downloader.download(gif_url, headers).await {
        Ok(gif) => gif_to_mp4(gif).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match transcoded {
        Ok(mp4) => Media::new(service, MediaKind::Animation, mp4_name, gif_url, source_url)
            .with_bytes(mp4),
        Err(error) => {
            tracing::warn!(url = gif_url, %error, "GIF transcode failed, passing URL through");
            Media::new(service, MediaKind::Animation, file_name, gif_url, source_url)
        }
    }
}
