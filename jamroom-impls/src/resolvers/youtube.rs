use std::process::Stdio;

use async_trait::async_trait;
use jamroom_core::{MediaResolver, MediaStream, ResolveError, TrackInfo};
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use tokio::process::Command;

use super::open_network_stream;
use crate::util::normalize_url;

const YT_UNAVAILABLE: &str = "Video unavailable. This video is not available";
const YT_NOT_FOUND: &str = "Video unavailable";
const YT_ID_ERROR: &str = "Incomplete YouTube ID";
const YT_PRIVATE: &str = "Private video";

/// Resolves YouTube urls with the `yt-dlp` executable, and streams their audio over http.
pub struct YtDlpResolver {
    binary: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: String,
    format_id: String,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    width: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    id: String,
    title: String,
    channel: Option<String>,
    uploader: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PlayableVideo {
    format_id: String,
    formats: Vec<Format>,
}

impl YtDlpResolver {
    pub fn new() -> Self {
        Self::with_binary("yt-dlp")
    }

    /// Uses the yt-dlp executable at the given path.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            client: Client::new(),
        }
    }

    /// Returns true if the url points at a single YouTube video.
    pub fn test(query: &str) -> bool {
        let Some(url) = normalize_url(query) else {
            return false;
        };

        let host = url.host_str().unwrap_or_default();

        if host.ends_with("youtube.com") {
            // /watch?v=...
            if url.path().starts_with("/watch")
                && url.query_pairs().any(|(k, v)| k == "v" && !v.is_empty())
            {
                return true;
            }

            // /v/... and /shorts/...
            if ["/v/", "/shorts/"]
                .iter()
                .any(|prefix| url.path().len() > prefix.len() && url.path().starts_with(prefix))
            {
                return true;
            }

            return false;
        }

        // youtu.be/...
        host == "youtu.be" && url.path().len() > 1
    }

    /// Runs yt-dlp with the given arguments and returns its standard output.
    async fn run(&self, args: &[&str], url: &str) -> Result<String, ResolveError> {
        let child = Command::new(&self.binary)
            .args(args)
            .args(["--", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ResolveError::Fetch(format!("Could not run {}: {}", self.binary, e)))?;

        // Drains stdout and stderr together
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ResolveError::Fetch(e.to_string()))?;

        if !output.status.success() {
            let error_output = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp failed for {}: {}", url, error_output.trim());
            return Err(classify_failure(&error_output));
        }

        let output = String::from_utf8(output.stdout)
            .map_err(|e| ResolveError::Parse(format!("yt-dlp output is not utf-8: {}", e)))?;

        Ok(output)
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> Result<TrackInfo, ResolveError> {
        if !Self::test(url) {
            return Err(ResolveError::Unsupported(url.to_string()));
        }

        let output = self
            .run(&["--no-playlist", "--skip-download", "-J"], url)
            .await?;

        let video: VideoInfo =
            serde_json::from_str(&output).map_err(|e| ResolveError::Parse(e.to_string()))?;

        let Some(duration) = video.duration else {
            // Live streams have no duration and can't be downloaded
            warn!("Refusing {} without a duration", video.id);
            return Err(ResolveError::Unavailable);
        };

        Ok(TrackInfo {
            title: video.title,
            artist: video
                .channel
                .or(video.uploader)
                .unwrap_or_else(|| "Unknown".to_string()),
            duration_seconds: duration,
            thumbnail_url: determine_thumbnail(video.thumbnails),
            external_id: video.id,
        })
    }

    async fn fetch_stream(&self, url: &str) -> Result<MediaStream, ResolveError> {
        let output = self
            .run(&["--no-playlist", "-f", "bestaudio/best", "-j"], url)
            .await?;

        let video: PlayableVideo =
            serde_json::from_str(&output).map_err(|e| ResolveError::Parse(e.to_string()))?;

        let stream_url = video
            .formats
            .iter()
            .find(|f| f.format_id == video.format_id)
            .map(|f| f.url.as_str())
            .ok_or_else(|| ResolveError::Fetch("No supported format found".to_string()))?;

        open_network_stream(&self.client, stream_url).await
    }
}

fn classify_failure(error_output: &str) -> ResolveError {
    if error_output.contains(YT_UNAVAILABLE) || error_output.contains(YT_PRIVATE) {
        return ResolveError::Unavailable;
    }

    if error_output.contains(YT_NOT_FOUND) || error_output.contains(YT_ID_ERROR) {
        return ResolveError::NotFound;
    }

    ResolveError::Fetch(error_output.trim().to_string())
}

fn determine_thumbnail(mut thumbnails: Vec<Thumbnail>) -> String {
    // Sort to get the largest at end
    thumbnails.sort_by(|a, b| a.width.cmp(&b.width));

    thumbnails
        .pop()
        .map(|t| t.url.replace("hqdefault", "maxresdefault"))
        .unwrap_or_default()
}
