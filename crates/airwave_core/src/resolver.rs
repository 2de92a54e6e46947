//! Stream Resolution
//!
//! Turns a station URL into something a media element can play: follows
//! redirects and PLS/M3U playlist chains, and guesses a format hint for the
//! decoder. Resolution never fails outright; when discovery goes wrong the
//! original URL comes back as a [`Resolution::Fallback`].

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use url::Url;

use crate::config::ResolverConfig;
use crate::error::{describe_http_error, StreamError};

/// Playlists larger than this are not playlists
const MAX_PLAYLIST_BYTES: usize = 64 * 1024;

/// Outcome of resolving a URL
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        url: String,
        format: Option<String>,
    },
    /// Discovery failed; play the original URL as given
    Fallback { url: String, reason: StreamError },
}

impl Resolution {
    pub fn url(&self) -> &str {
        match self {
            Resolution::Resolved { url, .. } | Resolution::Fallback { url, .. } => url,
        }
    }

    pub fn format(&self) -> Option<&str> {
        match self {
            Resolution::Resolved { format, .. } => format.as_deref(),
            Resolution::Fallback { .. } => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback { .. })
    }
}

#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Resolution;
}

/// Playlist flavours recognised by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Pls,
    M3u,
    /// HLS; passed through untouched
    Hls,
}

impl PlaylistKind {
    /// Detect from the content type first, then the URL extension
    pub fn detect(url: &str, content_type: Option<&str>) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or(&lower);

        if let Some(ct) = content_type {
            let ct = ct.to_ascii_lowercase();
            if ct.contains("audio/x-scpls") || ct.contains("application/pls+xml") {
                return Some(PlaylistKind::Pls);
            }
            if ct.contains("application/vnd.apple.mpegurl") {
                return Some(PlaylistKind::Hls);
            }
            if ct.contains("audio/x-mpegurl") || ct.contains("audio/mpegurl") {
                return Some(if path.ends_with(".m3u8") {
                    PlaylistKind::Hls
                } else {
                    PlaylistKind::M3u
                });
            }
        }

        if path.ends_with(".pls") {
            Some(PlaylistKind::Pls)
        } else if path.ends_with(".m3u8") {
            Some(PlaylistKind::Hls)
        } else if path.ends_with(".m3u") {
            Some(PlaylistKind::M3u)
        } else {
            None
        }
    }
}

/// First `FileN=` entry of a PLS playlist
pub fn parse_pls(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        (key.trim().to_ascii_lowercase().starts_with("file") && !value.is_empty())
            .then(|| value.to_string())
    })
}

/// First entry of an M3U playlist
pub fn parse_m3u(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

/// Decoder hint from a content type
pub fn format_from_content_type(content_type: &str) -> Option<&'static str> {
    let ct = content_type.to_ascii_lowercase();
    let hint = if ct.contains("audio/mpeg") || ct.contains("audio/mp3") {
        "mp3"
    } else if ct.contains("audio/aac") {
        "aac"
    } else if ct.contains("audio/opus") {
        "opus"
    } else if ct.contains("ogg") {
        "ogg"
    } else if ct.contains("flac") {
        "flac"
    } else if ct.contains("audio/mp4") || ct.contains("m4a") {
        "mp4"
    } else if ct.contains("wav") || ct.contains("wave") {
        "wav"
    } else {
        return None;
    };
    Some(hint)
}

/// Decoder hint from the content type, falling back to the URL extension
pub fn detect_format_hint(url: &str, content_type: Option<&str>) -> Option<String> {
    if let Some(hint) = content_type.and_then(format_from_content_type) {
        return Some(hint.to_string());
    }

    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or(&lower);
    let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
    let hint = match ext {
        "mp3" => "mp3",
        "aac" | "adts" => "aac",
        "ogg" | "oga" => "ogg",
        "opus" => "opus",
        "flac" => "flac",
        "m4a" | "mp4" => "mp4",
        "wav" => "wav",
        _ => return None,
    };
    Some(hint.to_string())
}

/// Resolver that talks to the stream host over HTTP
pub struct HttpResolver {
    client: reqwest::Client,
    config: ResolverConfig,
}

impl HttpResolver {
    pub fn new(config: ResolverConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StreamError::Resolution(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// HEAD the URL; `None` when the host won't say what it serves
    async fn head(&self, url: &Url) -> Option<(Url, String)> {
        let response = match self.client.head(url.as_str()).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("HEAD {} failed: {}", url, describe_http_error(&e));
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("HEAD {} rejected: {}", url, response.status());
            return None;
        }
        let content_type = content_type_of(&response)?;
        Some((response.url().clone(), content_type))
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, StreamError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| StreamError::Resolution(describe_http_error(&e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Resolution(format!("HTTP {status} from {url}")));
        }
        Ok(response)
    }

    async fn resolve_chain(&self, url: &str) -> Result<Resolution, StreamError> {
        let mut current =
            Url::parse(url).map_err(|e| StreamError::Resolution(format!("{url}: {e}")))?;

        for depth in 0..=self.config.max_playlist_depth {
            let (final_url, content_type, response) = match self.head(&current).await {
                Some((final_url, content_type)) => (final_url, Some(content_type), None),
                None => {
                    let response = self.get(&current).await?;
                    let content_type = content_type_of(&response);
                    (response.url().clone(), content_type, Some(response))
                }
            };
            if final_url != current {
                debug!("{} redirected to {}", current, final_url);
            }

            let kind = PlaylistKind::detect(final_url.as_str(), content_type.as_deref());
            let entry = match kind {
                Some(PlaylistKind::Pls) | Some(PlaylistKind::M3u) => {
                    let response = match response {
                        Some(response) => response,
                        None => self.get(&final_url).await?,
                    };
                    let body = read_playlist(response).await?;
                    let entry = match kind {
                        Some(PlaylistKind::Pls) => parse_pls(&body),
                        _ => parse_m3u(&body),
                    };
                    entry.ok_or_else(|| {
                        StreamError::Resolution(format!("Empty playlist at {final_url}"))
                    })?
                }
                Some(PlaylistKind::Hls) | None => {
                    let format = detect_format_hint(final_url.as_str(), content_type.as_deref());
                    return Ok(Resolution::Resolved {
                        url: final_url.to_string(),
                        format,
                    });
                }
            };

            current = final_url
                .join(&entry)
                .map_err(|e| StreamError::Resolution(format!("Bad playlist entry {entry}: {e}")))?;
            debug!("Playlist level {} -> {}", depth + 1, current);
        }

        Err(StreamError::Resolution(format!(
            "Playlist nesting deeper than {} levels",
            self.config.max_playlist_depth
        )))
    }
}

#[async_trait]
impl StreamResolver for HttpResolver {
    async fn resolve(&self, url: &str) -> Resolution {
        match self.resolve_chain(url).await {
            Ok(resolution) => resolution,
            Err(reason) => {
                warn!("Resolution of {} failed, using it as-is: {}", url, reason);
                Resolution::Fallback {
                    url: url.to_string(),
                    reason,
                }
            }
        }
    }
}

fn content_type_of(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn read_playlist(mut response: reqwest::Response) -> Result<String, StreamError> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| StreamError::Resolution(describe_http_error(&e)))?
    {
        body.extend_from_slice(&chunk);
        if body.len() > MAX_PLAYLIST_BYTES {
            return Err(StreamError::Resolution(
                "Playlist body is too large".to_string(),
            ));
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}
