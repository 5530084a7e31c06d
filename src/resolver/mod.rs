use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use ureq::Agent;

/// api-v2 resolve endpoint: permalink in, full resource JSON out.
const API_RESOLVE: &str = "https://api-v2.soundcloud.com/resolve";

/// Public web app, scraped for a usable client_id when none is configured.
const WEB_APP_URL: &str = "https://soundcloud.com/";

/// Refuse stream bodies past this size to bound memory.
const MAX_STREAM_BYTES: u64 = 256 * 1024 * 1024;

/// Asset script size cap for client_id scraping.
const MAX_SCRIPT_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),
    #[error("API returned status {status} for {url}")]
    ApiStatus { status: u16, url: String },
    #[error("no client_id could be discovered from the web app scripts")]
    NoClientId,
    #[error("{url} did not resolve to a track")]
    NotATrack { url: String },
    #[error("{url} did not resolve to a playlist")]
    NotAPlaylist { url: String },
    #[error("no progressive stream transcoding for {url}")]
    NoProgressiveStream { url: String },
    #[error("stream fetch returned status {status}")]
    StreamStatus { status: u16 },
}

pub type Result<T> = std::result::Result<T, ResolveError>;

/// A resolved api-v2 resource, dispatched on the `kind` discriminator.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Resource {
    Track(TrackInfo),
    Playlist(PlaylistInfo),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub permalink_url: String,
    /// Milliseconds.
    pub duration: u64,
    #[serde(default)]
    pub genre: Option<String>,
    pub user: UserInfo,
    #[serde(default)]
    pub playback_count: Option<u64>,
    #[serde(default)]
    pub media: Media,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub username: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub transcodings: Vec<Transcoding>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcoding {
    pub url: String,
    pub format: TranscodingFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodingFormat {
    pub protocol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistInfo {
    pub title: String,
    pub user: UserInfo,
    #[serde(default)]
    pub tracks: Vec<PlaylistEntry>,
}

/// Playlist entries past the first page come back as id-only stubs with no
/// permalink; those are skipped rather than paged in.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistEntry {
    #[serde(default)]
    pub permalink_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Signed stream location returned when a transcoding URL is exchanged.
#[derive(Debug, Deserialize)]
struct StreamLocation {
    url: String,
}

/// A track flattened to what the pipeline needs: current metadata plus a
/// fresh time-limited stream URL.
#[derive(Debug, Clone)]
pub struct ResolvedTrack {
    pub title: String,
    pub artist: String,
    pub track_url: String,
    pub duration_ms: u64,
    pub genre: String,
    pub playback_count: Option<u64>,
    pub stream_url: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedPlaylist {
    pub title: String,
    pub curator: String,
    pub track_urls: Vec<String>,
}

/// The capability the pipeline drivers consume. `Resolver` is the real
/// implementation; tests substitute a fixed-buffer fake.
pub trait TrackSource {
    fn resolve_playlist(&self, url: &str) -> anyhow::Result<ResolvedPlaylist>;

    /// Re-resolve a permalink into current metadata and a fresh stream URL.
    fn resolve_track(&self, url: &str) -> anyhow::Result<ResolvedTrack>;

    /// Download the raw encoded audio for a previously resolved track.
    fn fetch_audio(&self, track: &ResolvedTrack) -> anyhow::Result<Vec<u8>>;
}

/// Explicitly passed API client: an HTTP agent plus the credentials every
/// call needs. Statuses are checked at each call site, never raised by the
/// agent itself.
pub struct Resolver {
    agent: Agent,
    client_id: String,
    user_agent: String,
}

impl Resolver {
    /// Build a client, scraping a `client_id` from the web app when the
    /// config does not provide one.
    pub fn new(client_id: Option<String>, user_agent: &str) -> Result<Self> {
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(60)))
            .build()
            .into();

        let client_id = match client_id {
            Some(id) => id,
            None => {
                log::info!("No client_id configured, scraping the web app");
                scrape_client_id(&agent, user_agent)?
            }
        };

        Ok(Self {
            agent,
            client_id,
            user_agent: user_agent.to_string(),
        })
    }

    /// Resolve a permalink or playlist URL into its api-v2 resource.
    pub fn resolve(&self, url: &str) -> Result<Resource> {
        let mut response = self
            .agent
            .get(API_RESOLVE)
            .header("User-Agent", &self.user_agent)
            .query("url", url)
            .query("client_id", &self.client_id)
            .call()?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(ResolveError::ApiStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(response.body_mut().read_json()?)
    }

    /// Exchange a track's progressive transcoding for a signed stream URL.
    pub fn stream_url(&self, track: &TrackInfo) -> Result<String> {
        let transcoding = pick_progressive(&track.media.transcodings).ok_or_else(|| {
            ResolveError::NoProgressiveStream {
                url: track.permalink_url.clone(),
            }
        })?;

        let mut response = self
            .agent
            .get(&transcoding.url)
            .header("User-Agent", &self.user_agent)
            .query("client_id", &self.client_id)
            .call()?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(ResolveError::ApiStatus {
                status,
                url: transcoding.url.clone(),
            });
        }
        let location: StreamLocation = response.body_mut().read_json()?;
        Ok(location.url)
    }
}

impl TrackSource for Resolver {
    fn resolve_playlist(&self, url: &str) -> anyhow::Result<ResolvedPlaylist> {
        let playlist = match self.resolve(url)? {
            Resource::Playlist(p) => p,
            Resource::Track(_) => {
                return Err(ResolveError::NotAPlaylist {
                    url: url.to_string(),
                }
                .into());
            }
        };

        let mut track_urls = Vec::with_capacity(playlist.tracks.len());
        for entry in &playlist.tracks {
            match &entry.permalink_url {
                Some(permalink) => track_urls.push(permalink.clone()),
                None => log::warn!(
                    "Skipping stub entry {:?} in playlist {}",
                    entry.title.as_deref().unwrap_or("?"),
                    playlist.title
                ),
            }
        }

        Ok(ResolvedPlaylist {
            title: playlist.title,
            curator: playlist.user.username,
            track_urls,
        })
    }

    fn resolve_track(&self, url: &str) -> anyhow::Result<ResolvedTrack> {
        let track = match self.resolve(url)? {
            Resource::Track(t) => t,
            Resource::Playlist(_) => {
                return Err(ResolveError::NotATrack {
                    url: url.to_string(),
                }
                .into());
            }
        };
        let stream_url = self.stream_url(&track)?;

        Ok(ResolvedTrack {
            title: track.title,
            artist: track.user.username,
            track_url: track.permalink_url,
            duration_ms: track.duration,
            genre: track.genre.unwrap_or_default(),
            playback_count: track.playback_count,
            stream_url,
        })
    }

    fn fetch_audio(&self, track: &ResolvedTrack) -> anyhow::Result<Vec<u8>> {
        let mut response = self
            .agent
            .get(&track.stream_url)
            .header("User-Agent", &self.user_agent)
            .call()
            .map_err(ResolveError::from)?;

        // The CDN signals expired or rejected URLs with a status, not an
        // error body; only a 200 counts as audio.
        let status = response.status().as_u16();
        if status != 200 {
            return Err(ResolveError::StreamStatus { status }.into());
        }

        let bytes = response
            .body_mut()
            .with_config()
            .limit(MAX_STREAM_BYTES)
            .read_to_vec()
            .map_err(ResolveError::from)?;
        Ok(bytes)
    }
}

/// Pick the progressive (single-file HTTP) transcoding; HLS variants need a
/// segment fetcher this pipeline does not carry.
fn pick_progressive(transcodings: &[Transcoding]) -> Option<&Transcoding> {
    transcodings.iter().find(|t| t.format.protocol == "progressive")
}

/// Scrape a client_id out of the web app's script assets: fetch the landing
/// page, collect the asset script URLs, and search each script body.
fn scrape_client_id(agent: &Agent, user_agent: &str) -> Result<String> {
    let mut response = agent
        .get(WEB_APP_URL)
        .header("User-Agent", user_agent)
        .call()?;
    let status = response.status().as_u16();
    if status != 200 {
        return Err(ResolveError::ApiStatus {
            status,
            url: WEB_APP_URL.to_string(),
        });
    }
    let page = response.body_mut().read_to_string()?;

    for script_url in extract_script_urls(&page) {
        let mut script_response = agent
            .get(&script_url)
            .header("User-Agent", user_agent)
            .call()?;
        if script_response.status().as_u16() != 200 {
            continue;
        }
        let body = script_response
            .body_mut()
            .with_config()
            .limit(MAX_SCRIPT_BYTES)
            .read_to_string()?;
        if let Some(id) = extract_client_id(&body) {
            log::debug!("Found client_id in {script_url}");
            return Ok(id);
        }
    }

    Err(ResolveError::NoClientId)
}

fn extract_script_urls(page: &str) -> Vec<String> {
    let re = Regex::new(r#"src="(https://a-v2\.sndcdn\.com/assets/[^"]+\.js)""#).unwrap();
    re.captures_iter(page).map(|c| c[1].to_string()).collect()
}

fn extract_client_id(script: &str) -> Option<String> {
    let re = Regex::new(r#"client_id\s*[:=]\s*"([0-9A-Za-z]{32})""#).unwrap();
    re.captures(script).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_resource_deserialize() {
        let json = r#"{
            "kind": "track",
            "title": "Lost Forever",
            "permalink_url": "https://soundcloud.com/meme_suprememe/lost-forever",
            "duration": 183000,
            "genre": "Electronic",
            "playback_count": 1042,
            "user": {"username": "meme_suprememe"},
            "media": {"transcodings": [
                {"url": "https://api-v2.soundcloud.com/media/1/stream/hls",
                 "format": {"protocol": "hls"}},
                {"url": "https://api-v2.soundcloud.com/media/1/stream/progressive",
                 "format": {"protocol": "progressive"}}
            ]}
        }"#;
        let resource: Resource = serde_json::from_str(json).unwrap();
        let track = match resource {
            Resource::Track(t) => t,
            Resource::Playlist(_) => panic!("expected a track"),
        };
        assert_eq!(track.title, "Lost Forever");
        assert_eq!(track.duration, 183000);
        assert_eq!(track.user.username, "meme_suprememe");
        assert_eq!(track.media.transcodings.len(), 2);
    }

    #[test]
    fn test_playlist_resource_deserialize_with_stubs() {
        let json = r#"{
            "kind": "playlist",
            "title": "Best Vocal Trance Songs",
            "user": {"username": "vocaltrance4ever"},
            "tracks": [
                {"permalink_url": "https://soundcloud.com/a/one", "title": "One"},
                {"title": "stub past page one"}
            ]
        }"#;
        let resource: Resource = serde_json::from_str(json).unwrap();
        let playlist = match resource {
            Resource::Playlist(p) => p,
            Resource::Track(_) => panic!("expected a playlist"),
        };
        assert_eq!(playlist.tracks.len(), 2);
        assert!(playlist.tracks[1].permalink_url.is_none());
    }

    #[test]
    fn test_track_without_media_or_genre() {
        let json = r#"{
            "kind": "track",
            "title": "Untitled",
            "permalink_url": "https://soundcloud.com/a/untitled",
            "duration": 1000,
            "user": {"username": "a"}
        }"#;
        let resource: Resource = serde_json::from_str(json).unwrap();
        let track = match resource {
            Resource::Track(t) => t,
            Resource::Playlist(_) => panic!("expected a track"),
        };
        assert!(track.genre.is_none());
        assert!(track.media.transcodings.is_empty());
        assert!(pick_progressive(&track.media.transcodings).is_none());
    }

    #[test]
    fn test_pick_progressive_prefers_protocol_match() {
        let transcodings = vec![
            Transcoding {
                url: "https://x/hls".to_string(),
                format: TranscodingFormat {
                    protocol: "hls".to_string(),
                },
            },
            Transcoding {
                url: "https://x/progressive".to_string(),
                format: TranscodingFormat {
                    protocol: "progressive".to_string(),
                },
            },
        ];
        let picked = pick_progressive(&transcodings).unwrap();
        assert_eq!(picked.url, "https://x/progressive");
    }

    #[test]
    fn test_extract_script_urls() {
        let page = r#"<script crossorigin src="https://a-v2.sndcdn.com/assets/0-abc123.js"></script>
                      <script crossorigin src="https://a-v2.sndcdn.com/assets/49-def456.js"></script>"#;
        let urls = extract_script_urls(page);
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("0-abc123.js"));
    }

    #[test]
    fn test_extract_client_id() {
        let script = r#"var e={},t=e.client_id:"aB3dE5fG7hI9jK1lM3nO5pQ7rS9tU1vW";"#;
        // the regex accepts both `:` and `=` delimiters
        assert_eq!(
            extract_client_id(script).as_deref(),
            Some("aB3dE5fG7hI9jK1lM3nO5pQ7rS9tU1vW")
        );
        assert!(extract_client_id("no ids here").is_none());
    }
}
