//! Streaming manifest rewriting
//!
//! Pure text-in / text-out transforms that drop inserted ad content from
//! HLS media playlists and DASH MPDs. Neither keeps state between calls.
//!
//! - `hls`: line-oriented cue region / ad-host segment removal
//! - `dash`: removal of ad `Period` elements from the MPD

pub mod dash;
pub mod hls;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::HostPattern;

/// Which parser a manifest needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Hls,
    Dash,
}

impl ManifestKind {
    /// Parse a selector such as `"hls"`, `"m3u8"`, `"dash"` or `"mpd"`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "hls" | "m3u8" | "m3u" => Some(Self::Hls),
            "dash" | "mpd" => Some(Self::Dash),
            _ => None,
        }
    }

    /// Guess the manifest kind from the content type, the URL path and, once
    /// available, the first bytes of the body.
    pub fn detect(content_type: &str, url: &str, body: Option<&str>) -> Option<Self> {
        let mime = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match mime.as_str() {
            "application/vnd.apple.mpegurl" | "application/x-mpegurl" | "audio/mpegurl" | "audio/x-mpegurl" => {
                return Some(Self::Hls)
            }
            "application/dash+xml" => return Some(Self::Dash),
            _ => {}
        }

        let path = crate::url::extract_path(url).to_ascii_lowercase();
        if path.ends_with(".m3u8") {
            return Some(Self::Hls);
        }
        if path.ends_with(".mpd") {
            return Some(Self::Dash);
        }

        let head = body?.trim_start_matches('\u{feff}').trim_start();
        if head.starts_with("#EXTM3U") {
            Some(Self::Hls)
        } else if head.starts_with("<?xml") || head.starts_with("<MPD") {
            head.contains("<MPD").then_some(Self::Dash)
        } else {
            None
        }
    }
}

/// Result of rewriting one manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRewriteResult {
    pub modified: bool,
    pub body: String,
    /// Segments (HLS) or periods (DASH) removed.
    pub segments_removed: usize,
}

impl ManifestRewriteResult {
    pub(crate) fn unchanged(text: &str) -> Self {
        Self {
            modified: false,
            body: text.to_string(),
            segments_removed: 0,
        }
    }
}

/// Rewriter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManifestConfig {
    /// Segment URIs on these hosts are dropped even outside cue regions.
    pub ad_hosts: Vec<HostPattern>,
    /// Case-insensitive substrings of a DASH `Period@id` marking an ad period.
    pub period_id_markers: Vec<String>,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        let ad_hosts = [
            "doubleclick.net",
            "googlesyndication.com",
            "googleadservices.com",
            "imasdk.googleapis.com",
            "moatads.com",
            "innovid.com",
            "springserve.com",
            "serving-sys.com",
            "adsrvr.org",
            "fwmrm.net",
        ]
        .iter()
        .filter_map(|d| HostPattern::wildcard(d))
        .collect();

        Self {
            ad_hosts,
            period_id_markers: ["ad_", "preroll", "midroll", "postroll"].map(String::from).to_vec(),
        }
    }
}

impl ManifestConfig {
    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }
}

/// HLS/DASH ad remover.
#[derive(Debug, Clone)]
pub struct ManifestRewriter {
    config: ManifestConfig,
}

impl Default for ManifestRewriter {
    fn default() -> Self {
        Self::new(ManifestConfig::default())
    }
}

impl ManifestRewriter {
    pub fn new(mut config: ManifestConfig) -> Self {
        for marker in &mut config.period_id_markers {
            marker.make_ascii_lowercase();
        }
        Self { config }
    }

    pub fn config(&self) -> &ManifestConfig {
        &self.config
    }

    /// Remove ad segments from an HLS playlist.
    pub fn rewrite_hls(&self, text: &str) -> ManifestRewriteResult {
        hls::rewrite(text, &self.config)
    }

    /// Remove ad periods from a DASH MPD.
    pub fn rewrite_dash(&self, text: &str) -> ManifestRewriteResult {
        dash::rewrite(text, &self.config)
    }

    pub fn rewrite(&self, kind: ManifestKind, text: &str) -> ManifestRewriteResult {
        match kind {
            ManifestKind::Hls => self.rewrite_hls(text),
            ManifestKind::Dash => self.rewrite_dash(text),
        }
    }
}
