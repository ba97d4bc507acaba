//! Response Inspector
//!
//! Strips ad-carrying fields out of JSON API payloads (player responses and
//! similar) while leaving every other field, and the order of keys, intact.
//!
//! Only exact key names from the denylist are removed. With
//! `strip_generic_ads` enabled, keys whose camelCase / snake_case words
//! include an ad token as a whole word are removed as well; a token that only
//! occurs inside a longer word (`ad` in `header`, `downloads`) never counts.
//!
//! Malformed bodies are handed back untouched.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Anti-XSSI guard some JSON endpoints prepend to their bodies.
const XSSI_PREFIX: &str = ")]}'";

// =============================================================================
// Configuration
// =============================================================================

/// Inspector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InspectorConfig {
    /// Exact key names that are always removed.
    pub denylist: Vec<String>,
    /// Well-known container keys whose direct children are inspected too.
    pub containers: Vec<String>,
    /// Also remove keys containing an ad token as a whole word.
    pub strip_generic_ads: bool,
    /// Lower-case words that mark a key as ad-related in generic mode.
    pub generic_tokens: Vec<String>,
    /// URL fragments of API endpoints whose responses get inspected.
    /// Empty means every JSON response.
    pub api_url_markers: Vec<String>,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            denylist: [
                "adPlacements",
                "playerAds",
                "adSlots",
                "adSignalsInfo",
                "adBreakHeartbeatParams",
                "adBreakParams",
            ]
            .map(String::from)
            .to_vec(),
            containers: ["playerResponse", "response", "data"].map(String::from).to_vec(),
            strip_generic_ads: false,
            generic_tokens: ["ad", "ads", "advert", "adverts", "advertising", "sponsored"]
                .map(String::from)
                .to_vec(),
            api_url_markers: [
                "/youtubei/v1/player",
                "/youtubei/v1/next",
                "/youtubei/v1/browse",
                "/youtubei/v1/reel",
                "/get_video_info",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl InspectorConfig {
    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }
}

// =============================================================================
// Input / Output
// =============================================================================

/// A response body awaiting inspection.
#[derive(Debug, Clone, Copy)]
pub struct InspectableResponse<'a> {
    pub url: &'a str,
    pub body: &'a str,
    pub content_type: &'a str,
}

/// Result of inspecting one response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionResult {
    pub modified: bool,
    pub body: String,
    /// Dotted paths of removed keys, in removal order.
    pub fields_stripped: Vec<String>,
    /// Compact serialized size of the removed values.
    pub bytes_removed: usize,
}

impl InspectionResult {
    fn unchanged(body: &str) -> Self {
        Self {
            modified: false,
            body: body.to_string(),
            fields_stripped: Vec::new(),
            bytes_removed: 0,
        }
    }
}

// =============================================================================
// Inspector
// =============================================================================

/// Stateless JSON body inspector.
#[derive(Debug, Clone)]
pub struct ResponseInspector {
    denylist: HashSet<String>,
    containers: Vec<String>,
    strip_generic_ads: bool,
    generic_tokens: HashSet<String>,
    api_url_markers: Vec<String>,
}

impl Default for ResponseInspector {
    fn default() -> Self {
        Self::new(InspectorConfig::default())
    }
}

impl ResponseInspector {
    pub fn new(config: InspectorConfig) -> Self {
        Self {
            denylist: config.denylist.into_iter().collect(),
            containers: config.containers,
            strip_generic_ads: config.strip_generic_ads,
            generic_tokens: config
                .generic_tokens
                .into_iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            api_url_markers: config.api_url_markers,
        }
    }

    /// Whether responses from `url` are candidates for inspection.
    pub fn applies_to(&self, url: &str) -> bool {
        self.api_url_markers.is_empty() || self.api_url_markers.iter().any(|m| url.contains(m.as_str()))
    }

    /// Strip ad fields from a JSON response body.
    pub fn inspect_response(&self, response: &InspectableResponse<'_>) -> InspectionResult {
        let (guard, json_text) = split_xssi_guard(response.body);

        if !is_eligible(response.content_type, json_text) {
            return InspectionResult::unchanged(response.body);
        }

        let mut value: Value = match serde_json::from_str(json_text) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("{}: body is not valid JSON, passing through: {}", response.url, e);
                return InspectionResult::unchanged(response.body);
            }
        };

        let mut stripped = Stripped::default();
        match &mut value {
            Value::Object(map) => self.strip_object(map, "", true, &mut stripped),
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    if let Value::Object(map) = item {
                        self.strip_object(map, &format!("[{i}]"), true, &mut stripped);
                    }
                }
            }
            _ => {}
        }

        if stripped.paths.is_empty() {
            return InspectionResult::unchanged(response.body);
        }

        let serialized = match serde_json::to_string(&value) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("{}: failed to re-serialize stripped body: {}", response.url, e);
                return InspectionResult::unchanged(response.body);
            }
        };

        log::debug!(
            "{}: stripped {} field(s), {} bytes",
            response.url,
            stripped.paths.len(),
            stripped.bytes
        );

        InspectionResult {
            modified: true,
            body: format!("{guard}{serialized}"),
            fields_stripped: stripped.paths,
            bytes_removed: stripped.bytes,
        }
    }

    fn strip_object(&self, map: &mut Map<String, Value>, prefix: &str, descend: bool, stripped: &mut Stripped) {
        map.retain(|key, value| {
            if !self.is_ad_key(key) {
                return true;
            }
            stripped.paths.push(join_path(prefix, key));
            stripped.bytes += serde_json::to_vec(value).map_or(0, |v| v.len());
            false
        });

        if !descend {
            return;
        }

        for name in &self.containers {
            if let Some(Value::Object(inner)) = map.get_mut(name.as_str()) {
                self.strip_object(inner, &join_path(prefix, name), false, stripped);
            }
        }
    }

    fn is_ad_key(&self, key: &str) -> bool {
        if self.denylist.contains(key) {
            return true;
        }
        self.strip_generic_ads && key_words(key).any(|w| self.generic_tokens.contains(&w))
    }
}

#[derive(Default)]
struct Stripped {
    paths: Vec<String>,
    bytes: usize,
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Split a leading `)]}'` guard line from the JSON text.
fn split_xssi_guard(body: &str) -> (&str, &str) {
    if body.starts_with(XSSI_PREFIX) {
        let end = body.find('\n').map_or(body.len(), |i| i + 1);
        body.split_at(end)
    } else {
        ("", body)
    }
}

/// JSON content types are always inspected. Any other textual content type
/// (and an untyped body) is inspected when the body looks like a JSON
/// document; binary media types pass through.
fn is_eligible(content_type: &str, body: &str) -> bool {
    let mime = essence(content_type);
    if mime.contains("json") {
        return true;
    }
    may_carry_json(&mime) && matches!(body.trim_start().as_bytes().first(), Some(b'{') | Some(b'['))
}

/// Lower-cased MIME type without parameters.
fn essence(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

fn may_carry_json(mime: &str) -> bool {
    mime.is_empty()
        || mime.starts_with("text/")
        || mime.contains("json")
        || mime.contains("javascript")
        || mime.ends_with("+xml")
        || mime == "application/xml"
        || mime == "application/octet-stream"
}

/// Whether a response with this content type could be a JSON body, judged
/// from the header alone.
pub(crate) fn content_type_may_be_json(content_type: &str) -> bool {
    may_carry_json(&essence(content_type))
}

/// Lower-cased words of a camelCase, PascalCase, snake_case or kebab-case
/// key. `adBreakParams` -> `ad`, `break`, `params`.
fn key_words(key: &str) -> impl Iterator<Item = String> + '_ {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in key.chars() {
        if !ch.is_ascii_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_ascii_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        current.push(ch.to_ascii_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }

    words.into_iter()
}
