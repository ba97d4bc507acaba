//! Core type definitions for Scrubber
//!
//! Rules are the canonical compiled form of a filter-list line. They are
//! immutable once loaded and shared between the engine and its callers as
//! `Arc<Rule>`. `Request` and `MatchResult` form the request-side contract
//! with the embedding network layer.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::url::{extract_host, extract_path, normalize_host};

// =============================================================================
// Rule Kinds
// =============================================================================

/// What a rule applies to. Only `Network` rules take part in request matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Network,
    /// Element hiding (`##selector`)
    Css,
    /// Scriptlet injection (`##+js(...)`)
    Script,
    Websocket,
    Webrtc,
    Dom,
}

// =============================================================================
// Rule Actions
// =============================================================================

/// Action to take for a matched rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Cancel the request
    Block,
    /// Exception rule (@@...) - always wins over block
    Allow,
    /// Rewrite rather than cancel; never decides a request on its own
    Modify,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Allow => "allow",
            Self::Modify => "modify",
        }
    }
}

// =============================================================================
// Resource Types
// =============================================================================

/// Type of resource a request loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Script,
    Image,
    Stylesheet,
    Font,
    Xhr,
    Fetch,
    Websocket,
    Webrtc,
    Media,
    Document,
    Subdocument,
    Ping,
    Other,
}

impl ResourceType {
    /// Parse from a filter option or browser request type string.
    /// Unknown names map to `Other`.
    pub fn from_name(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::Other)
    }

    /// Strict variant of `from_name`.
    pub fn parse(s: &str) -> Option<Self> {
        let ty = match s {
            "script" => Self::Script,
            "image" | "imageset" => Self::Image,
            "stylesheet" | "css" => Self::Stylesheet,
            "font" => Self::Font,
            "xhr" | "xmlhttprequest" => Self::Xhr,
            "fetch" => Self::Fetch,
            "websocket" => Self::Websocket,
            "webrtc" => Self::Webrtc,
            "media" => Self::Media,
            "document" | "main_frame" | "mainframe" => Self::Document,
            "subdocument" | "sub_frame" | "subframe" => Self::Subdocument,
            "ping" | "beacon" => Self::Ping,
            "other" => Self::Other,
            _ => return None,
        };
        Some(ty)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Image => "image",
            Self::Stylesheet => "stylesheet",
            Self::Font => "font",
            Self::Xhr => "xhr",
            Self::Fetch => "fetch",
            Self::Websocket => "websocket",
            Self::Webrtc => "webrtc",
            Self::Media => "media",
            Self::Document => "document",
            Self::Subdocument => "subdocument",
            Self::Ping => "ping",
            Self::Other => "other",
        }
    }

    /// The single-bit mask for this type.
    pub const fn mask(self) -> ResourceTypes {
        match self {
            Self::Script => ResourceTypes::SCRIPT,
            Self::Image => ResourceTypes::IMAGE,
            Self::Stylesheet => ResourceTypes::STYLESHEET,
            Self::Font => ResourceTypes::FONT,
            Self::Xhr => ResourceTypes::XHR,
            Self::Fetch => ResourceTypes::FETCH,
            Self::Websocket => ResourceTypes::WEBSOCKET,
            Self::Webrtc => ResourceTypes::WEBRTC,
            Self::Media => ResourceTypes::MEDIA,
            Self::Document => ResourceTypes::DOCUMENT,
            Self::Subdocument => ResourceTypes::SUBDOCUMENT,
            Self::Ping => ResourceTypes::PING,
            Self::Other => ResourceTypes::OTHER,
        }
    }
}

bitflags::bitflags! {
    /// Resource type bit mask used by rule criteria.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceTypes: u16 {
        const SCRIPT = 1 << 0;
        const IMAGE = 1 << 1;
        const STYLESHEET = 1 << 2;
        const FONT = 1 << 3;
        const XHR = 1 << 4;
        const FETCH = 1 << 5;
        const WEBSOCKET = 1 << 6;
        const WEBRTC = 1 << 7;
        const MEDIA = 1 << 8;
        const DOCUMENT = 1 << 9;
        const SUBDOCUMENT = 1 << 10;
        const PING = 1 << 11;
        const OTHER = 1 << 12;

        /// All resource types
        const ALL = 0x1FFF;
    }
}

impl ResourceTypes {
    #[inline]
    pub fn accepts(&self, ty: ResourceType) -> bool {
        self.contains(ty.mask())
    }
}

// =============================================================================
// Host Patterns
// =============================================================================

/// A host criterion: either one exact domain, or a domain and all of its
/// subdomains (textual form `*.suffix`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HostPattern {
    Exact(String),
    Wildcard(String),
}

impl HostPattern {
    /// Parse `example.com`, `*.example.com` or `.example.com`.
    ///
    /// The domain is trimmed and lower-cased; returns `None` when nothing
    /// usable remains.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(suffix) = raw.strip_prefix("*.") {
            return normalize_host(suffix).map(Self::Wildcard);
        }
        if let Some(suffix) = raw.strip_prefix('.') {
            return normalize_host(suffix).map(Self::Wildcard);
        }
        normalize_host(raw).map(Self::Exact)
    }

    pub fn exact(domain: &str) -> Option<Self> {
        normalize_host(domain).map(Self::Exact)
    }

    pub fn wildcard(suffix: &str) -> Option<Self> {
        normalize_host(suffix).map(Self::Wildcard)
    }

    /// The domain part, without any `*.` prefix.
    pub fn domain(&self) -> &str {
        match self {
            Self::Exact(d) | Self::Wildcard(d) => d,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard(_))
    }

    /// Number of labels in the domain part.
    pub fn label_count(&self) -> usize {
        self.domain().split('.').count()
    }

    /// Check a lower-case host against this pattern.
    ///
    /// A wildcard on `suffix` matches `suffix` itself and anything ending in
    /// `.suffix`.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(d) => host == d,
            Self::Wildcard(d) => {
                host == d
                    || (host.len() > d.len()
                        && host.ends_with(d.as_str())
                        && host.as_bytes()[host.len() - d.len() - 1] == b'.')
            }
        }
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(d) => f.write_str(d),
            Self::Wildcard(d) => write!(f, "*.{d}"),
        }
    }
}

impl TryFrom<String> for HostPattern {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(Error::InvalidHostPattern(value))
    }
}

impl From<HostPattern> for String {
    fn from(value: HostPattern) -> Self {
        value.to_string()
    }
}

// =============================================================================
// Path Patterns
// =============================================================================

/// Upper bound on compiled regex size, so a hostile list entry cannot blow
/// up memory.
const PATH_REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A compiled path regex.
///
/// The source is always kept. A source that fails to compile produces a
/// pattern that never matches instead of an error.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    compiled: Option<Regex>,
}

impl PathPattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = match RegexBuilder::new(&source)
            .size_limit(PATH_REGEX_SIZE_LIMIT)
            .build()
        {
            Ok(re) => Some(re),
            Err(e) => {
                log::warn!("path regex {:?} does not compile, rule will never match: {}", source, e);
                None
            }
        };
        Self { source, compiled }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_some()
    }

    #[inline]
    pub fn is_match(&self, path: &str) -> bool {
        self.compiled.as_ref().is_some_and(|re| re.is_match(path))
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PathPattern {}

impl Hash for PathPattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Stable rule identifier, unique within one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RuleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Matching criteria of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RuleMatch {
    /// Host patterns; empty means the rule is indexed at the trie root.
    pub hosts: Vec<HostPattern>,
    pub path_regex: Option<PathPattern>,
    /// `None` means every resource type.
    pub resource_types: Option<ResourceTypes>,
    pub first_party_only: Option<bool>,
    pub third_party_only: Option<bool>,
}

impl RuleMatch {
    /// Check everything except the host, which the trie has already matched.
    #[inline]
    pub fn accepts(&self, request: &Request) -> bool {
        if let Some(types) = self.resource_types {
            if !types.accepts(request.resource_type) {
                return false;
            }
        }
        if self.first_party_only == Some(true) && request.is_third_party {
            return false;
        }
        if self.third_party_only == Some(true) && !request.is_third_party {
            return false;
        }
        match &self.path_regex {
            Some(pattern) => pattern.is_match(&request.path),
            None => true,
        }
    }

    /// True if the rule would match every request.
    pub fn is_unconstrained(&self) -> bool {
        self.hosts.is_empty() && self.path_regex.is_none()
    }
}

/// A compiled filter rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub kind: RuleKind,
    pub criteria: RuleMatch,
    pub action: RuleAction,
    /// Lower value wins among rules of the same action.
    pub priority: i32,
    /// Provenance, usually the filter list name.
    pub source: String,
    pub enabled: bool,
    /// Selector or scriptlet text of a cosmetic rule, kept for downstream
    /// consumers. Always `None` for network rules.
    pub payload: Option<String>,
}

impl Rule {
    /// A network rule with empty criteria, priority 0 and source `custom`.
    pub fn new(id: impl Into<RuleId>, action: RuleAction) -> Self {
        Self {
            id: id.into(),
            kind: RuleKind::Network,
            criteria: RuleMatch::default(),
            action,
            priority: 0,
            source: "custom".to_string(),
            enabled: true,
            payload: None,
        }
    }

    pub fn with_kind(mut self, kind: RuleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_host(mut self, pattern: HostPattern) -> Self {
        self.criteria.hosts.push(pattern);
        self
    }

    pub fn with_path_regex(mut self, source: &str) -> Self {
        self.criteria.path_regex = Some(PathPattern::new(source));
        self
    }

    pub fn with_resource_types(mut self, types: ResourceTypes) -> Self {
        self.criteria.resource_types = Some(types);
        self
    }

    pub fn third_party_only(mut self) -> Self {
        self.criteria.third_party_only = Some(true);
        self
    }

    pub fn first_party_only(mut self) -> Self {
        self.criteria.first_party_only = Some(true);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_network(&self) -> bool {
        self.kind == RuleKind::Network
    }
}

// =============================================================================
// Request
// =============================================================================

/// A request as described by the embedding network layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub url: String,
    pub host: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(alias = "resource_type", default = "default_resource_type")]
    pub resource_type: ResourceType,
    #[serde(alias = "is_third_party", default)]
    pub is_third_party: bool,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_resource_type() -> ResourceType {
    ResourceType::Other
}

impl Request {
    /// Build a request from its parts. The host is lower-cased and a trailing
    /// dot dropped; `url` is synthesised as `https://{host}{path}`.
    pub fn new(host: &str, path: &str, resource_type: ResourceType, is_third_party: bool) -> Self {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        let path = if path.is_empty() { "/".to_string() } else { path.to_string() };
        Self {
            url: format!("https://{host}{path}"),
            host,
            path,
            resource_type,
            is_third_party,
        }
    }

    /// Derive a request from its URL and the URL of the document that issued
    /// it. Without an initiator the request counts as first-party.
    pub fn from_url(url: &str, resource_type: ResourceType, initiator: Option<&str>) -> Result<Self, Error> {
        let host = extract_host(url)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
        let host = host.trim_end_matches('.').to_ascii_lowercase();

        let is_third_party = initiator
            .and_then(extract_host)
            .map(|site| crate::site::is_third_party(&site.to_ascii_lowercase(), &host))
            .unwrap_or(false);

        Ok(Self {
            url: url.to_string(),
            path: extract_path(url).to_string(),
            host,
            resource_type,
            is_third_party,
        })
    }
}

// =============================================================================
// Match Result
// =============================================================================

/// Outcome of matching one request.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub matched: bool,
    /// `Some` exactly when `matched` is true.
    pub action: Option<RuleAction>,
    /// The winning rule.
    pub rule: Option<Arc<Rule>>,
}

impl MatchResult {
    /// The unmatched result.
    pub fn none() -> Self {
        Self::default()
    }

    pub(crate) fn from_rule(rule: Arc<Rule>) -> Self {
        Self {
            matched: true,
            action: Some(rule.action),
            rule: Some(rule),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.action == Some(RuleAction::Block)
    }

    pub fn rule_id(&self) -> Option<&RuleId> {
        self.rule.as_ref().map(|r| &r.id)
    }
}
