//! Scrubber Core Library
//!
//! This crate provides the rule engine and the response transforms of the
//! Scrubber ad and tracker blocker.
//!
//! # Architecture
//!
//! Parsed rules are indexed once into a reversed-label domain trie and
//! never mutated afterwards; a reload builds a new engine and swaps it in
//! atomically. Every request is matched against the current engine. Allowed
//! responses may then pass through the JSON inspector or the streaming
//! manifest rewriter, both pure functions of their input.
//!
//! # Modules
//!
//! - `types`: Rules, requests and match results
//! - `engine`: Rule engine and hot-reloadable shared holder
//! - `interceptor`: Request/response hooks for the embedding network layer
//! - `inspector`: Ad field removal from JSON API payloads
//! - `manifest`: HLS/DASH ad removal
//! - `site`: Registrable-domain and third-party checks
//! - `url`: Fast URL parsing without allocations
//! - `error`: Error type for construction and configuration

pub mod engine;
pub mod error;
pub mod inspector;
pub mod interceptor;
pub mod manifest;
pub mod site;
mod trie;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use engine::{EngineStats, RuleEngine, SharedEngine};
pub use error::Error;
pub use inspector::{InspectableResponse, InspectionResult, InspectorConfig, ResponseInspector};
pub use interceptor::{
    BodyOutcome, BodyTreatment, EventSink, InterceptDecision, InterceptEvent, InterceptorConfig, LogSink,
    NetworkInterceptor, NullSink,
};
pub use manifest::{ManifestConfig, ManifestKind, ManifestRewriteResult, ManifestRewriter};
pub use site::{is_third_party, registrable_domain};
pub use types::{
    HostPattern, MatchResult, PathPattern, Request, ResourceType, ResourceTypes, Rule, RuleAction, RuleId, RuleKind,
    RuleMatch,
};
