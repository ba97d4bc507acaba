//! Network Interceptor
//!
//! Glue between the embedding network layer and the engine. Three hooks
//! follow the life of a request:
//!
//! 1. `on_before_request` - block or allow, using the current rule set
//! 2. `on_headers_received` - pick a body treatment for an allowed response
//! 3. `on_body_received` - run the inspector or the manifest rewriter
//!
//! Body work never revisits the request decision. Every decision and every
//! modification is reported to an [`EventSink`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::engine::SharedEngine;
use crate::error::Error;
use crate::inspector::{
    content_type_may_be_json, InspectableResponse, InspectionResult, InspectorConfig, ResponseInspector,
};
use crate::manifest::{ManifestConfig, ManifestKind, ManifestRewriteResult, ManifestRewriter};
use crate::types::{Request, RuleId};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterceptorConfig {
    /// Run the JSON inspector on matching API responses.
    pub inspect_responses: bool,
    /// Rewrite HLS/DASH manifests.
    pub rewrite_manifests: bool,
    pub inspector: InspectorConfig,
    pub manifest: ManifestConfig,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            inspect_responses: true,
            rewrite_manifests: true,
            inspector: InspectorConfig::default(),
            manifest: ManifestConfig::default(),
        }
    }
}

impl InterceptorConfig {
    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }
}

// =============================================================================
// Decisions and events
// =============================================================================

/// Request-phase verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum InterceptDecision {
    Deny {
        #[serde(rename = "ruleId")]
        rule_id: RuleId,
    },
    /// `rule_id` is the exception rule that won, if any.
    Allow {
        #[serde(rename = "ruleId")]
        rule_id: Option<RuleId>,
    },
}

impl InterceptDecision {
    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }
}

/// What to do with an allowed response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "treatment", content = "kind", rename_all = "camelCase")]
pub enum BodyTreatment {
    Inspect,
    RewriteManifest(ManifestKind),
    PassThrough,
}

/// Body-phase result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum BodyOutcome {
    PassThrough,
    Inspected(InspectionResult),
    Rewritten(ManifestRewriteResult),
}

impl BodyOutcome {
    pub fn is_modified(&self) -> bool {
        match self {
            Self::PassThrough => false,
            Self::Inspected(r) => r.modified,
            Self::Rewritten(r) => r.modified,
        }
    }

    /// The body to deliver: the rewritten one, or `original` when nothing
    /// changed.
    pub fn body<'a>(&'a self, original: &'a str) -> &'a str {
        match self {
            Self::Inspected(r) if r.modified => &r.body,
            Self::Rewritten(r) if r.modified => &r.body,
            _ => original,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InterceptEvent {
    Blocked {
        request_id: String,
        host: String,
        rule_id: RuleId,
        timestamp_ms: u64,
    },
    Allowed {
        request_id: String,
        host: String,
        rule_id: Option<RuleId>,
        timestamp_ms: u64,
    },
    Modified {
        request_id: String,
        host: String,
        /// Stripped JSON paths; empty for manifests.
        fields_stripped: Vec<String>,
        segments_removed: usize,
        bytes_removed: usize,
        timestamp_ms: u64,
    },
}

/// Receiver of interceptor events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &InterceptEvent);
}

/// Reports events through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &InterceptEvent) {
        match event {
            InterceptEvent::Blocked { request_id, host, rule_id, .. } => {
                log::debug!("[{}] blocked {} by {}", request_id, host, rule_id);
            }
            InterceptEvent::Allowed { request_id, host, rule_id: Some(rule_id), .. } => {
                log::debug!("[{}] allowed {} by {}", request_id, host, rule_id);
            }
            InterceptEvent::Allowed { request_id, host, rule_id: None, .. } => {
                log::trace!("[{}] allowed {}", request_id, host);
            }
            InterceptEvent::Modified {
                request_id,
                host,
                fields_stripped,
                segments_removed,
                bytes_removed,
                ..
            } => {
                log::info!(
                    "[{}] modified response from {}: {} fields, {} segments, {} bytes removed",
                    request_id,
                    host,
                    fields_stripped.len(),
                    segments_removed,
                    bytes_removed
                );
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &InterceptEvent) {}
}

fn system_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Interceptor
// =============================================================================

pub struct NetworkInterceptor {
    engine: Arc<SharedEngine>,
    inspect_responses: bool,
    rewrite_manifests: bool,
    inspector: ResponseInspector,
    rewriter: ManifestRewriter,
    sink: Arc<dyn EventSink>,
    clock: fn() -> u64,
}

impl NetworkInterceptor {
    pub fn new(engine: Arc<SharedEngine>, config: InterceptorConfig) -> Self {
        Self {
            engine,
            inspect_responses: config.inspect_responses,
            rewrite_manifests: config.rewrite_manifests,
            inspector: ResponseInspector::new(config.inspector),
            rewriter: ManifestRewriter::new(config.manifest),
            sink: Arc::new(LogSink),
            clock: system_clock_ms,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the millisecond wall clock used for event timestamps.
    /// Targets without `SystemTime` (wasm32) must supply their own.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine(&self) -> &Arc<SharedEngine> {
        &self.engine
    }

    pub fn inspector(&self) -> &ResponseInspector {
        &self.inspector
    }

    pub fn rewriter(&self) -> &ManifestRewriter {
        &self.rewriter
    }

    pub fn on_before_request(&self, request_id: &str, request: &Request) -> InterceptDecision {
        let result = self.engine.match_request(request);
        let timestamp_ms = (self.clock)();

        match result.rule_id() {
            Some(rule_id) if result.is_blocked() => {
                self.sink.emit(&InterceptEvent::Blocked {
                    request_id: request_id.to_string(),
                    host: request.host.clone(),
                    rule_id: rule_id.clone(),
                    timestamp_ms,
                });
                InterceptDecision::Deny { rule_id: rule_id.clone() }
            }
            rule_id => {
                let rule_id = rule_id.cloned();
                self.sink.emit(&InterceptEvent::Allowed {
                    request_id: request_id.to_string(),
                    host: request.host.clone(),
                    rule_id: rule_id.clone(),
                    timestamp_ms,
                });
                InterceptDecision::Allow { rule_id }
            }
        }
    }

    /// Choose a treatment from the response headers alone.
    pub fn on_headers_received(&self, request: &Request, content_type: &str) -> BodyTreatment {
        self.treatment_for(request, content_type, None)
    }

    /// Apply the body treatment. Bodies that only reveal their kind once read
    /// (a playlist served as `text/plain`) are detected here.
    pub fn on_body_received(
        &self,
        request_id: &str,
        request: &Request,
        content_type: &str,
        body: &str,
    ) -> BodyOutcome {
        let outcome = match self.treatment_for(request, content_type, Some(body)) {
            BodyTreatment::PassThrough => BodyOutcome::PassThrough,
            BodyTreatment::Inspect => BodyOutcome::Inspected(self.inspector.inspect_response(&InspectableResponse {
                url: &request.url,
                body,
                content_type,
            })),
            BodyTreatment::RewriteManifest(kind) => BodyOutcome::Rewritten(self.rewriter.rewrite(kind, body)),
        };

        let event = match &outcome {
            BodyOutcome::Inspected(r) if r.modified => Some(InterceptEvent::Modified {
                request_id: request_id.to_string(),
                host: request.host.clone(),
                fields_stripped: r.fields_stripped.clone(),
                segments_removed: 0,
                bytes_removed: r.bytes_removed,
                timestamp_ms: (self.clock)(),
            }),
            BodyOutcome::Rewritten(r) if r.modified => Some(InterceptEvent::Modified {
                request_id: request_id.to_string(),
                host: request.host.clone(),
                fields_stripped: Vec::new(),
                segments_removed: r.segments_removed,
                bytes_removed: body.len().saturating_sub(r.body.len()),
                timestamp_ms: (self.clock)(),
            }),
            _ => None,
        };
        if let Some(event) = event {
            self.sink.emit(&event);
        }

        outcome
    }

    fn treatment_for(&self, request: &Request, content_type: &str, body: Option<&str>) -> BodyTreatment {
        if self.rewrite_manifests {
            if let Some(kind) = ManifestKind::detect(content_type, &request.url, body) {
                return BodyTreatment::RewriteManifest(kind);
            }
        }
        if self.inspect_responses
            && self.inspector.applies_to(&request.url)
            && content_type_may_be_json(content_type)
        {
            return BodyTreatment::Inspect;
        }
        BodyTreatment::PassThrough
    }
}
