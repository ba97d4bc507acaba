//! WebAssembly bindings for Scrubber
//!
//! Every method takes and returns JSON strings. Failures come back as
//! `{"error": "..."}` instead of exceptions, except in the constructor.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use sc_compiler::{compile_with_builtin, FilterList, BUILTIN_RULES_VERSION};
use sc_core::{
    InspectableResponse, InterceptorConfig, ManifestKind, NetworkInterceptor, Request, ResourceType, Rule,
    RuleAction, RuleEngine, RuleId, SharedEngine,
};

// =============================================================================
// Inputs
// =============================================================================

/// A named filter list. Bare strings in the input array are unnamed lists.
#[derive(Debug, Deserialize)]
struct NamedList {
    source: String,
    text: String,
    #[serde(default)]
    priority: i32,
}

enum ListInput {
    Text(String),
    Named(NamedList),
}

impl ListInput {
    fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        match value {
            serde_json::Value::String(text) => Ok(Self::Text(text)),
            other => serde_json::from_value(other).map(Self::Named),
        }
    }
}

/// A request description from JavaScript. Either `host` (plus optional
/// `path` and `isThirdParty`) or a full `url` with an optional `initiator`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestInput {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, alias = "type", alias = "resource_type")]
    resource_type: Option<String>,
    #[serde(default, alias = "is_third_party")]
    is_third_party: Option<bool>,
    #[serde(default)]
    initiator: Option<String>,
}

impl RequestInput {
    fn into_request(self) -> Result<Request, String> {
        let resource_type = self
            .resource_type
            .as_deref()
            .map(ResourceType::from_name)
            .unwrap_or(ResourceType::Other);

        if let Some(host) = self.host.filter(|h| !h.trim().is_empty()) {
            let mut request = Request::new(
                &host,
                self.path.as_deref().unwrap_or("/"),
                resource_type,
                self.is_third_party.unwrap_or(false),
            );
            if let Some(url) = self.url {
                request.url = url;
            }
            return Ok(request);
        }

        let url = self.url.ok_or("request needs a host or a url")?;
        // A top-level document is its own site.
        let initiator = match resource_type {
            ResourceType::Document => Some(url.as_str()),
            _ => self.initiator.as_deref(),
        };
        let mut request = Request::from_url(&url, resource_type, initiator).map_err(|e| e.to_string())?;
        if let Some(third) = self.is_third_party {
            request.is_third_party = third;
        }
        Ok(request)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchOutput {
    matched: bool,
    action: Option<RuleAction>,
    rule_id: Option<RuleId>,
    source: Option<String>,
}

fn parse_rules(list_texts_json: &str) -> Result<Vec<Rule>, String> {
    let values: Vec<serde_json::Value> = if list_texts_json.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(list_texts_json).map_err(|e| format!("invalid list array: {e}"))?
    };
    let inputs = values
        .into_iter()
        .map(ListInput::from_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid list: {e}"))?;

    let names: Vec<String> = (0..inputs.len()).map(|i| format!("list{i}")).collect();
    let lists: Vec<FilterList<'_>> = inputs
        .iter()
        .zip(&names)
        .map(|(input, default_name)| match input {
            ListInput::Text(text) => FilterList::new(default_name, text),
            ListInput::Named(named) => FilterList {
                source: &named.source,
                text: &named.text,
                priority: named.priority,
            },
        })
        .collect();

    Ok(compile_with_builtin(&lists))
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| error_json(&e.to_string()))
}

fn error_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

// =============================================================================
// Engine
// =============================================================================

#[wasm_bindgen]
pub struct ScrubberEngine {
    engine: Arc<SharedEngine>,
    interceptor: NetworkInterceptor,
}

#[wasm_bindgen]
impl ScrubberEngine {
    /// Build an engine from the built-in rules plus `list_texts_json`, a JSON
    /// array of list texts or `{source, text, priority}` objects.
    #[wasm_bindgen(constructor)]
    pub fn new(list_texts_json: &str) -> Result<ScrubberEngine, JsValue> {
        Self::build(list_texts_json, InterceptorConfig::default()).map_err(|e| JsValue::from_str(&e))
    }

    /// Like the constructor, with an interceptor configuration as JSON.
    #[wasm_bindgen(js_name = withConfig)]
    pub fn with_config(list_texts_json: &str, config_json: &str) -> Result<ScrubberEngine, JsValue> {
        let config = InterceptorConfig::from_json(config_json).map_err(|e| JsValue::from_str(&e.to_string()))?;
        Self::build(list_texts_json, config).map_err(|e| JsValue::from_str(&e))
    }

    /// Replace the rule set; returns the new engine stats.
    pub fn reload(&self, list_texts_json: &str) -> String {
        match parse_rules(list_texts_json) {
            Ok(rules) => to_json(&self.engine.reload(rules)),
            Err(e) => error_json(&e),
        }
    }

    pub fn match_request(&self, request_json: &str) -> String {
        let request = match parse_request(request_json) {
            Ok(request) => request,
            Err(e) => return error_json(&e),
        };

        let result = self.engine.match_request(&request);
        to_json(&MatchOutput {
            matched: result.matched,
            action: result.action,
            rule_id: result.rule_id().cloned(),
            source: result.rule.as_ref().map(|r| r.source.clone()),
        })
    }

    pub fn on_before_request(&self, request_id: &str, request_json: &str) -> String {
        match parse_request(request_json) {
            Ok(request) => to_json(&self.interceptor.on_before_request(request_id, &request)),
            Err(e) => error_json(&e),
        }
    }

    pub fn on_headers_received(&self, request_json: &str, content_type: &str) -> String {
        match parse_request(request_json) {
            Ok(request) => to_json(&self.interceptor.on_headers_received(&request, content_type)),
            Err(e) => error_json(&e),
        }
    }

    pub fn on_body_received(&self, request_id: &str, request_json: &str, content_type: &str, body: &str) -> String {
        match parse_request(request_json) {
            Ok(request) => to_json(
                &self
                    .interceptor
                    .on_body_received(request_id, &request, content_type, body),
            ),
            Err(e) => error_json(&e),
        }
    }

    pub fn inspect_response(&self, url: &str, body: &str, content_type: &str) -> String {
        to_json(&self.interceptor.inspector().inspect_response(&InspectableResponse {
            url,
            body,
            content_type,
        }))
    }

    /// `kind` is `hls`/`m3u8` or `dash`/`mpd`.
    pub fn rewrite_manifest(&self, kind: &str, text: &str) -> String {
        match ManifestKind::from_name(kind) {
            Some(kind) => to_json(&self.interceptor.rewriter().rewrite(kind, text)),
            None => error_json(&format!("unknown manifest kind: {kind}")),
        }
    }

    pub fn stats(&self) -> String {
        to_json(&self.engine.get().stats())
    }
}

impl ScrubberEngine {
    fn build(list_texts_json: &str, config: InterceptorConfig) -> Result<Self, String> {
        let rules = parse_rules(list_texts_json)?;
        let engine = Arc::new(SharedEngine::new(RuleEngine::from_rules(rules)));
        let interceptor = NetworkInterceptor::new(Arc::clone(&engine), config);
        #[cfg(target_arch = "wasm32")]
        let interceptor = interceptor.with_clock(now_ms);

        Ok(Self { engine, interceptor })
    }
}

fn parse_request(request_json: &str) -> Result<Request, String> {
    let input: RequestInput = serde_json::from_str(request_json).map_err(|e| format!("invalid request: {e}"))?;
    input.into_request()
}

#[cfg(target_arch = "wasm32")]
fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

#[wasm_bindgen]
pub fn builtin_rules_version() -> String {
    BUILTIN_RULES_VERSION.to_string()
}

// =============================================================================
// Logging
// =============================================================================

struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{}] {}: {}", record.level(), record.target(), record.args()));
        match record.level() {
            log::Level::Error => web_sys::console::error_1(&line),
            log::Level::Warn => web_sys::console::warn_1(&line),
            log::Level::Info => web_sys::console::info_1(&line),
            log::Level::Debug => web_sys::console::debug_1(&line),
            log::Level::Trace => web_sys::console::log_1(&line),
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Route `log` output to the browser console. `level` is a `log` level name
/// (`error` .. `trace`); unknown names fall back to `info`.
#[wasm_bindgen]
pub fn init_logging(level: &str) {
    let filter = level.parse::<log::LevelFilter>().unwrap_or(log::LevelFilter::Info);
    // A second call only changes the level
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(filter);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(lists: &str) -> ScrubberEngine {
        ScrubberEngine::build(lists, InterceptorConfig::default()).unwrap()
    }

    fn json(text: &str) -> serde_json::Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_builtin_engine_blocks_doubleclick() {
        let engine = engine("[]");
        let out = json(&engine.match_request(
            r#"{"host": "doubleclick.net", "path": "/test", "resourceType": "script", "isThirdParty": true}"#,
        ));
        assert_eq!(out["matched"], true);
        assert_eq!(out["action"], "block");
        assert_eq!(out["source"], "builtin");

        let out = json(&engine.match_request(r#"{"host": "www.youtube.com", "path": "/"}"#));
        assert_eq!(out["matched"], false);
        assert!(out["ruleId"].is_null());
    }

    #[test]
    fn test_url_requests_and_named_lists() {
        let engine = engine(r#"[{"source": "user", "text": "||cdn.example^$third-party"}, "||other.example^"]"#);

        let third = json(&engine.match_request(
            r#"{"url": "https://img.cdn.example/a.png", "type": "image", "initiator": "https://news.example/"}"#,
        ));
        assert_eq!(third["ruleId"], "user:1");

        let first = json(&engine.match_request(
            r#"{"url": "https://img.cdn.example/a.png", "type": "image", "initiator": "https://cdn.example/"}"#,
        ));
        assert_eq!(first["matched"], false);

        let unnamed = json(&engine.match_request(r#"{"host": "other.example"}"#));
        assert_eq!(unnamed["ruleId"], "list1:1");
    }

    #[test]
    fn test_on_before_request_and_reload() {
        let engine = engine("[]");
        let req = r#"{"host": "late.example", "path": "/x.js", "resourceType": "script"}"#;
        assert_eq!(json(&engine.on_before_request("1", req))["decision"], "allow");

        let stats = json(&engine.reload(r#"["||late.example^"]"#));
        assert!(stats["totalRules"].as_u64().unwrap() > 1);

        let out = json(&engine.on_before_request("2", req));
        assert_eq!(out["decision"], "deny");
        assert_eq!(out["ruleId"], "list0:1");
    }

    #[test]
    fn test_inspect_and_rewrite() {
        let engine = engine("[]");
        let out = json(&engine.inspect_response(
            "https://www.youtube.com/youtubei/v1/player",
            r#"{"adPlacements": [], "videoDetails": {"videoId": "v"}}"#,
            "application/json",
        ));
        assert_eq!(out["modified"], true);
        assert_eq!(out["fieldsStripped"], serde_json::json!(["adPlacements"]));

        let m3u8 = "#EXTM3U\n#EXT-X-CUE-OUT:4\n#EXTINF:4,\nad.ts\n#EXT-X-CUE-IN\n#EXTINF:4,\nmain.ts\n";
        let out = json(&engine.rewrite_manifest("m3u8", m3u8));
        assert_eq!(out["segmentsRemoved"], 1);

        let out = json(&engine.rewrite_manifest("smooth", m3u8));
        assert!(out["error"].is_string());
    }

    #[test]
    fn test_list_priority_is_honoured() {
        let engine = engine(
            r#"[
                {"source": "fallback", "text": "||media.example^", "priority": 5},
                {"source": "main", "text": "||media.example^$image"}
            ]"#,
        );
        let out = json(&engine.match_request(r#"{"host": "media.example", "resourceType": "image"}"#));
        assert_eq!(out["ruleId"], "main:1");
        assert_eq!(out["source"], "main");
    }

    #[test]
    fn test_config_reaches_direct_inspection() {
        let config = r#"{"inspector": {"denylist": ["sponsor"]}}"#;
        let engine = ScrubberEngine::with_config("[]", config).unwrap();
        let out = json(&engine.inspect_response(
            "https://www.youtube.com/youtubei/v1/next",
            r#"{"sponsor": {}, "adPlacements": []}"#,
            "application/json",
        ));
        assert_eq!(out["fieldsStripped"], serde_json::json!(["sponsor"]));
    }

    #[test]
    fn test_bad_input_reports_error() {
        let engine = engine("[]");
        assert!(json(&engine.match_request("not json"))["error"].is_string());
        assert!(json(&engine.match_request(r#"{"path": "/"}"#))["error"].is_string());
        assert!(json(&engine.reload("{"))["error"].is_string());
        assert!(ScrubberEngine::build("[1, 2]", InterceptorConfig::default()).is_err());
    }

    #[test]
    fn test_stats() {
        let engine = engine("");
        let stats = json(&engine.stats());
        assert_eq!(stats["otherRules"], 0);
        assert!(stats["networkRules"].as_u64().unwrap() > 0);
    }
}
