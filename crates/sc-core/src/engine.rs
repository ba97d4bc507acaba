//! Rule Engine
//!
//! This is the hot path - every request goes through `match_request`.
//! The engine is built once per rule set and is read-only afterwards, so it
//! can be shared across threads without locking. Reloads go through
//! [`SharedEngine`], which swaps in a fully built replacement.

use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use serde::Serialize;

use crate::error::Error;
use crate::trie::{DomainTrie, RuleSlot, TrieHit};
use crate::types::{MatchResult, Request, Rule, RuleAction, RuleId, RuleKind};

// =============================================================================
// Rule Engine
// =============================================================================

/// Domain-indexed rule set.
#[derive(Debug)]
pub struct RuleEngine {
    rules: Vec<Arc<Rule>>,
    by_id: HashMap<RuleId, RuleSlot>,
    trie: DomainTrie,
}

/// Introspection counters, see [`RuleEngine::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub total_rules: usize,
    pub network_rules: usize,
    /// Rules of every other kind, stored for downstream consumers.
    pub other_rules: usize,
    pub disabled_rules: usize,
    /// Network rules whose path regex failed to compile.
    pub invalid_path_rules: usize,
    pub trie_nodes: usize,
    pub exact_entries: usize,
    pub wildcard_entries: usize,
    pub root_entries: usize,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            by_id: HashMap::new(),
            trie: DomainTrie::new(),
        }
    }

    /// Build an engine from a rule set.
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut engine = Self::new();
        engine.load_rules(rules);
        engine
    }

    /// Add one rule.
    ///
    /// Network rules are indexed once per host pattern, or at the root when
    /// they have none. Rules of other kinds are stored but never indexed.
    pub fn add_rule(&mut self, rule: Rule) -> Result<(), Error> {
        if self.by_id.contains_key(&rule.id) {
            return Err(Error::DuplicateRuleId(rule.id));
        }

        let slot = self.rules.len() as RuleSlot;

        if rule.kind == RuleKind::Network {
            if rule.criteria.hosts.is_empty() {
                self.trie.insert_root(slot);
            } else {
                for pattern in &rule.criteria.hosts {
                    self.trie.insert(pattern, slot);
                }
            }
        }

        self.by_id.insert(rule.id.clone(), slot);
        self.rules.push(Arc::new(rule));
        Ok(())
    }

    /// Bulk variant of [`add_rule`](Self::add_rule). Rejected rules are logged
    /// and skipped; returns the number of rules added.
    pub fn load_rules(&mut self, rules: impl IntoIterator<Item = Rule>) -> usize {
        let mut added = 0usize;
        for rule in rules {
            match self.add_rule(rule) {
                Ok(()) => added += 1,
                Err(e) => log::warn!("skipping rule: {}", e),
            }
        }
        if self.rules.is_empty() {
            log::warn!("rule engine loaded with zero rules, nothing will be blocked");
        }
        added
    }

    /// Match a request against the loaded network rules.
    ///
    /// Any matching allow rule wins over every block rule. Within one action
    /// the winner has the lowest priority number, then the most specific host
    /// pattern (exact over wildcard, more labels over fewer), then the
    /// earliest insertion.
    pub fn match_request(&self, request: &Request) -> MatchResult {
        let host = normalized_host(&request.host);

        let mut hits: Vec<TrieHit> = Vec::with_capacity(8);
        self.trie.collect(&host, &mut hits);
        if hits.is_empty() {
            return MatchResult::none();
        }

        // One logical rule may be reached through several patterns; keep its
        // most specific hit.
        hits.sort_unstable_by_key(|h| (h.slot, Reverse(h.exact), Reverse(h.depth)));
        hits.dedup_by_key(|h| h.slot);

        let mut best_allow: Option<(&Arc<Rule>, &TrieHit)> = None;
        let mut best_block: Option<(&Arc<Rule>, &TrieHit)> = None;

        for hit in &hits {
            let rule = &self.rules[hit.slot as usize];
            if !rule.enabled || !rule.criteria.accepts(request) {
                continue;
            }

            let best = match rule.action {
                RuleAction::Allow => &mut best_allow,
                RuleAction::Block => &mut best_block,
                RuleAction::Modify => continue,
            };
            if (*best).map_or(true, |(b, bh)| precedence(rule, hit) < precedence(b, bh)) {
                *best = Some((rule, hit));
            }
        }

        let result = match best_allow.or(best_block) {
            Some((rule, _)) => MatchResult::from_rule(Arc::clone(rule)),
            None => MatchResult::none(),
        };

        log::trace!(
            "match {}{} -> {:?} ({:?})",
            host,
            request.path,
            result.action,
            result.rule_id()
        );
        result
    }

    /// Look up a rule by id.
    pub fn rule(&self, id: &str) -> Option<&Arc<Rule>> {
        self.by_id.get(id).map(|&slot| &self.rules[slot as usize])
    }

    /// All stored rules in insertion order.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Counters describing the loaded rules and the trie shape.
    pub fn stats(&self) -> EngineStats {
        let network_rules = self.rules.iter().filter(|r| r.is_network()).count();
        EngineStats {
            total_rules: self.rules.len(),
            network_rules,
            other_rules: self.rules.len() - network_rules,
            disabled_rules: self.rules.iter().filter(|r| !r.enabled).count(),
            invalid_path_rules: self
                .rules
                .iter()
                .filter(|r| r.is_network())
                .filter(|r| r.criteria.path_regex.as_ref().is_some_and(|p| !p.is_valid()))
                .count(),
            trie_nodes: self.trie.node_count(),
            exact_entries: self.trie.exact_entries(),
            wildcard_entries: self.trie.wildcard_entries(),
            root_entries: self.trie.root_entries(),
        }
    }
}

/// Sort key: smaller wins.
#[inline]
fn precedence(rule: &Rule, hit: &TrieHit) -> (i32, Reverse<bool>, Reverse<u16>, RuleSlot) {
    (rule.priority, Reverse(hit.exact), Reverse(hit.depth), hit.slot)
}

/// Hosts from the embedder are usually already lower-case; only allocate when
/// they are not.
#[inline]
fn normalized_host(host: &str) -> Cow<'_, str> {
    let host = host.trim_end_matches('.');
    if host.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(host.to_ascii_lowercase())
    } else {
        Cow::Borrowed(host)
    }
}

// =============================================================================
// Shared Engine
// =============================================================================

/// Thread-safe engine holder with hot-reload support.
///
/// Readers load the current engine without locking; a reload builds a new
/// engine and publishes it with a single atomic store, so every match sees
/// either the old rule set or the new one in full.
pub struct SharedEngine {
    current: ArcSwap<RuleEngine>,
}

impl SharedEngine {
    pub fn new(engine: RuleEngine) -> Self {
        Self {
            current: ArcSwap::from_pointee(engine),
        }
    }

    /// Returns the current engine.
    pub fn load(&self) -> Guard<Arc<RuleEngine>> {
        self.current.load()
    }

    /// Returns an owned handle to the current engine.
    pub fn get(&self) -> Arc<RuleEngine> {
        self.current.load_full()
    }

    /// Publish `engine`, returning the one it replaced.
    pub fn replace(&self, engine: RuleEngine) -> Arc<RuleEngine> {
        self.current.swap(Arc::new(engine))
    }

    /// Build a new engine from `rules` and publish it.
    pub fn reload(&self, rules: impl IntoIterator<Item = Rule>) -> EngineStats {
        let engine = RuleEngine::from_rules(rules);
        let stats = engine.stats();
        self.replace(engine);
        log::info!(
            "rule engine reloaded: {} rules ({} network), {} trie nodes",
            stats.total_rules,
            stats.network_rules,
            stats.trie_nodes
        );
        stats
    }

    pub fn match_request(&self, request: &Request) -> MatchResult {
        self.current.load().match_request(request)
    }
}

impl Default for SharedEngine {
    fn default() -> Self {
        Self::new(RuleEngine::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HostPattern, ResourceType, ResourceTypes};

    fn wildcard(d: &str) -> HostPattern {
        HostPattern::wildcard(d).unwrap()
    }

    fn exact(d: &str) -> HostPattern {
        HostPattern::exact(d).unwrap()
    }

    fn req(host: &str, path: &str) -> Request {
        Request::new(host, path, ResourceType::Script, true)
    }

    fn winner(engine: &RuleEngine, request: &Request) -> Option<String> {
        engine.match_request(request).rule_id().map(|id| id.to_string())
    }

    #[test]
    fn test_wildcard_block_matches_subdomains() {
        let engine = RuleEngine::from_rules([Rule::new("dc", RuleAction::Block).with_host(wildcard("doubleclick.net"))]);

        for host in ["doubleclick.net", "ad.doubleclick.net", "googleads.g.doubleclick.net"] {
            let result = engine.match_request(&req(host, "/"));
            assert!(result.matched, "{host}");
            assert_eq!(result.action, Some(RuleAction::Block));
        }
        assert!(!engine.match_request(&req("mydoubleclick.net", "/")).matched);
    }

    #[test]
    fn test_exact_rule_does_not_cover_subdomains() {
        let engine = RuleEngine::from_rules([Rule::new("x", RuleAction::Block).with_host(exact("ads.example.com"))]);
        assert!(engine.match_request(&req("ads.example.com", "/")).matched);
        assert!(!engine.match_request(&req("cdn.ads.example.com", "/")).matched);
    }

    #[test]
    fn test_allow_beats_block_regardless_of_order_and_priority() {
        let block = Rule::new("block", RuleAction::Block)
            .with_host(exact("ads.example.com"))
            .with_priority(-100);
        let allow = Rule::new("allow", RuleAction::Allow)
            .with_host(wildcard("example.com"))
            .with_priority(100);

        for rules in [vec![block.clone(), allow.clone()], vec![allow, block]] {
            let engine = RuleEngine::from_rules(rules);
            let result = engine.match_request(&req("ads.example.com", "/"));
            assert!(result.matched);
            assert_eq!(result.action, Some(RuleAction::Allow));
            assert_eq!(result.rule_id().unwrap().as_str(), "allow");
        }
    }

    #[test]
    fn test_lower_priority_number_wins() {
        let engine = RuleEngine::from_rules([
            Rule::new("p5", RuleAction::Block).with_host(exact("ads.example.com")).with_priority(5),
            Rule::new("p1", RuleAction::Block).with_host(wildcard("example.com")).with_priority(1),
        ]);
        assert_eq!(winner(&engine, &req("ads.example.com", "/")).as_deref(), Some("p1"));
    }

    #[test]
    fn test_specificity_breaks_priority_ties() {
        let engine = RuleEngine::from_rules([
            Rule::new("short", RuleAction::Block).with_host(wildcard("example.com")),
            Rule::new("long", RuleAction::Block).with_host(wildcard("ads.example.com")),
            Rule::new("root", RuleAction::Block).with_path_regex("^/ads/"),
        ]);
        assert_eq!(winner(&engine, &req("x.ads.example.com", "/ads/1")).as_deref(), Some("long"));

        let engine = RuleEngine::from_rules([
            Rule::new("wild", RuleAction::Block).with_host(wildcard("ads.example.com")),
            Rule::new("exact", RuleAction::Block).with_host(exact("ads.example.com")),
        ]);
        assert_eq!(winner(&engine, &req("ads.example.com", "/")).as_deref(), Some("exact"));
    }

    #[test]
    fn test_first_inserted_wins_full_tie() {
        let engine = RuleEngine::from_rules([
            Rule::new("first", RuleAction::Block).with_host(wildcard("example.com")),
            Rule::new("second", RuleAction::Block).with_host(wildcard("example.com")),
        ]);
        assert_eq!(winner(&engine, &req("example.com", "/")).as_deref(), Some("first"));

        let engine = RuleEngine::from_rules([
            Rule::new("second", RuleAction::Block).with_host(wildcard("example.com")),
            Rule::new("first", RuleAction::Block).with_host(wildcard("example.com")),
        ]);
        assert_eq!(winner(&engine, &req("example.com", "/")).as_deref(), Some("second"));
    }

    #[test]
    fn test_multi_host_rule_is_one_logical_rule() {
        let rule = Rule::new("multi", RuleAction::Block)
            .with_host(wildcard("example.com"))
            .with_host(exact("ads.example.com"))
            .with_priority(3);
        let other = Rule::new("other", RuleAction::Block)
            .with_host(wildcard("ads.example.com"))
            .with_priority(3);
        let engine = RuleEngine::from_rules([rule, other]);

        // The exact pattern of "multi" is its most specific hit and beats the
        // deeper wildcard of "other".
        assert_eq!(winner(&engine, &req("ads.example.com", "/")).as_deref(), Some("multi"));
        assert_eq!(engine.stats().exact_entries, 1);
        assert_eq!(engine.stats().wildcard_entries, 2);
    }

    #[test]
    fn test_path_and_type_filters() {
        let engine = RuleEngine::from_rules([Rule::new("pagead", RuleAction::Block)
            .with_host(wildcard("youtube.com"))
            .with_path_regex("^/pagead/")
            .with_resource_types(ResourceTypes::SCRIPT | ResourceTypes::XHR)]);

        assert!(engine.match_request(&req("www.youtube.com", "/pagead/x.js")).matched);
        assert!(!engine.match_request(&req("www.youtube.com", "/watch")).matched);
        let image = Request::new("www.youtube.com", "/pagead/x.gif", ResourceType::Image, true);
        assert!(!engine.match_request(&image).matched);
    }

    #[test]
    fn test_party_filters_apply_to_allow_rules_too() {
        let engine = RuleEngine::from_rules([
            Rule::new("block", RuleAction::Block).with_host(wildcard("cdn.example")),
            Rule::new("allow-1p", RuleAction::Allow).with_host(wildcard("cdn.example")).first_party_only(),
        ]);
        let first = Request::new("cdn.example", "/", ResourceType::Script, false);
        let third = Request::new("cdn.example", "/", ResourceType::Script, true);
        assert_eq!(engine.match_request(&first).action, Some(RuleAction::Allow));
        assert_eq!(engine.match_request(&third).action, Some(RuleAction::Block));
    }

    #[test]
    fn test_invalid_regex_rule_never_matches_but_others_do() {
        let engine = RuleEngine::from_rules([
            Rule::new("broken", RuleAction::Allow).with_host(wildcard("ads.net")).with_path_regex("([a-"),
            Rule::new("ok", RuleAction::Block).with_host(wildcard("ads.net")),
        ]);
        let result = engine.match_request(&req("ads.net", "/anything"));
        assert_eq!(result.action, Some(RuleAction::Block));
        assert_eq!(engine.stats().invalid_path_rules, 1);
    }

    #[test]
    fn test_non_network_and_disabled_rules_never_decide() {
        let engine = RuleEngine::from_rules([
            Rule::new("css", RuleAction::Block).with_kind(RuleKind::Css).with_host(wildcard("example.com")),
            Rule::new("off", RuleAction::Block).with_host(wildcard("example.com")).disabled(),
            Rule::new("mod", RuleAction::Modify).with_host(wildcard("example.com")),
        ]);
        assert!(!engine.match_request(&req("example.com", "/")).matched);

        let stats = engine.stats();
        assert_eq!(stats.total_rules, 3);
        assert_eq!(stats.other_rules, 1);
        assert_eq!(stats.disabled_rules, 1);
        assert!(engine.rule("css").is_some());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut engine = RuleEngine::new();
        engine.add_rule(Rule::new("a", RuleAction::Block).with_host(exact("a.com"))).unwrap();
        let err = engine.add_rule(Rule::new("a", RuleAction::Allow).with_host(exact("a.com")));
        assert!(matches!(err, Err(Error::DuplicateRuleId(_))));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_host_case_and_trailing_dot() {
        let engine = RuleEngine::from_rules([Rule::new("dc", RuleAction::Block).with_host(wildcard("doubleclick.net"))]);
        let mut request = req("x", "/");
        request.host = "AD.DoubleClick.NET.".to_string();
        assert!(engine.match_request(&request).matched);
    }

    #[test]
    fn test_empty_engine_matches_nothing() {
        let engine = RuleEngine::new();
        assert!(!engine.match_request(&req("doubleclick.net", "/")).matched);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_shared_engine_swaps_atomically() {
        let shared = SharedEngine::new(RuleEngine::from_rules([
            Rule::new("old", RuleAction::Block).with_host(wildcard("old.example")),
        ]));
        let before = shared.get();

        let stats = shared.reload([Rule::new("new", RuleAction::Block).with_host(wildcard("new.example"))]);
        assert_eq!(stats.total_rules, 1);

        assert!(!shared.match_request(&req("old.example", "/")).matched);
        assert!(shared.match_request(&req("new.example", "/")).matched);
        // A handle taken before the swap still sees the old rule set in full
        assert!(before.match_request(&req("old.example", "/")).matched);
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RuleEngine>();
        assert_send_sync::<SharedEngine>();
    }
}
