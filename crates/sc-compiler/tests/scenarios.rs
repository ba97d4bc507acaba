use sc_compiler::{builtin_rules, compile, compile_with_builtin, parse_filter_list, FilterList};
use sc_core::{Request, ResourceType, RuleAction, RuleEngine, SharedEngine};

fn builtin_engine() -> RuleEngine {
    RuleEngine::from_rules(builtin_rules())
}

#[test]
fn builtin_blocks_doubleclick() {
    let engine = builtin_engine();

    let result = engine.match_request(&Request::new("doubleclick.net", "/test", ResourceType::Script, true));
    assert!(result.matched);
    assert_eq!(result.action, Some(RuleAction::Block));

    let sub = engine.match_request(&Request::new(
        "googleads.g.doubleclick.net",
        "/pagead/id",
        ResourceType::Xhr,
        true,
    ));
    assert!(sub.is_blocked());
}

#[test]
fn builtin_leaves_youtube_apex_alone() {
    let engine = builtin_engine();
    for host in ["youtube.com", "www.youtube.com"] {
        let result = engine.match_request(&Request::new(host, "/", ResourceType::Document, false));
        assert!(!result.matched, "{host}");
    }
}

#[test]
fn builtin_ids_are_stable() {
    let first: Vec<_> = builtin_rules().into_iter().map(|r| r.id).collect();
    let second: Vec<_> = builtin_rules().into_iter().map(|r| r.id).collect();
    assert_eq!(first, second);
    assert!(first.iter().all(|id| id.as_str().starts_with("builtin:")));
}

#[test]
fn exception_list_overrides_builtin() {
    let rules = compile_with_builtin(&[FilterList::new("user", "@@||safe.doubleclick.net^\n")]);
    let engine = RuleEngine::from_rules(rules);

    let result = engine.match_request(&Request::new("safe.doubleclick.net", "/x", ResourceType::Script, true));
    assert_eq!(result.action, Some(RuleAction::Allow));
    assert_eq!(result.rule_id().map(|id| id.as_str()), Some("user:1"));

    let other = engine.match_request(&Request::new("ad.doubleclick.net", "/x", ResourceType::Script, true));
    assert!(other.is_blocked());
}

#[test]
fn hosts_file_and_adblock_syntax_mix() {
    let text = "\
# hosts section
0.0.0.0 tracker.example metrics.example
! adblock section
||ads.example^$third-party
@@||ads.example/allowed/*
example.com##.banner
";
    let engine = RuleEngine::from_rules(parse_filter_list(text));
    let stats = engine.stats();
    assert_eq!(stats.total_rules, 4);
    assert_eq!(stats.network_rules, 3);
    assert_eq!(stats.other_rules, 1);

    assert!(engine
        .match_request(&Request::new("metrics.example", "/", ResourceType::Ping, true))
        .is_blocked());
    // Exact hosts-file entries do not cover subdomains
    assert!(!engine
        .match_request(&Request::new("eu.metrics.example", "/", ResourceType::Ping, true))
        .matched);

    assert!(engine
        .match_request(&Request::new("cdn.ads.example", "/banner.js", ResourceType::Script, true))
        .is_blocked());
    assert!(!engine
        .match_request(&Request::new("ads.example", "/banner.js", ResourceType::Script, false))
        .matched);

    let allowed = engine.match_request(&Request::new("ads.example", "/allowed/x.js", ResourceType::Script, true));
    assert_eq!(allowed.action, Some(RuleAction::Allow));
}

#[test]
fn reload_swaps_compiled_lists() {
    let shared = SharedEngine::new(RuleEngine::from_rules(compile(&[FilterList::new("a", "||one.example^\n")])));
    let req = Request::new("two.example", "/", ResourceType::Image, true);
    assert!(!shared.match_request(&req).matched);

    let stats = shared.reload(compile(&[FilterList::new("b", "||two.example^\n")]));
    assert_eq!(stats.total_rules, 1);
    assert!(shared.match_request(&req).is_blocked());
}
