use std::net::IpAddr;

use sc_core::types::{HostPattern, ResourceType, ResourceTypes, Rule, RuleAction, RuleId, RuleKind};

/// Separator placeholder `^`: any URL delimiter, or the end of the path.
const SEPARATOR_CLASS: &str = "(?:[/?&=:;,]|$)";

/// Hosts-file names that point at the local machine, never at an ad server.
const LOCAL_HOST_NAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "ip6-localhost",
    "ip6-loopback",
    "ip6-localnet",
    "ip6-mcastprefix",
    "ip6-allnodes",
    "ip6-allrouters",
    "ip6-allhosts",
    "0.0.0.0",
];

/// Per-list parse settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// List name, used as rule source and id prefix.
    pub source: String,
    /// Priority of rules without a `priority=` option.
    pub priority: i32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            source: "custom".to_string(),
            priority: 0,
        }
    }
}

impl ParseOptions {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Why a filter line was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineError {
    #[error("unknown option {0:?}")]
    UnknownOption(String),
    #[error("invalid priority {0:?}")]
    InvalidPriority(String),
    #[error("resource type options exclude every type")]
    EmptyTypeMask,
    #[error("both first-party and third-party required")]
    ConflictingParty,
    #[error("invalid host {0:?}")]
    InvalidHost(String),
    #[error("hosts entry names only local hosts")]
    LocalHostsOnly,
    #[error("rule has neither host nor path")]
    NoCriteria,
    #[error("empty cosmetic selector")]
    EmptySelector,
    #[error("unsupported pattern {0:?}")]
    UnsupportedPattern(String),
}

/// Parse a filter list with the default options (source `custom`).
pub fn parse_filter_list(text: &str) -> Vec<Rule> {
    parse_filter_list_with(text, &ParseOptions::default())
}

/// Parse a filter list. Malformed lines are logged and skipped.
///
/// Rule ids are `{source}:{line}` with 1-based line numbers, so parsing the
/// same text twice yields the same ids.
pub fn parse_filter_list_with(text: &str, options: &ParseOptions) -> Vec<Rule> {
    let mut rules = Vec::new();
    let mut skipped = 0usize;

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || is_comment_line(line) {
            continue;
        }

        let line_number = index + 1;
        match parse_line(line) {
            Ok(parsed) => {
                let id = RuleId::new(format!("{}:{}", options.source, line_number));
                rules.push(parsed.into_rule(id, options));
            }
            Err(e) => {
                skipped += 1;
                log::debug!("{}:{}: skipping {:?}: {}", options.source, line_number, line, e);
            }
        }
    }

    if skipped > 0 {
        log::debug!("{}: parsed {} rules, skipped {} lines", options.source, rules.len(), skipped);
    }

    rules
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('#') || line.starts_with("//") || line.starts_with('!') || line.starts_with('[')
}

// =============================================================================
// Line Parsing
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Party {
    #[default]
    Any,
    FirstOnly,
    ThirdOnly,
}

#[derive(Debug, Default)]
struct ParsedOptions {
    resource_types: Option<ResourceTypes>,
    party: Party,
    priority: Option<i32>,
}

#[derive(Debug)]
struct ParsedLine {
    kind: RuleKind,
    action: RuleAction,
    hosts: Vec<HostPattern>,
    path_regex: Option<String>,
    options: ParsedOptions,
    payload: Option<String>,
}

impl ParsedLine {
    fn into_rule(self, id: RuleId, options: &ParseOptions) -> Rule {
        let mut rule = Rule::new(id, self.action)
            .with_kind(self.kind)
            .with_source(options.source.as_str())
            .with_priority(self.options.priority.unwrap_or(options.priority));

        for host in self.hosts {
            rule = rule.with_host(host);
        }
        if let Some(source) = &self.path_regex {
            rule = rule.with_path_regex(source);
        }
        if let Some(types) = self.options.resource_types {
            rule = rule.with_resource_types(types);
        }
        rule = match self.options.party {
            Party::Any => rule,
            Party::FirstOnly => rule.first_party_only(),
            Party::ThirdOnly => rule.third_party_only(),
        };
        if let Some(payload) = self.payload {
            rule = rule.with_payload(payload);
        }
        rule
    }
}

fn parse_line(line: &str) -> Result<ParsedLine, LineError> {
    if let Some(parsed) = parse_cosmetic(line) {
        return parsed;
    }

    let (action, line) = match line.strip_prefix("@@") {
        Some(rest) => (RuleAction::Allow, rest.trim_start()),
        None => (RuleAction::Block, line),
    };

    let (pattern, options_text) = split_rule_options(line);
    let options = match options_text {
        Some(text) => parse_options(text)?,
        None => ParsedOptions::default(),
    };

    let (hosts, path_regex) = parse_network_pattern(pattern.trim())?;
    if hosts.is_empty() && path_regex.is_none() {
        return Err(LineError::NoCriteria);
    }

    Ok(ParsedLine {
        kind: RuleKind::Network,
        action,
        hosts,
        path_regex,
        options,
        payload: None,
    })
}

/// `hosts##selector`, `hosts##+js(...)` and `hosts#@#selector`.
fn parse_cosmetic(line: &str) -> Option<Result<ParsedLine, LineError>> {
    let (pos, sep_len, action) = match (line.find("#@#"), line.find("##")) {
        (Some(exc), Some(hide)) if exc < hide => (exc, 3, RuleAction::Allow),
        (_, Some(hide)) => (hide, 2, RuleAction::Block),
        (Some(exc), None) => (exc, 3, RuleAction::Allow),
        (None, None) => return None,
    };

    let selector = line[pos + sep_len..].trim();
    if selector.is_empty() {
        return Some(Err(LineError::EmptySelector));
    }
    let kind = if selector.starts_with("+js(") {
        RuleKind::Script
    } else {
        RuleKind::Css
    };

    let mut hosts = Vec::new();
    for raw in line[..pos].split(',').map(str::trim).filter(|h| !h.is_empty()) {
        match HostPattern::wildcard(raw) {
            Some(host) if !raw.starts_with('~') => hosts.push(host),
            _ => return Some(Err(LineError::InvalidHost(raw.to_string()))),
        }
    }

    Some(Ok(ParsedLine {
        kind,
        action,
        hosts,
        path_regex: None,
        options: ParsedOptions::default(),
        payload: Some(selector.to_string()),
    }))
}

fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    // The `$` of a regex rule belongs to the regex unless it follows the
    // closing slash.
    if line.starts_with('/') {
        if let Some(end) = line.rfind('/').filter(|&end| end > 0) {
            let tail = &line[end + 1..];
            if tail.is_empty() {
                return (line, None);
            }
            if let Some(options) = tail.strip_prefix('$') {
                return (&line[..=end], Some(options));
            }
        }
    }

    match line.rfind('$') {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

fn parse_options(text: &str) -> Result<ParsedOptions, LineError> {
    let mut type_include = ResourceTypes::empty();
    let mut type_exclude = ResourceTypes::empty();
    let mut first_party = false;
    let mut third_party = false;
    let mut priority = None;

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let raw_lower = raw.to_ascii_lowercase();

        if let Some(value) = raw_lower.strip_prefix("priority=") {
            let value = value.trim();
            priority = Some(
                value
                    .parse::<i32>()
                    .map_err(|_| LineError::InvalidPriority(value.to_string()))?,
            );
            continue;
        }

        match raw_lower.as_str() {
            "third-party" | "thirdparty" | "3p" | "~first-party" | "~1p" => {
                third_party = true;
                continue;
            }
            "first-party" | "firstparty" | "1p" | "~third-party" | "~3p" => {
                first_party = true;
                continue;
            }
            _ => {}
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower.as_str()),
        };

        match ResourceType::parse(name) {
            Some(ty) if negated => type_exclude |= ty.mask(),
            Some(ty) => type_include |= ty.mask(),
            None => return Err(LineError::UnknownOption(raw.to_string())),
        }
    }

    if first_party && third_party {
        return Err(LineError::ConflictingParty);
    }

    let resource_types = if type_include.is_empty() && type_exclude.is_empty() {
        None
    } else {
        let base = if type_include.is_empty() { ResourceTypes::ALL } else { type_include };
        let mask = base.difference(type_exclude);
        if mask.is_empty() {
            return Err(LineError::EmptyTypeMask);
        }
        (mask != ResourceTypes::ALL).then_some(mask)
    };

    let party = match (first_party, third_party) {
        (true, _) => Party::FirstOnly,
        (_, true) => Party::ThirdOnly,
        _ => Party::Any,
    };

    Ok(ParsedOptions {
        resource_types,
        party,
        priority,
    })
}

fn parse_network_pattern(pattern: &str) -> Result<(Vec<HostPattern>, Option<String>), LineError> {
    if pattern.is_empty() {
        return Ok((Vec::new(), None));
    }

    if let Some(rest) = pattern.strip_prefix("||") {
        return parse_host_anchor(rest);
    }

    if pattern.starts_with("*.") {
        let host = HostPattern::parse(pattern).ok_or_else(|| LineError::InvalidHost(pattern.to_string()))?;
        return Ok((vec![host], None));
    }

    if pattern.starts_with('/') {
        if pattern.len() > 2 && pattern.ends_with('/') {
            return Ok((Vec::new(), Some(pattern[1..pattern.len() - 1].to_string())));
        }
        return Ok((Vec::new(), Some(glob_to_regex(pattern))));
    }

    if pattern.contains(char::is_whitespace) {
        return parse_hosts_entry(pattern).map(|hosts| (hosts, None));
    }

    if !pattern.contains('.') || pattern.contains(['*', '^', '|', '/']) {
        return Err(LineError::UnsupportedPattern(pattern.to_string()));
    }
    if is_local_name(pattern) {
        return Err(LineError::LocalHostsOnly);
    }
    let host = HostPattern::exact(pattern).ok_or_else(|| LineError::InvalidHost(pattern.to_string()))?;
    Ok((vec![host], None))
}

/// The part after `||`: a host, optionally followed by `^` and/or a path.
fn parse_host_anchor(rest: &str) -> Result<(Vec<HostPattern>, Option<String>), LineError> {
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    let end = rest
        .find(|c: char| matches!(c, '/' | '^' | '|' | '*' | '?' | ':'))
        .unwrap_or(rest.len());
    let (host, tail) = rest.split_at(end);

    let host = HostPattern::wildcard(host).ok_or_else(|| LineError::InvalidHost(host.to_string()))?;

    let path_regex = match tail {
        "" | "^" | "|" | "^|" => None,
        t if t.starts_with('/') => Some(glob_to_regex(t)),
        t if t.starts_with("^/") => Some(glob_to_regex(&t[1..])),
        t => return Err(LineError::UnsupportedPattern(t.to_string())),
    };

    Ok((vec![host], path_regex))
}

/// `0.0.0.0 host [host...] [# comment]`
fn parse_hosts_entry(line: &str) -> Result<Vec<HostPattern>, LineError> {
    let line = line.split('#').next().unwrap_or(line);
    let mut tokens = line.split_whitespace();

    let address = tokens.next().unwrap_or_default();
    if address.parse::<IpAddr>().is_err() {
        return Err(LineError::UnsupportedPattern(line.trim().to_string()));
    }

    let mut hosts = Vec::new();
    for name in tokens {
        if is_local_name(name) || name.parse::<IpAddr>().is_ok() {
            continue;
        }
        let host = HostPattern::exact(name).ok_or_else(|| LineError::InvalidHost(name.to_string()))?;
        if !hosts.contains(&host) {
            hosts.push(host);
        }
    }

    if hosts.is_empty() {
        return Err(LineError::LocalHostsOnly);
    }
    Ok(hosts)
}

fn is_local_name(name: &str) -> bool {
    LOCAL_HOST_NAMES.iter().any(|local| local.eq_ignore_ascii_case(name))
}

/// Translate a path glob into an anchored regex. `*` matches anything, `^`
/// a separator, and a trailing `|` pins the end of the path.
fn glob_to_regex(glob: &str) -> String {
    let (body, pinned) = match glob.strip_suffix('|') {
        Some(body) => (body, true),
        None => (glob, false),
    };

    let mut out = String::from("^");
    let mut literal_start = 0;
    for (i, ch) in body.char_indices() {
        let replacement = match ch {
            '*' => ".*",
            '^' => SEPARATOR_CLASS,
            _ => continue,
        };
        out.push_str(&regex::escape(&body[literal_start..i]));
        out.push_str(replacement);
        literal_start = i + 1;
    }
    out.push_str(&regex::escape(&body[literal_start..]));
    if pinned {
        out.push('$');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_core::types::Request;

    fn parse_one(line: &str) -> Rule {
        let rules = parse_filter_list(line);
        assert_eq!(rules.len(), 1, "expected one rule from {line:?}");
        rules.into_iter().next().unwrap()
    }

    fn req(host: &str, path: &str, ty: ResourceType, third: bool) -> Request {
        Request::new(host, path, ty, third)
    }

    #[test]
    fn test_comments_and_ids() {
        let text = "! Title: test\n# hosts comment\n// note\n[Adblock Plus 2.0]\n\n||ads.example^\n  ||Tracker.Example^  \n";
        let rules = parse_filter_list(text);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id.as_str(), "custom:6");
        assert_eq!(rules[1].id.as_str(), "custom:7");
        assert_eq!(rules[1].criteria.hosts, vec![HostPattern::wildcard("tracker.example").unwrap()]);
        assert_eq!(rules[0].source, "custom");

        // Same text, same ids
        let again = parse_filter_list(text);
        assert_eq!(rules, again);
    }

    #[test]
    fn test_source_and_priority() {
        let options = ParseOptions::new("easylist").with_priority(10);
        let rules = parse_filter_list_with("||a.example^\n||b.example^$priority=-3\n", &options);
        assert_eq!(rules[0].id.as_str(), "easylist:1");
        assert_eq!(rules[0].source, "easylist");
        assert_eq!(rules[0].priority, 10);
        assert_eq!(rules[1].priority, -3);
    }

    #[test]
    fn test_host_anchor_forms() {
        let rule = parse_one("||doubleclick.net^");
        assert_eq!(rule.action, RuleAction::Block);
        assert_eq!(rule.kind, RuleKind::Network);
        assert_eq!(rule.criteria.hosts, vec![HostPattern::wildcard("doubleclick.net").unwrap()]);
        assert!(rule.criteria.path_regex.is_none());

        assert_eq!(parse_one("||doubleclick.net").criteria.hosts, rule.criteria.hosts);
        assert_eq!(parse_one("*.doubleclick.net").criteria.hosts, rule.criteria.hosts);
    }

    #[test]
    fn test_host_with_path() {
        let rule = parse_one("||ads.example/banner/*.gif");
        let path = rule.criteria.path_regex.as_ref().unwrap();
        assert!(path.is_valid());
        assert!(path.is_match("/banner/top.gif"));
        assert!(!path.is_match("/img/banner/top.gif"));
        assert!(!path.is_match("/other.gif"));

        let sep = parse_one("||cdn.example^/ads^");
        let path = sep.criteria.path_regex.as_ref().unwrap();
        assert!(path.is_match("/ads"));
        assert!(path.is_match("/ads/x"));
        assert!(!path.is_match("/adsx"));
    }

    #[test]
    fn test_exception_rule() {
        let rule = parse_one("@@||safe.example^$script");
        assert_eq!(rule.action, RuleAction::Allow);
        assert_eq!(rule.criteria.resource_types, Some(ResourceTypes::SCRIPT));
    }

    #[test]
    fn test_bare_host_and_hosts_file() {
        let rule = parse_one("Ads.Example.com");
        assert_eq!(rule.criteria.hosts, vec![HostPattern::exact("ads.example.com").unwrap()]);

        let rule = parse_one("0.0.0.0 ads.example tracker.example # inline");
        assert_eq!(
            rule.criteria.hosts,
            vec![
                HostPattern::exact("ads.example").unwrap(),
                HostPattern::exact("tracker.example").unwrap()
            ]
        );

        let text = "127.0.0.1 localhost\n::1 ip6-localhost ip6-loopback\n255.255.255.255 broadcasthost\n0.0.0.0 0.0.0.0\nlocalhost\n";
        assert!(parse_filter_list(text).is_empty());
    }

    #[test]
    fn test_regex_and_path_rules() {
        let rule = parse_one(r"/ad[0-9]+\.js$/");
        let path = rule.criteria.path_regex.as_ref().unwrap();
        assert!(rule.criteria.hosts.is_empty());
        assert!(path.is_match("/static/ad12.js"));
        assert!(!path.is_match("/static/ad12.js.map"));

        let rule = parse_one("/pagead/*$script");
        let path = rule.criteria.path_regex.as_ref().unwrap();
        assert!(path.is_match("/pagead/conversion.js"));
        assert!(!path.is_match("/x/pagead/"));
        assert_eq!(rule.criteria.resource_types, Some(ResourceTypes::SCRIPT));

        // Uncompilable regexes are kept but never match
        let rule = parse_one("/ad(/");
        assert!(!rule.criteria.path_regex.as_ref().unwrap().is_valid());
    }

    #[test]
    fn test_options() {
        let rule = parse_one("||x.example^$third-party");
        assert_eq!(rule.criteria.third_party_only, Some(true));
        assert!(!rule.criteria.accepts(&req("x.example", "/", ResourceType::Image, false)));

        let rule = parse_one("||x.example^$1p");
        assert_eq!(rule.criteria.first_party_only, Some(true));
        assert_eq!(parse_one("||x.example^$~third-party").criteria.first_party_only, Some(true));

        let rule = parse_one("||x.example^$~script,~image");
        let types = rule.criteria.resource_types.unwrap();
        assert!(!types.accepts(ResourceType::Script));
        assert!(!types.accepts(ResourceType::Image));
        assert!(types.accepts(ResourceType::Xhr));

        let rule = parse_one("||x.example^$xmlhttprequest,fetch,~fetch");
        assert_eq!(rule.criteria.resource_types, Some(ResourceTypes::XHR));

        let rule = parse_one("||ws.example^$websocket");
        assert_eq!(rule.kind, RuleKind::Network);
        assert_eq!(rule.criteria.resource_types, Some(ResourceTypes::WEBSOCKET));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let text = "||x.example^$important\n||x.example^$priority=high\n||x.example^$script,~script\n||x.example^$1p,3p\n||bad host^\n@@$script\n||x.example:8080^\nexample##\n~x.example##.ad\nplainword\n||ok.example^\n";
        let rules = parse_filter_list(text);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id.as_str(), "custom:11");
    }

    #[test]
    fn test_line_errors() {
        assert_eq!(
            parse_line("||x.example^$important").unwrap_err(),
            LineError::UnknownOption("important".into())
        );
        assert_eq!(parse_line("||x.example^$~script,script").unwrap_err(), LineError::EmptyTypeMask);
        assert_eq!(parse_line("@@$xhr").unwrap_err(), LineError::NoCriteria);
        assert_eq!(parse_line("127.0.0.1 localhost").unwrap_err(), LineError::LocalHostsOnly);
        assert_eq!(parse_line("a.example##").unwrap_err(), LineError::EmptySelector);
    }

    #[test]
    fn test_cosmetic_rules_are_carried() {
        let rule = parse_one("example.com,news.example##.ad-banner");
        assert_eq!(rule.kind, RuleKind::Css);
        assert_eq!(rule.action, RuleAction::Block);
        assert_eq!(rule.payload.as_deref(), Some(".ad-banner"));
        assert_eq!(rule.criteria.hosts.len(), 2);

        let rule = parse_one("example.com##+js(set-constant, ads, false)");
        assert_eq!(rule.kind, RuleKind::Script);

        let rule = parse_one("example.com#@#.ad-banner");
        assert_eq!(rule.kind, RuleKind::Css);
        assert_eq!(rule.action, RuleAction::Allow);

        // Attribute selectors may contain `$`
        let rule = parse_one(r#"example.com##a[href$=".pdf"]"#);
        assert_eq!(rule.payload.as_deref(), Some(r#"a[href$=".pdf"]"#));
    }

    #[test]
    fn test_glob_to_regex() {
        assert_eq!(glob_to_regex("/a.b"), r"^/a\.b");
        assert_eq!(glob_to_regex("/a*b|"), "^/a.*b$");
        assert_eq!(glob_to_regex("/a^"), format!("^/a{SEPARATOR_CLASS}"));
    }
}
