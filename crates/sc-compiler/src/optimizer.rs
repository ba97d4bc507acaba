use std::collections::HashSet;

use sc_core::types::{Rule, RuleAction, RuleKind, RuleMatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
}

/// Remove rules that repeat an earlier rule's behaviour, keeping the first
/// occurrence so its id stays stable across list merges.
pub fn optimize_rules(rules: &mut Vec<Rule>) -> OptimizeStats {
    let before = rules.len();

    let mut seen: HashSet<RuleKey> = HashSet::new();
    let mut deduped = 0usize;
    rules.retain(|rule| {
        if seen.insert(RuleKey::from(rule)) {
            true
        } else {
            deduped += 1;
            false
        }
    });

    let after = rules.len();
    if deduped > 0 {
        log::debug!("optimizer removed {} duplicate rules ({} -> {})", deduped, before, after);
    }

    OptimizeStats { before, after, deduped }
}

#[derive(Hash, PartialEq, Eq)]
struct RuleKey {
    kind: RuleKind,
    action: RuleAction,
    criteria: RuleMatch,
    priority: i32,
    enabled: bool,
    payload: Option<String>,
}

impl From<&Rule> for RuleKey {
    fn from(rule: &Rule) -> Self {
        Self {
            kind: rule.kind,
            action: rule.action,
            criteria: rule.criteria.clone(),
            priority: rule.priority,
            enabled: rule.enabled,
            payload: rule.payload.clone(),
        }
    }
}
