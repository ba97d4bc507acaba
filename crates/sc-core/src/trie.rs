//! Reversed-label domain trie
//!
//! Nodes live in an arena and are addressed by index; rules are referenced by
//! their slot in the engine's rule table, so a rule with several host
//! patterns is indexed at several nodes without being copied.
//!
//! `ads.example.com` is stored along the path `com -> example -> ads`. Every
//! node keeps two ordered slot lists:
//!
//! - `exact`: rules for the host spelled by the path, and nothing else
//! - `wildcard`: rules for that host and all of its subdomains
//!
//! Rules without any host pattern hang off the root's wildcard list.

use std::collections::HashMap;

use crate::types::HostPattern;

/// Index of a rule in the engine's rule table.
pub(crate) type RuleSlot = u32;

type NodeId = u32;

const ROOT: NodeId = 0;

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<Box<str>, NodeId>,
    exact: Vec<RuleSlot>,
    wildcard: Vec<RuleSlot>,
}

/// A rule reached during a lookup, with the specificity of the pattern that
/// reached it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrieHit {
    pub slot: RuleSlot,
    pub exact: bool,
    /// Labels in the matched pattern; 0 for root rules.
    pub depth: u16,
}

#[derive(Debug)]
pub(crate) struct DomainTrie {
    nodes: Vec<TrieNode>,
}

impl DomainTrie {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
        }
    }

    /// Index `slot` under `pattern`.
    pub fn insert(&mut self, pattern: &HostPattern, slot: RuleSlot) {
        let node = self.descend_or_create(pattern.domain());
        let node = &mut self.nodes[node as usize];
        if pattern.is_wildcard() {
            node.wildcard.push(slot);
        } else {
            node.exact.push(slot);
        }
    }

    /// Index `slot` at the root, where it is seen by every host.
    pub fn insert_root(&mut self, slot: RuleSlot) {
        self.nodes[ROOT as usize].wildcard.push(slot);
    }

    fn descend_or_create(&mut self, domain: &str) -> NodeId {
        let mut current = ROOT;
        for label in domain.rsplit('.') {
            let next_id = self.nodes.len() as NodeId;
            let child = *self.nodes[current as usize]
                .children
                .entry(label.into())
                .or_insert(next_id);
            if child == next_id {
                self.nodes.push(TrieNode::default());
            }
            current = child;
        }
        current
    }

    /// Collect every rule whose pattern covers `host`, in insertion order
    /// per node, root first.
    pub fn collect(&self, host: &str, out: &mut Vec<TrieHit>) {
        let root = &self.nodes[ROOT as usize];
        out.extend(root.wildcard.iter().map(|&slot| TrieHit { slot, exact: false, depth: 0 }));

        let mut current = root;
        let mut depth: u16 = 0;
        for label in host.rsplit('.') {
            match current.children.get(label) {
                Some(&child) => {
                    current = &self.nodes[child as usize];
                    depth = depth.saturating_add(1);
                    out.extend(current.wildcard.iter().map(|&slot| TrieHit { slot, exact: false, depth }));
                }
                None => return,
            }
        }

        // Only reached when every label of the host was consumed
        out.extend(current.exact.iter().map(|&slot| TrieHit { slot, exact: true, depth }));
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn exact_entries(&self) -> usize {
        self.nodes.iter().map(|n| n.exact.len()).sum()
    }

    pub fn wildcard_entries(&self) -> usize {
        self.nodes.iter().skip(1).map(|n| n.wildcard.len()).sum()
    }

    pub fn root_entries(&self) -> usize {
        self.nodes[ROOT as usize].wildcard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(trie: &DomainTrie, host: &str) -> Vec<(RuleSlot, bool, u16)> {
        let mut out = Vec::new();
        trie.collect(host, &mut out);
        out.into_iter().map(|h| (h.slot, h.exact, h.depth)).collect()
    }

    #[test]
    fn test_wildcard_reaches_subdomains() {
        let mut trie = DomainTrie::new();
        trie.insert(&HostPattern::wildcard("doubleclick.net").unwrap(), 0);

        assert_eq!(slots(&trie, "doubleclick.net"), vec![(0, false, 2)]);
        assert_eq!(slots(&trie, "ad.doubleclick.net"), vec![(0, false, 2)]);
        assert_eq!(slots(&trie, "googleads.g.doubleclick.net"), vec![(0, false, 2)]);
        assert!(slots(&trie, "doubleclick.com").is_empty());
        assert!(slots(&trie, "net").is_empty());
    }

    #[test]
    fn test_exact_only_at_full_host() {
        let mut trie = DomainTrie::new();
        trie.insert(&HostPattern::exact("ads.example.com").unwrap(), 7);

        assert_eq!(slots(&trie, "ads.example.com"), vec![(7, true, 3)]);
        assert!(slots(&trie, "example.com").is_empty());
        assert!(slots(&trie, "x.ads.example.com").is_empty());
    }

    #[test]
    fn test_root_rules_seen_by_every_host() {
        let mut trie = DomainTrie::new();
        trie.insert_root(3);
        trie.insert(&HostPattern::wildcard("example.com").unwrap(), 4);

        assert_eq!(slots(&trie, "anything.org"), vec![(3, false, 0)]);
        assert_eq!(slots(&trie, "a.example.com"), vec![(3, false, 0), (4, false, 2)]);
        assert_eq!(slots(&trie, ""), vec![(3, false, 0)]);
    }

    #[test]
    fn test_node_sharing_and_counts() {
        let mut trie = DomainTrie::new();
        trie.insert(&HostPattern::wildcard("example.com").unwrap(), 0);
        trie.insert(&HostPattern::exact("ads.example.com").unwrap(), 1);
        trie.insert(&HostPattern::exact("example.com").unwrap(), 2);
        trie.insert_root(3);

        // root, com, example, ads
        assert_eq!(trie.node_count(), 4);
        assert_eq!(trie.exact_entries(), 2);
        assert_eq!(trie.wildcard_entries(), 1);
        assert_eq!(trie.root_entries(), 1);
    }
}
