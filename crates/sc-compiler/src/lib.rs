//! Scrubber Filter List Compiler
//!
//! This crate turns ABP/uBO-style filter lists and hosts files into
//! `sc_core` rules, ready to be loaded into a `RuleEngine`.

pub mod builtin;
pub mod optimizer;
pub mod parser;

pub use builtin::{builtin_rules, BUILTIN_RULES, BUILTIN_RULES_VERSION};
pub use optimizer::{optimize_rules, OptimizeStats};
pub use parser::{parse_filter_list, parse_filter_list_with, LineError, ParseOptions};

use sc_core::types::Rule;

/// One named filter list.
#[derive(Debug, Clone, Copy)]
pub struct FilterList<'a> {
    pub source: &'a str,
    pub text: &'a str,
    pub priority: i32,
}

impl<'a> FilterList<'a> {
    pub fn new(source: &'a str, text: &'a str) -> Self {
        Self { source, text, priority: 0 }
    }
}

/// Parse and merge `lists` in order, dropping duplicates.
pub fn compile(lists: &[FilterList<'_>]) -> Vec<Rule> {
    let mut rules = Vec::new();
    for list in lists {
        let options = ParseOptions::new(list.source).with_priority(list.priority);
        rules.extend(parse_filter_list_with(list.text, &options));
    }

    let stats = optimize_rules(&mut rules);
    log::info!(
        "compiled {} lists: {} rules ({} duplicates removed)",
        lists.len(),
        stats.after,
        stats.deduped
    );
    rules
}

/// Like [`compile`], with the built-in rules in front.
pub fn compile_with_builtin(lists: &[FilterList<'_>]) -> Vec<Rule> {
    let mut all = Vec::with_capacity(lists.len() + 1);
    all.push(FilterList::new(builtin::BUILTIN_SOURCE, BUILTIN_RULES));
    all.extend_from_slice(lists);
    compile(&all)
}
