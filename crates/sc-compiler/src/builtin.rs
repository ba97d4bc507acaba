//! Built-in seed rules, used when no external filter list is supplied.

use sc_core::types::Rule;

use crate::parser::{parse_filter_list_with, ParseOptions};

pub const BUILTIN_RULES_VERSION: &str = "2026.10.1";

/// Source name of rules parsed from [`BUILTIN_RULES`].
pub const BUILTIN_SOURCE: &str = "builtin";

pub const BUILTIN_RULES: &str = r#"! Title: Scrubber built-in rules
! Version: 2026.10.1
!
! Ad serving
||doubleclick.net^
||googlesyndication.com^
||googleadservices.com^
||adservice.google.com^
||imasdk.googleapis.com^$script,xhr,fetch,media
||moatads.com^
||adsrvr.org^
||innovid.com^
||springserve.com^
||serving-sys.com^
||fwmrm.net^
!
! Tracking
||google-analytics.com^$third-party
||googletagmanager.com^$third-party
||scorecardresearch.com^
||quantserve.com^
!
! Video ad endpoints served from first-party paths
/pagead/*
/api/stats/ads*$xhr,fetch,image,ping
/ptracking*$xhr,fetch,image,ping
/get_midroll_info*
"#;

/// Parse [`BUILTIN_RULES`].
pub fn builtin_rules() -> Vec<Rule> {
    parse_filter_list_with(BUILTIN_RULES, &ParseOptions::new(BUILTIN_SOURCE))
}
