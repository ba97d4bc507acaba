//! Error type for the configuration and construction seams.
//!
//! The per-request pipeline (matching, inspection, manifest rewriting) never
//! returns these; it degrades to a pass-through result instead.

use crate::types::RuleId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Duplicate rule id: {0}")]
    DuplicateRuleId(RuleId),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid host pattern: {0:?}")]
    InvalidHostPattern(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}
