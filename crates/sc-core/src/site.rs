//! Site (registrable domain) utilities for first/third-party classification
//!
//! A heuristic eTLD+1: the last two labels, or the last three when the last
//! two form a well-known two-part public suffix. Good enough to decide
//! third-partiness when the embedder does not supply it.
//!
//! # Examples
//!
//! ```
//! use sc_core::site::registrable_domain;
//!
//! assert_eq!(registrable_domain("sub.example.com"), "example.com");
//! assert_eq!(registrable_domain("sub.example.co.uk"), "example.co.uk");
//! ```

/// Common two-part public suffixes.
const COMMON_TWO_PART_TLDS: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

/// Get the registrable domain of a lower-case host, as a slice of it.
pub fn registrable_domain(host: &str) -> &str {
    let host = host.trim_end_matches('.');

    // IP literals are their own site
    if host.contains(':') || host.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return host;
    }

    let keep = match last_two_labels(host) {
        Some(suffix) if COMMON_TWO_PART_TLDS.contains(&suffix) => 3,
        _ => 2,
    };

    nth_label_start(host, keep).map_or(host, |start| &host[start..])
}

/// Check if two hosts belong to the same site.
pub fn is_same_site(host1: &str, host2: &str) -> bool {
    registrable_domain(host1) == registrable_domain(host2)
}

/// Check if a request to `req_host` made from `site_host` is third-party.
pub fn is_third_party(site_host: &str, req_host: &str) -> bool {
    !is_same_site(site_host, req_host)
}

fn last_two_labels(host: &str) -> Option<&str> {
    nth_label_start(host, 2).map(|start| &host[start..])
}

/// Byte offset where the last `n` labels begin, or `None` if the host has
/// `n` labels or fewer.
fn nth_label_start(host: &str, n: usize) -> Option<usize> {
    let mut seen = 0;
    for (i, b) in host.bytes().enumerate().rev() {
        if b == b'.' {
            seen += 1;
            if seen == n {
                return Some(i + 1);
            }
        }
    }
    None
}
