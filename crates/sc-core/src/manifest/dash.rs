//! DASH MPD rewriting
//!
//! A single forward scan over the document tracks the element stack and
//! records the byte span of every `Period` that is a direct child of the
//! `MPD` root. Ad periods are then cut out of the original text, so all
//! surviving bytes (declarations, namespaces, attributes, whitespace) are
//! reproduced exactly.
//!
//! The scan also acts as a well-formedness check: unbalanced or unterminated
//! markup leaves the document untouched.

use super::{ManifestConfig, ManifestRewriteResult};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
enum MpdError {
    #[error("unterminated {0}")]
    Unterminated(&'static str),
    #[error("empty tag name at byte {0}")]
    EmptyTagName(usize),
    #[error("closing tag </{found}> does not match <{expected}>")]
    MismatchedClose { expected: String, found: String },
    #[error("closing tag </{0}> without an open element")]
    UnexpectedClose(String),
    #[error("element <{0}> is never closed")]
    Unclosed(String),
    #[error("root element is <{0}>, expected <MPD>")]
    WrongRoot(String),
    #[error("more than one root element")]
    MultipleRoots,
    #[error("no root element")]
    MissingRoot,
}

/// Byte span and ad evidence of one top-level `Period`.
#[derive(Debug, Default)]
struct PeriodSpan {
    start: usize,
    end: usize,
    id: Option<String>,
    has_ad_adaptation_set: bool,
}

pub fn rewrite(text: &str, config: &ManifestConfig) -> ManifestRewriteResult {
    let periods = match scan_periods(text) {
        Ok(periods) => periods,
        Err(e) => {
            log::debug!("malformed MPD, passing through: {}", e);
            return ManifestRewriteResult::unchanged(text);
        }
    };

    let ad_periods: Vec<&PeriodSpan> = periods.iter().filter(|p| is_ad_period(p, config)).collect();
    if ad_periods.is_empty() {
        return ManifestRewriteResult::unchanged(text);
    }

    let mut body = String::with_capacity(text.len());
    let mut cursor = 0;
    for period in &ad_periods {
        let start = removal_start(text, period.start).max(cursor);
        body.push_str(&text[cursor..start]);
        cursor = period.end;
    }
    body.push_str(&text[cursor..]);

    ManifestRewriteResult {
        modified: true,
        body,
        segments_removed: ad_periods.len(),
    }
}

fn is_ad_period(period: &PeriodSpan, config: &ManifestConfig) -> bool {
    if period.has_ad_adaptation_set {
        return true;
    }
    match &period.id {
        Some(id) => {
            let id = id.to_ascii_lowercase();
            config.period_id_markers.iter().any(|m| id.contains(m.as_str()))
        }
        None => false,
    }
}

/// Pull the cut back over the indentation and line break that precede an
/// element sitting on its own line.
fn removal_start(text: &str, start: usize) -> usize {
    let before = &text[..start];
    let trimmed = before.trim_end_matches([' ', '\t']);
    match trimmed.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest).len(),
        None => start,
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn scan_periods(text: &str) -> Result<Vec<PeriodSpan>, MpdError> {
    let mut stack: Vec<&str> = Vec::new();
    let mut periods = Vec::new();
    let mut current: Option<PeriodSpan> = None;
    let mut seen_root = false;
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('<') {
        let lt = pos + offset;
        let rest = &text[lt..];

        if rest.starts_with("<!--") {
            pos = find_after(text, lt + 4, "-->").ok_or(MpdError::Unterminated("comment"))?;
            continue;
        }
        if rest.starts_with("<![CDATA[") {
            pos = find_after(text, lt + 9, "]]>").ok_or(MpdError::Unterminated("CDATA section"))?;
            continue;
        }
        if rest.starts_with("<?") {
            pos = find_after(text, lt + 2, "?>").ok_or(MpdError::Unterminated("processing instruction"))?;
            continue;
        }
        if rest.starts_with("<!") {
            pos = skip_declaration(text, lt + 2).ok_or(MpdError::Unterminated("declaration"))?;
            continue;
        }

        if rest.starts_with("</") {
            let gt = find_tag_end(text, lt + 2).ok_or(MpdError::Unterminated("closing tag"))?;
            let name = text[lt + 2..gt].trim();
            let open = stack.pop().ok_or_else(|| MpdError::UnexpectedClose(name.to_string()))?;
            if open != name {
                return Err(MpdError::MismatchedClose {
                    expected: open.to_string(),
                    found: name.to_string(),
                });
            }
            if stack.len() == 1 && local_name(name) == "Period" {
                if let Some(mut period) = current.take() {
                    period.end = gt + 1;
                    periods.push(period);
                }
            }
            pos = gt + 1;
            continue;
        }

        let gt = find_tag_end(text, lt + 1).ok_or(MpdError::Unterminated("start tag"))?;
        let inner = &text[lt + 1..gt];
        let self_closing = inner.ends_with('/');
        let inner = inner.strip_suffix('/').unwrap_or(inner);
        let name_end = inner
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(inner.len());
        let name = &inner[..name_end];
        let attrs = &inner[name_end..];
        if name.is_empty() {
            return Err(MpdError::EmptyTagName(lt));
        }

        if stack.is_empty() {
            if seen_root {
                return Err(MpdError::MultipleRoots);
            }
            if local_name(name) != "MPD" {
                return Err(MpdError::WrongRoot(name.to_string()));
            }
            seen_root = true;
        } else if stack.len() == 1 && local_name(name) == "Period" {
            let period = PeriodSpan {
                start: lt,
                end: gt + 1,
                id: attribute(attrs, "id").map(str::to_string),
                has_ad_adaptation_set: false,
            };
            if self_closing {
                periods.push(period);
            } else {
                current = Some(period);
            }
        } else if local_name(name) == "AdaptationSet" {
            if let Some(period) = current.as_mut() {
                if attribute(attrs, "contentType").is_some_and(|v| v.trim().eq_ignore_ascii_case("ad")) {
                    period.has_ad_adaptation_set = true;
                }
            }
        }

        if !self_closing {
            stack.push(name);
        }
        pos = gt + 1;
    }

    if let Some(open) = stack.last() {
        return Err(MpdError::Unclosed(open.to_string()));
    }
    if !seen_root {
        return Err(MpdError::MissingRoot);
    }

    Ok(periods)
}

/// Position just past the next `needle` at or after `from`.
fn find_after(text: &str, from: usize, needle: &str) -> Option<usize> {
    text[from..].find(needle).map(|i| from + i + needle.len())
}

/// Index of the `>` closing a tag, skipping quoted attribute values.
fn find_tag_end(text: &str, from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in text.as_bytes()[from..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(from + i),
            None if b == b'<' => return None,
            None => {}
        }
    }
    None
}

/// Skip a `<!DOCTYPE ...>` style declaration, including an internal subset.
fn skip_declaration(text: &str, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (i, &b) in text.as_bytes()[from..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b'>' if depth == 0 => return Some(from + i + 1),
                _ => {}
            },
        }
    }
    None
}

/// Value of attribute `name` in the attribute text of a start tag.
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = attrs;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return None;
        }

        let eq = rest.find('=')?;
        let key = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let quote = after.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let close = after[1..].find(quote)?;
        let value = &after[1..1 + close];
        if key == name {
            return Some(value);
        }
        rest = &after[close + 2..];
    }
}
