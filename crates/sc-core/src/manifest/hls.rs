//! HLS media playlist rewriting
//!
//! Segments are `#EXTINF` lines, any tags between them and their URI, and
//! the URI line itself. A segment is dropped when it sits inside an ad break
//! (`#EXT-X-CUE-OUT` .. `#EXT-X-CUE-IN`) or when its URI points at a known ad
//! host. Cue directives are dropped once consumed; every other line is kept
//! verbatim, line endings included.

use std::borrow::Cow;

use super::{ManifestConfig, ManifestRewriteResult};
use crate::url::extract_host;

const CUE_OUT: &str = "#EXT-X-CUE-OUT";
const CUE_OUT_CONT: &str = "#EXT-X-CUE-OUT-CONT";
const CUE_IN: &str = "#EXT-X-CUE-IN";
const EXTINF: &str = "#EXTINF";
const MEDIA_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE:";

/// Lines of one segment, buffered until its URI decides its fate.
struct PendingSegment<'a> {
    lines: Vec<&'a str>,
    in_break: bool,
}

pub fn rewrite(text: &str, config: &ManifestConfig) -> ManifestRewriteResult {
    if !text.trim_start_matches('\u{feff}').trim_start().starts_with("#EXTM3U") {
        log::debug!("not an HLS playlist, passing through");
        return ManifestRewriteResult::unchanged(text);
    }

    let mut out: Vec<Cow<'_, str>> = Vec::new();
    let mut pending: Option<PendingSegment<'_>> = None;
    let mut in_break = false;
    let mut consumed_directives = 0usize;
    let mut removed = 0usize;
    let mut leading_removed = 0usize;
    let mut kept_segment = false;
    let mut media_sequence_line: Option<usize> = None;

    for line in text.split_inclusive('\n') {
        let content = line.trim_end();

        if content.starts_with(CUE_OUT_CONT) {
            consumed_directives += 1;
            continue;
        }
        if content.starts_with(CUE_OUT) {
            in_break = true;
            consumed_directives += 1;
            continue;
        }
        if content.starts_with(CUE_IN) {
            in_break = false;
            consumed_directives += 1;
            continue;
        }

        if content.starts_with(EXTINF) {
            // An #EXTINF without a URI is kept as-is
            if let Some(orphan) = pending.take() {
                out.extend(orphan.lines.into_iter().map(Cow::Borrowed));
            }
            pending = Some(PendingSegment { lines: vec![line], in_break });
            continue;
        }

        if content.is_empty() || content.starts_with('#') {
            if content.starts_with(MEDIA_SEQUENCE) && pending.is_none() {
                media_sequence_line = Some(out.len());
            }
            match pending.as_mut() {
                Some(segment) => segment.lines.push(line),
                None => out.push(Cow::Borrowed(line)),
            }
            continue;
        }

        // URI line
        match pending.take() {
            Some(segment) => {
                if segment.in_break || in_break || is_ad_uri(content, config) {
                    removed += 1;
                    if !kept_segment {
                        leading_removed += 1;
                    }
                } else {
                    kept_segment = true;
                    out.extend(segment.lines.into_iter().map(Cow::Borrowed));
                    out.push(Cow::Borrowed(line));
                }
            }
            None => out.push(Cow::Borrowed(line)),
        }
    }

    if let Some(orphan) = pending.take() {
        out.extend(orphan.lines.into_iter().map(Cow::Borrowed));
    }

    if removed == 0 && consumed_directives == 0 {
        return ManifestRewriteResult::unchanged(text);
    }

    if in_break {
        log::debug!("ad break without #EXT-X-CUE-IN ran to the end of the playlist");
    }

    // Keep live playlists aligned: the first remaining segment now carries
    // a later sequence number.
    if leading_removed > 0 {
        if let Some(index) = media_sequence_line {
            if let Some(bumped) = bump_media_sequence(&out[index], leading_removed) {
                out[index] = Cow::Owned(bumped);
            }
        }
    }

    ManifestRewriteResult {
        modified: true,
        body: out.concat(),
        segments_removed: removed,
    }
}

fn is_ad_uri(uri: &str, config: &ManifestConfig) -> bool {
    match extract_host(uri) {
        Some(host) => {
            let host = host.to_ascii_lowercase();
            config.ad_hosts.iter().any(|p| p.matches(&host))
        }
        None => false,
    }
}

fn bump_media_sequence(line: &str, by: usize) -> Option<String> {
    let content = line.trim_end();
    let ending = &line[content.len()..];
    let value: u64 = content.strip_prefix(MEDIA_SEQUENCE)?.trim().parse().ok()?;
    let advanced = value.checked_add(by as u64)?;
    Some(format!("{MEDIA_SEQUENCE}{advanced}{ending}"))
}
