use std::ops::Range;

use crate::title::normalize_title;

/// Tags whose content is never treated as wikitext.
const MASKED_TAGS: &[&str] = &["nowiki", "pre", "syntaxhighlight", "source"];

/// One `[[...]]` occurrence with its byte span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiLink {
    /// Offset of the opening `[[`.
    pub start: usize,
    /// Offset just past the closing `]]` and the link trail.
    pub end: usize,
    /// Target as written, including any section, without leading colons.
    pub target: String,
    /// Normalized target title; empty for same-page anchors like `[[#History]]`.
    pub title: String,
    pub section: Option<String>,
    pub label: Option<String>,
    pub trail: String,
    pub leading_colon: bool,
}

impl WikiLink {
    /// Text a reader sees when the link is rendered, without the trail.
    pub fn display_text(&self) -> &str {
        match self.label.as_deref() {
            Some(label) if !label.trim().is_empty() => label,
            _ => &self.target,
        }
    }

    pub fn markup<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Scan `content` for wikilinks, skipping comments and verbatim regions.
/// When a link is opened inside another link's label (image captions), the
/// innermost link wins.
pub fn extract_wikilinks(content: &str) -> Vec<WikiLink> {
    let masked = masked_regions(content);
    let bytes = content.as_bytes();
    let mut out = Vec::new();
    let mut cursor = 0usize;

    while cursor + 1 < bytes.len() {
        if let Some(region) = masked.iter().find(|region| region.contains(&cursor)) {
            cursor = region.end;
            continue;
        }
        if bytes[cursor] == b'[' && bytes[cursor + 1] == b'[' {
            let start = cursor;
            let inner_start = cursor + 2;
            let mut end = inner_start;
            let mut nested = None;
            while end + 1 < bytes.len() {
                if bytes[end] == b']' && bytes[end + 1] == b']' {
                    break;
                }
                if bytes[end] == b'[' && bytes[end + 1] == b'[' {
                    nested = Some(end);
                    break;
                }
                end += 1;
            }
            if let Some(nested_start) = nested {
                cursor = nested_start;
                continue;
            }
            if end + 1 >= bytes.len() {
                break;
            }

            let close = end + 2;
            let trail_len = bytes[close..]
                .iter()
                .take_while(|byte| byte.is_ascii_lowercase())
                .count();
            let link_end = close + trail_len;
            if let Some(link) = parse_wikilink(
                start,
                link_end,
                &content[inner_start..end],
                &content[close..link_end],
            ) {
                out.push(link);
            }
            cursor = link_end;
            continue;
        }
        cursor += 1;
    }

    out
}

fn parse_wikilink(start: usize, end: usize, inner: &str, trail: &str) -> Option<WikiLink> {
    let (target_part, label) = match inner.split_once('|') {
        Some((target, label)) => (target, Some(label.to_string())),
        None => (inner, None),
    };
    if target_part.contains('\n') {
        return None;
    }
    let mut target = target_part.trim();
    if target.is_empty() || target.contains(['{', '}', '<', '>', '[', ']']) {
        return None;
    }

    let mut leading_colon = false;
    while let Some(stripped) = target.strip_prefix(':') {
        leading_colon = true;
        target = stripped.trim_start();
    }
    if target.is_empty() {
        return None;
    }
    if target.starts_with("http://") || target.starts_with("https://") || target.starts_with("//")
    {
        return None;
    }

    let (title_part, section) = match target.split_once('#') {
        Some((title_part, section)) => (title_part, Some(section.trim().to_string())),
        None => (target, None),
    };

    Some(WikiLink {
        start,
        end,
        target: target.to_string(),
        title: normalize_title(title_part),
        section,
        label,
        trail: trail.to_string(),
        leading_colon,
    })
}

/// Byte ranges covered by comments and verbatim tags. Unterminated regions
/// run to the end of the text.
pub fn masked_regions(content: &str) -> Vec<Range<usize>> {
    let lower = content.to_ascii_lowercase();
    let mut regions = Vec::new();
    let mut cursor = 0usize;

    while let Some(offset) = lower[cursor..].find('<') {
        let start = cursor + offset;
        let rest = &lower[start..];

        if let Some(body) = rest.strip_prefix("<!--") {
            let end = body
                .find("-->")
                .map(|position| start + 4 + position + 3)
                .unwrap_or(lower.len());
            regions.push(start..end);
            cursor = end;
            continue;
        }

        if let Some(tag) = MASKED_TAGS.iter().find(|tag| opens_tag(rest, tag)) {
            let open_end = rest
                .find('>')
                .map(|position| start + position + 1)
                .unwrap_or(lower.len());
            if lower[..open_end].ends_with("/>") {
                regions.push(start..open_end);
                cursor = open_end;
                continue;
            }
            let closing = format!("</{tag}>");
            let end = lower[open_end..]
                .find(&closing)
                .map(|position| open_end + position + closing.len())
                .unwrap_or(lower.len());
            regions.push(start..end);
            cursor = end;
            continue;
        }

        cursor = start + 1;
    }

    regions
}

fn opens_tag(rest: &str, tag: &str) -> bool {
    rest.strip_prefix('<')
        .and_then(|value| value.strip_prefix(tag))
        .and_then(|value| value.chars().next())
        .is_some_and(|next| next == '>' || next == '/' || next.is_whitespace())
}
