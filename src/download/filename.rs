//! Filename resolution and sanitization for saved responses.
//!
//! The name comes from the `Content-Disposition` header when it parses, else
//! from the last path segment of the request URL. Either way the result is a
//! single safe path component: never empty, never containing a separator,
//! never `.` or `..`.

use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use tracing::debug;
use url::Url;

/// Name used when neither the header nor the URL yields a usable filename.
pub const DEFAULT_FILENAME: &str = "download.bin";

/// Longest filename kept, in bytes (Linux `NAME_MAX`).
const MAX_FILENAME_BYTES: usize = 255;

/// Longest extension (dot included) preserved when a name is shortened.
const MAX_EXTENSION_BYTES: usize = 16;

/// Derives the on-disk filename for a response to `request_url`.
///
/// Header lookup is case-insensitive (`HeaderMap` normalizes names).
#[must_use]
pub fn resolve_filename(request_url: &str, headers: &HeaderMap) -> String {
    let from_header = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|value| std::str::from_utf8(value.as_bytes()).ok())
        .and_then(parse_content_disposition)
        .and_then(|name| sanitize_filename(&name));

    if let Some(name) = from_header {
        return name;
    }

    debug!(url = request_url, "no usable Content-Disposition filename, using URL path");
    fallback_filename_from_url(request_url)
}

/// Parses a Content-Disposition value and returns its filename parameter.
///
/// Handles:
/// - `attachment; filename="example.pdf"` (quoted, with `\"` escapes)
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example%20file.pdf` (RFC 5987, preferred)
///
/// Returns `None` when the value has no disposition type, no filename
/// parameter, or an empty one.
#[must_use]
pub fn parse_content_disposition(header: &str) -> Option<String> {
    let mut params = split_params(header).into_iter();

    let disposition_type = params.next()?;
    let disposition_type = disposition_type.trim();
    if disposition_type.is_empty() || disposition_type.contains('=') {
        return None;
    }

    let mut plain = None;
    for param in params {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();

        match name.as_str() {
            "filename*" => {
                if let Some(decoded) = decode_ext_value(value).filter(|v| !v.is_empty()) {
                    return Some(decoded);
                }
            }
            "filename" => {
                let unquoted = unquote(value);
                if !unquoted.is_empty() {
                    plain = Some(unquoted);
                }
            }
            _ => {}
        }
    }
    plain
}

/// Splits a header value on `;`, ignoring separators inside quoted strings.
fn split_params(header: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in header.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                current.push(ch);
                in_quotes = !in_quotes;
            }
            ';' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

/// Strips surrounding quotes and resolves backslash escapes.
fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Decodes an RFC 5987 `charset'language'value` parameter.
fn decode_ext_value(value: &str) -> Option<String> {
    let value = unquote(value);
    let (charset, rest) = value.split_once('\'')?;
    let (_language, encoded) = rest.split_once('\'')?;
    if !(charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("us-ascii")) {
        return None;
    }
    urlencoding::decode(encoded).ok().map(|s| s.into_owned())
}

/// Reduces a candidate name to one safe path component.
///
/// Keeps only the last non-trivial segment, replaces reserved and control
/// characters with `_`, trims whitespace and leading/trailing dots, and caps
/// the length. Returns `None` if nothing usable remains.
#[must_use]
pub fn sanitize_filename(name: &str) -> Option<String> {
    let segment = name
        .rsplit(['/', '\\'])
        .map(str::trim)
        .find(|s| !s.is_empty() && *s != "." && *s != "..")?;

    let replaced: String = segment
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = trim_name(&replaced);
    if trimmed.is_empty() {
        return None;
    }
    Some(cap_length(trimmed))
}

fn trim_name(name: &str) -> &str {
    name.trim_matches(|c: char| c == '.' || c.is_whitespace())
}

/// Longest prefix of `s` that fits in `max` bytes and ends on a char boundary.
fn truncate_bytes(s: &str, max: usize) -> &str {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Caps `name` at [`MAX_FILENAME_BYTES`], shortening the stem so a short
/// extension survives. The cut never leaves a trailing dot or space.
fn cap_length(name: &str) -> String {
    if name.len() <= MAX_FILENAME_BYTES {
        return name.to_string();
    }

    if let Some(dot) = name.rfind('.')
        && dot > 0
        && name.len() - dot <= MAX_EXTENSION_BYTES
    {
        let (stem, extension) = name.split_at(dot);
        let stem = trim_name(truncate_bytes(stem, MAX_FILENAME_BYTES - extension.len()));
        if !stem.is_empty() {
            return format!("{stem}{extension}");
        }
    }

    trim_name(truncate_bytes(name, MAX_FILENAME_BYTES)).to_string()
}

/// Filename from the last path segment of `url`, or [`DEFAULT_FILENAME`].
///
/// A query string is kept (`download.php?id=5` becomes `download.php_id=5`)
/// so that templates varying only in the query map to distinct files.
#[must_use]
pub fn fallback_filename_from_url(url: &str) -> String {
    let (segment, query) = match Url::parse(url) {
        Ok(parsed) => {
            let segment = parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(|s| {
                    urlencoding::decode(s)
                        .map(|d| d.into_owned())
                        .unwrap_or_else(|_| s.to_string())
                });
            (segment, parsed.query().map(str::to_string))
        }
        Err(_) => {
            let without_fragment = url.split('#').next().unwrap_or(url);
            let (path, query) = match without_fragment.split_once('?') {
                Some((path, query)) => (path, Some(query.to_string())),
                None => (without_fragment, None),
            };
            (path.rsplit('/').next().map(str::to_string), query)
        }
    };

    let candidate = match (segment, query.filter(|q| !q.is_empty())) {
        // Separators inside the query must not turn it into a directory component.
        (segment, Some(query)) => format!(
            "{}?{}",
            segment.unwrap_or_default(),
            query.replace(['/', '\\'], "_")
        ),
        (segment, None) => segment.unwrap_or_default(),
    };

    sanitize_filename(&candidate).unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}
