//! Filename derivation and sanitization for downloaded page images.

use std::path::{Component, Path};

use url::Url;

/// Sanitizes a filename by replacing invalid characters.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Filename for a page image: the last path segment of its URL.
///
/// The segment is percent-decoded and sanitized. Returns `fallback` when the
/// URL has no usable last segment.
#[must_use]
pub fn filename_from_url(url: &Url, fallback: &str) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
        return sanitize_filename(&decoded);
    }
    sanitize_filename(fallback)
}
