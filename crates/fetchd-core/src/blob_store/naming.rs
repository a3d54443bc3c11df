//! File names for stored payloads, taken from the download URL.

/// Used when the URL has no usable last path segment.
const FALLBACK_NAME: &str = "payload";

/// Sanitized last path segment of `url`, or a fixed fallback name.
pub fn blob_file_name(url: &str) -> String {
    filename_from_url_path(url)
        .map(|s| sanitize_file_name(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path().split('/').filter(|s| !s.is_empty()).last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}

/// Makes a candidate file name safe on Linux.
///
/// Separators, control characters and whitespace become a single `_`;
/// leading/trailing dots, spaces and underscores are trimmed; the result is
/// capped at 255 bytes (NAME_MAX) less room for the staging suffix.
pub fn sanitize_file_name(name: &str) -> String {
    const NAME_MAX: usize = 255 - super::TEMP_SUFFIX.len();

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let c = if c == '/' || c == '\\' || c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut take = trimmed.len().min(NAME_MAX);
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}
