//! Parse HTTP response header lines into Metadata.

use chrono::{DateTime, Utc};

use crate::model::Metadata;

/// Parse collected header lines into Metadata.
///
/// With redirects libcurl reports the headers of every hop; each status line
/// starts a new block, so only the last response's headers survive.
pub(crate) fn parse_headers(lines: &[String], status_code: u32, now: DateTime<Utc>) -> Metadata {
    let mut meta = Metadata::new(status_code, now);

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            meta = Metadata::new(status_code, now);
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            match value.parse::<u64>() {
                Ok(n) => meta.size = Some(n),
                Err(_) => meta.errors.push(format!("bad Content-Length {:?}", value)),
            }
        } else if name.eq_ignore_ascii_case("content-type") {
            meta.mime_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("etag") {
            meta.etag = Some(value.trim_matches('"').to_string());
        } else if name.eq_ignore_ascii_case("last-modified") {
            match parse_http_date(value) {
                Some(t) => meta.last_modified = Some(t),
                None => meta.errors.push(format!("bad Last-Modified {:?}", value)),
            }
        } else if name.eq_ignore_ascii_case("expires") {
            match parse_http_date(value) {
                Some(t) => meta.expires = Some(t),
                None => meta.errors.push(format!("bad Expires {:?}", value)),
            }
        } else if name.eq_ignore_ascii_case("server") {
            meta.server = Some(value.to_string());
        }
    }

    meta
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn parse_headers_typed_fields() {
        let m = parse_headers(
            &lines(&[
                "HTTP/1.1 200 OK",
                "Content-Length: 12345",
                "Content-Type: application/octet-stream",
                "ETag: \"abc-123\"",
                "Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT",
                "Server: nginx",
            ]),
            200,
            now(),
        );
        assert_eq!(m.size, Some(12345));
        assert_eq!(m.mime_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(m.etag.as_deref(), Some("abc-123"));
        assert_eq!(
            m.last_modified,
            Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
        );
        assert_eq!(m.server.as_deref(), Some("nginx"));
        assert!(m.errors.is_empty());
        assert_eq!(m.time_requested, now());
    }

    #[test]
    fn missing_headers_are_absent_not_errors() {
        let m = parse_headers(&lines(&["HTTP/1.1 200 OK"]), 200, now());
        assert!(m.size.is_none());
        assert!(m.etag.is_none());
        assert!(m.errors.is_empty());
    }

    #[test]
    fn unparseable_values_become_soft_errors() {
        let m = parse_headers(
            &lines(&["Content-Length: lots", "Expires: 0", "Last-Modified: yesterday"]),
            200,
            now(),
        );
        assert!(m.size.is_none());
        assert!(m.expires.is_none());
        assert_eq!(m.errors.len(), 3);
    }

    #[test]
    fn redirect_hops_keep_only_final_headers() {
        let m = parse_headers(
            &lines(&[
                "HTTP/1.1 302 Found",
                "Location: /real",
                "ETag: \"hop\"",
                "",
                "HTTP/1.1 200 OK",
                "Content-Length: 7",
            ]),
            200,
            now(),
        );
        assert!(m.etag.is_none());
        assert_eq!(m.size, Some(7));
        assert_eq!(m.status_code, 200);
    }
}
