//! Markup text utilities
//!
//! The string helpers templates lean on: HTML escaping, URL auto-linking,
//! truncation, word capitalization, conditional class lists, and ISO-8601
//! date handling. Consumed by the escape tag, the expression filters, and
//! host code hooks.
//!
//! Escaping is not double-escape protected: calling [`escape`] on already
//! escaped text escapes the entities again. Pair with [`de_escape`] when
//! round-tripping.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Escaped and unescaped forms of the special characters, in replacement order.
/// `&` must come first so entity ampersands aren't escaped twice in one pass.
const SPECIAL: &[(&str, &str)] = &[
    ("&", "&amp;"),
    ("<", "&lt;"),
    (">", "&gt;"),
    ("'", "&#39;"),
    ("\"", "&quot;"),
    ("\u{2026}", "&hellip;"),
];

/// Replace markup-significant characters with HTML entities.
pub fn escape(s: &str) -> String {
    let mut out = s.to_string();
    for (plain, entity) in SPECIAL {
        out = out.replace(plain, entity);
    }
    out
}

/// Reverse [`escape`].
pub fn de_escape(s: &str) -> String {
    let mut out = s.to_string();
    // Reverse order so `&amp;` unescapes last and can't create new entities
    for (plain, entity) in SPECIAL.iter().rev() {
        out = out.replace(entity, plain);
    }
    out
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(https?://)?([0-9A-Za-z][0-9A-Za-z\-.]*)[0-9A-Za-z](\.com\.br|\.com|\.org|\.net|\.edu|\.mil|\.gov|\.cc|\.me|\.cn|\.ly|\.io|\.fm|\.co|\.uk|\.ca|\.be|\.jp|\.pe|\.kr|\.lu|\.us)(/?[0-9A-Za-z\-_.?=&#/;%:+(]+[0-9A-Za-z/])?",
        )
        .expect("url pattern compiles")
    })
}

/// Replace URLs in `s` with anchor tags.
///
/// `dont_replace` lists substrings whose matches are left alone. If combined
/// with [`escape`], escape first, then urlize.
pub fn urlize(s: &str, dont_replace: &[&str]) -> String {
    let mut out = String::new();
    let mut rest = s;

    for m in url_re().find_iter(s) {
        let link = m.as_str();
        if dont_replace.iter().any(|safe| link.contains(safe)) {
            continue;
        }
        // Matches arrive in order, so the link is present in the tail
        let Some(at) = rest.find(link) else { continue };
        let prefix = if link.starts_with("http") {
            ""
        } else {
            "http://"
        };
        out.push_str(&rest[..at]);
        out.push_str("<a target=\"_blank\" title=\"");
        out.push_str(link);
        out.push_str("\" href=\"");
        out.push_str(prefix);
        out.push_str(link);
        out.push_str("\">");
        out.push_str(&truncate(link, 80, false));
        out.push_str("</a>");
        rest = &rest[at + link.len()..];
    }

    out.push_str(rest); // the tail
    out
}

/// Escape, urlize, and convert newlines to `<br />`. One stop shopping for
/// spitting out user-provided content.
pub fn enrich(s: &str) -> String {
    let s = escape(s);
    let s = urlize(&s, &[]);
    s.replace('\n', "<br />")
}

/// Truncate `s` to `length` characters, appending an ellipsis when the
/// original was longer. Optionally escape the result.
pub fn truncate(s: &str, length: usize, escape_result: bool) -> String {
    let count = s.chars().count();
    let out = if count > length {
        let cut: String = s.chars().take(length.saturating_sub(1)).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    };
    if escape_result {
        escape(&out)
    } else {
        out
    }
}

/// Capitalize the first letter of every space-separated word.
pub fn capitalize(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build a space-separated list of the class names whose condition is true.
/// With `include_attr`, wrap the list in `class="…"`; an empty list stays
/// empty either way.
pub fn class_list(options: &[(&str, bool)], include_attr: bool) -> String {
    let classes: Vec<&str> = options
        .iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| *name)
        .collect();

    if classes.is_empty() {
        return String::new();
    }

    if include_attr {
        format!("class=\"{}\"", classes.join(" "))
    } else {
        classes.join(" ")
    }
}

/// Parse an ISO-8601 date string, accepting anything from a bare year to a
/// full offset datetime. Partial dates resolve at the start of their period,
/// in UTC.
pub fn parse_iso(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(utc(naive));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(utc);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(utc);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01-01"), "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(utc);
    }
    None
}

fn utc(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    Utc.from_utc_datetime(&naive).fixed_offset()
}

/// Format a datetime as an ISO-8601 string with millisecond precision.
pub fn to_iso(dt: &DateTime<FixedOffset>) -> String {
    dt.with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape("<script>alert('xss')</script>"),
            "&lt;script&gt;alert(&#39;xss&#39;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_escape_then_de_escape() {
        let original = "a < b & \"c\"";
        assert_eq!(de_escape(&escape(original)), original);
    }

    #[test]
    fn test_escape_is_not_idempotent() {
        // Escaping escaped text escapes the entity ampersands again
        assert_eq!(escape(&escape("&")), "&amp;amp;");
    }

    #[test]
    fn test_urlize_plain_domain() {
        let out = urlize("see example.com for more", &[]);
        assert!(out.contains("href=\"http://example.com\""));
        assert!(out.starts_with("see <a "));
        assert!(out.ends_with("</a> for more"));
    }

    #[test]
    fn test_urlize_keeps_http_prefix() {
        let out = urlize("https://example.org/x", &[]);
        assert!(out.contains("href=\"https://example.org/x\""));
    }

    #[test]
    fn test_urlize_dont_replace() {
        let input = "go to example.com now";
        assert_eq!(urlize(input, &["example.com"]), input);
    }

    #[test]
    fn test_enrich_newlines() {
        assert_eq!(enrich("a\nb"), "a<br />b");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10, false), "hello");
        assert_eq!(truncate("hello world", 6, false), "hello\u{2026}");
    }

    #[test]
    fn test_capitalize_every_word() {
        assert_eq!(capitalize("hello brave world"), "Hello Brave World");
    }

    #[test]
    fn test_class_list() {
        assert_eq!(
            class_list(&[("one", true), ("two", false), ("three", true)], false),
            "one three"
        );
        assert_eq!(
            class_list(&[("one", false), ("two", false), ("three", false)], false),
            ""
        );
        assert_eq!(
            class_list(&[("one", true), ("two", false), ("three", true)], true),
            "class=\"one three\""
        );
        assert_eq!(
            class_list(&[("one", false), ("two", false), ("three", false)], true),
            ""
        );
    }

    #[test]
    fn test_parse_iso_date_only() {
        let d = parse_iso("1999-01-03").unwrap();
        assert_eq!(d.year(), 1999);
        assert_eq!(d.month(), 1);
        assert_eq!(d.day(), 3);
    }

    #[test]
    fn test_parse_iso_epoch() {
        let d = parse_iso("1970-01-01").unwrap();
        assert_eq!(d.year(), 1970);
        assert_eq!(d.timestamp(), 0);
    }

    #[test]
    fn test_parse_iso_full() {
        use chrono::Timelike;
        let d = parse_iso("2024-06-01T12:30:00Z").unwrap();
        assert_eq!(d.hour(), 12);
        assert_eq!(d.minute(), 30);
    }

    #[test]
    fn test_iso_round_trip() {
        let d = parse_iso("2024-06-01T12:30:00Z").unwrap();
        assert_eq!(to_iso(&d), "2024-06-01T12:30:00.000Z");
    }
}
