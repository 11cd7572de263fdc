//! Repair of malformed php-fpm status payloads.
//!
//! php-fpm copies the request URI of every worker verbatim into the `full`
//! JSON status page. A URI that contains `"` or control characters therefore
//! breaks the whole document. Every `"request uri"` value is re-encoded as a
//! proper JSON string before the payload is handed to serde.

use once_cell::sync::Lazy;
use regex::bytes::{Captures, Regex};
use std::borrow::Cow;

/// Non-greedy: the value ends at the first `","content length":` after it.
static REQUEST_URI_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?-u),"request uri":"(.*?)","content length":"#)
        .expect("request uri pattern is a valid regex")
});

/// Returns `true` if `inner` is already a well-formed JSON string body.
fn is_valid_string_body(inner: &[u8]) -> bool {
    let mut quoted = Vec::with_capacity(inner.len() + 2);
    quoted.push(b'"');
    quoted.extend_from_slice(inner);
    quoted.push(b'"');
    serde_json::from_slice::<String>(&quoted).is_ok()
}

fn rewrite_field(caps: &Captures<'_>) -> Vec<u8> {
    let inner = &caps[1];
    if is_valid_string_body(inner) {
        return caps[0].to_vec();
    }

    let uri = String::from_utf8_lossy(inner).into_owned();
    let encoded = serde_json::Value::String(uri).to_string();

    let mut out = Vec::with_capacity(encoded.len() + 36);
    out.extend_from_slice(br#","request uri":"#);
    out.extend_from_slice(encoded.as_bytes());
    out.extend_from_slice(br#","content length":"#);
    out
}

/// Re-encodes every malformed `"request uri"` value in `content`.
///
/// Values that already form a valid JSON string are left untouched, so the
/// result equals the input whenever no repair was needed and applying the
/// function twice yields the same bytes as applying it once.
pub fn repair_payload(content: &[u8]) -> Cow<'_, [u8]> {
    REQUEST_URI_FIELD.replace_all(content, rewrite_field)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROKEN: &str = r##"{"processes":[{"pid":1,"request uri":"/vbseo.php?x=|%20echo%20"Content-Type:%20text%2Fhtml"%3Becho%20""%20%3B%20id%00","content length":0,"user":"-"}]}"##;

    #[test]
    fn test_repairs_unescaped_quotes() {
        let repaired = repair_payload(BROKEN.as_bytes());
        let value: serde_json::Value = serde_json::from_slice(&repaired).unwrap();
        assert_eq!(
            value["processes"][0]["request uri"],
            r#"/vbseo.php?x=|%20echo%20"Content-Type:%20text%2Fhtml"%3Becho%20""%20%3B%20id%00"#
        );
        assert_eq!(value["processes"][0]["user"], "-");
    }

    #[test]
    fn test_valid_payload_is_unchanged() {
        let valid = r#"{"processes":[{"pid":1,"request uri":"/status?json&full","content length":0},{"pid":2,"request uri":"/a\"b\\c","content length":0}]}"#;
        let repaired = repair_payload(valid.as_bytes());
        assert_eq!(repaired.as_ref(), valid.as_bytes());
    }

    #[test]
    fn test_repair_is_idempotent() {
        let once = repair_payload(BROKEN.as_bytes()).into_owned();
        let twice = repair_payload(&once).into_owned();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_repairs_control_characters_and_backslashes() {
        let broken = "{\"processes\":[{\"pid\":1,\"request uri\":\"/a\tb\\q\",\"content length\":0}]}";
        let repaired = repair_payload(broken.as_bytes());
        let value: serde_json::Value = serde_json::from_slice(&repaired).unwrap();
        assert_eq!(value["processes"][0]["request uri"], "/a\tb\\q");
    }

    #[test]
    fn test_each_worker_is_repaired_independently() {
        let doc = r#"{"processes":[{"pid":1,"request uri":"/one"x","content length":0},{"pid":2,"request uri":"/ok","content length":1},{"pid":3,"request uri":"/two"y","content length":2}]}"#;
        let repaired = repair_payload(doc.as_bytes());
        let value: serde_json::Value = serde_json::from_slice(&repaired).unwrap();
        assert_eq!(value["processes"][0]["request uri"], r#"/one"x"#);
        assert_eq!(value["processes"][1]["request uri"], "/ok");
        assert_eq!(value["processes"][2]["request uri"], r#"/two"y"#);
        assert_eq!(value["processes"][2]["content length"], 2);
    }
}
