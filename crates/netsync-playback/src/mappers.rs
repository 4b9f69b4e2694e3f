//! Record-to-row mapping (C4): timestamp parsing, facets serialisation, and
//! subject-URI parsing for the like-count path.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Fallback formats tried, in order, after RFC3339 fails. Mirrors the set of
/// shapes `dateparse.ParseAny` accepts in the original implementation for
/// AT Protocol timestamps in the wild: RFC3339 without a UTC offset, and a
/// plain space-separated date-time.
const FALLBACK_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

/// Date-only format, treated as midnight UTC. `dateparse.ParseAny` accepts
/// this shape in the original implementation; `NaiveDateTime` can't parse it
/// directly since it has no time component, so it gets its own branch.
const DATE_ONLY_FORMAT: &str = "%Y-%m-%d";

/// Parses a record's `createdAt` string leniently. Returns `None` on
/// unparseable input, per invariant 4 (skip the record, don't fail the
/// archive).
pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in FALLBACK_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, DATE_ONLY_FORMAT) {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Some(DateTime::from_naive_utc_and_offset(midnight, Utc));
        }
    }

    None
}

/// Serialises a post's optional facets to their canonical JSON string, or an
/// empty string when absent — matching the original's `""` sentinel for "no
/// facets" rather than storing a JSON `null`.
pub fn facets_to_string(facets: &Option<serde_json::Value>) -> String {
    match facets {
        Some(value) => serde_json::to_string(value).unwrap_or_default(),
        None => String::new(),
    }
}

/// The three path segments of an `at://` URI: the repo DID, the collection
/// NSID, and the record key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUriParts<'a> {
    pub did: &'a str,
    pub nsid: &'a str,
    pub rkey: &'a str,
}

/// Parses an `at://did/nsid/rkey` subject URI into its three parts. Returns
/// `None` for anything that doesn't split into exactly three non-empty
/// segments after the `at://` prefix, matching the original's
/// trim-and-split-on-`/` check before it attempts the counter update.
pub fn parse_at_uri(uri: &str) -> Option<AtUriParts<'_>> {
    let rest = uri.strip_prefix("at://")?;
    let mut parts = rest.splitn(3, '/');
    let did = parts.next()?;
    let nsid = parts.next()?;
    let rkey = parts.next()?;
    if did.is_empty() || nsid.is_empty() || rkey.is_empty() {
        return None;
    }
    // splitn(3, ..) leaves any further '/' inside rkey untouched, but a
    // well-formed subject URI never has one past the third segment; reject
    // anything that does rather than silently truncating.
    if rkey.contains('/') {
        return None;
    }
    Some(AtUriParts { did, nsid, rkey })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        let dt = parse_created_at("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-15T10:30:00+00:00");
    }

    #[test]
    fn parses_rfc3339_without_offset_as_fallback() {
        assert!(parse_created_at("2024-01-15T10:30:00.123").is_some());
    }

    #[test]
    fn parses_date_only_as_midnight_utc() {
        let dt = parse_created_at("2024-05-01").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-05-01T00:00:00+00:00");
    }

    #[test]
    fn rejects_garbage_timestamp() {
        assert!(parse_created_at("not-a-date").is_none());
    }

    #[test]
    fn facets_absent_is_empty_string() {
        assert_eq!(facets_to_string(&None), "");
    }

    #[test]
    fn facets_present_round_trips_as_json() {
        let value = serde_json::json!({"index": {"byteStart": 0, "byteEnd": 5}});
        let s = facets_to_string(&Some(value.clone()));
        let parsed: serde_json::Value = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn parses_well_formed_at_uri() {
        let parts = parse_at_uri("at://did:plc:abc/app.bsky.feed.post/xyz").unwrap();
        assert_eq!(parts.did, "did:plc:abc");
        assert_eq!(parts.nsid, "app.bsky.feed.post");
        assert_eq!(parts.rkey, "xyz");
    }

    #[test]
    fn rejects_uri_missing_prefix() {
        assert!(parse_at_uri("did:plc:abc/app.bsky.feed.post/xyz").is_none());
    }

    #[test]
    fn rejects_uri_with_wrong_segment_count() {
        assert!(parse_at_uri("at://did:plc:abc/app.bsky.feed.post").is_none());
    }
}
