//! Case-insensitive, multi-valued, order-preserving header map with
//! compact/long header name normalization.

use std::collections::HashMap;

/// Compact single-character header aliases, in both directions.
const COMPACT_TO_LONG: &[(&str, &str)] = &[
    ("v", "Via"),
    ("f", "From"),
    ("t", "To"),
    ("i", "Call-ID"),
    ("m", "Contact"),
    ("l", "Content-Length"),
    ("c", "Content-Type"),
    ("e", "Content-Encoding"),
    ("s", "Subject"),
    ("k", "Supported"),
    ("x", "Session-Expires"),
    ("r", "Refer-To"),
    ("b", "Referred-By"),
    ("j", "Reject-Contact"),
    ("a", "Accept-Contact"),
    ("o", "Event"),
    ("u", "Allow-Events"),
    ("d", "Request-Disposition"),
    ("y", "Identity"),
];

fn compact_to_long(name: &str) -> Option<&'static str> {
    COMPACT_TO_LONG
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(name))
        .map(|(_, long)| *long)
}

fn long_to_compact(name: &str) -> Option<&'static str> {
    COMPACT_TO_LONG
        .iter()
        .find(|(_, long)| long.eq_ignore_ascii_case(name))
        .map(|(c, _)| *c)
}

/// Canonicalizes a header name as received on the wire: expands compact
/// aliases to their long form, otherwise preserves the given casing for
/// display purposes while comparisons elsewhere stay case-insensitive.
pub fn canonical_name(name: &str) -> String {
    match compact_to_long(name) {
        Some(long) => long.to_string(),
        None => name.to_string(),
    }
}

/// A single header value slot: most headers carry one value, but `Via`
/// and a handful of others may repeat, and repetition order must survive
/// a round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

impl HeaderValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            HeaderValue::Single(v) => Some(v.as_str()),
            HeaderValue::Multi(v) => v.first().map(|s| s.as_str()),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            HeaderValue::Single(v) => vec![v.as_str()],
            HeaderValue::Multi(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            HeaderValue::Single(existing) => {
                *self = HeaderValue::Multi(vec![existing.clone(), value]);
            }
            HeaderValue::Multi(values) => values.push(value),
        }
    }
}

/// Case-insensitive, insertion-order-preserving, multi-valued header map.
///
/// Keys are stored under their canonical (long) form; lookups accept
/// either the compact alias or the long name. Insertion order of distinct
/// header *names* is preserved for serialization (`Via` is special-cased
/// by the caller to sort first; see [`format_headers`]).
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    order: Vec<String>,
    values: HashMap<String, HeaderValue>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str) -> String {
        canonical_name(name).to_ascii_lowercase()
    }

    /// Inserts a value, appending to an existing header of the same name
    /// rather than overwriting it (mirrors repeated `Via` lines on the
    /// wire).
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let key = Self::key(name);
        let display_name = canonical_name(name);
        if let Some(existing) = self.values.get_mut(&key) {
            existing.push(value.into());
        } else {
            self.order.push(display_name);
            self.values.insert(key, HeaderValue::Single(value.into()));
        }
    }

    /// Replaces all values for `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let key = Self::key(name);
        if !self.values.contains_key(&key) {
            self.order.push(canonical_name(name));
        }
        self.values.insert(key, HeaderValue::Single(value.into()));
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        let key = Self::key(name);
        self.order.retain(|n| Self::key(n) != key);
        self.values.remove(&key)
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.values.get(&Self::key(name))
    }

    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&Self::key(name))
    }

    /// Iterates header names in the canonical order they were first
    /// inserted (before the `Via`-first reordering applied at encode
    /// time).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.order
            .iter()
            .map(move |name| (name.as_str(), self.values.get(&Self::key(name)).unwrap()))
    }

    /// Serializes the map per the wire-format header ordering rule: `Via`
    /// headers first (preserving their original multi-value order), then
    /// every other header in ascending case-insensitive name order.
    /// `compact` emits every aliasable header under its one-character
    /// form regardless of whether it is `Via`.
    pub fn format_headers(&self, compact: bool) -> String {
        let mut lines = Vec::new();

        if let Some(via) = self.get("Via") {
            for v in via.values() {
                lines.push(format_line("Via", v, compact));
            }
        }

        let mut rest: Vec<&str> = self
            .order
            .iter()
            .map(|s| s.as_str())
            .filter(|n| !n.eq_ignore_ascii_case("Via"))
            .collect();
        rest.sort_by_key(|n| n.to_ascii_lowercase());

        for name in rest {
            let value = self.values.get(&Self::key(name)).unwrap();
            for v in value.values() {
                lines.push(format_line(name, v, compact));
            }
        }

        lines.join("\r\n")
    }
}

fn format_line(name: &str, value: &str, compact: bool) -> String {
    let label = if compact {
        long_to_compact(name).unwrap_or(name)
    } else {
        name
    };
    format!("{}: {}", label, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_alias_normalizes_to_long() {
        let mut headers = HeaderMap::new();
        headers.append("v", "SIP/2.0/UDP host;branch=z9hG4bK1");
        headers.append("i", "abc-123");
        assert!(headers.contains("Via"));
        assert!(headers.contains("Call-ID"));
        assert_eq!(headers.get_first("Via"), Some("SIP/2.0/UDP host;branch=z9hG4bK1"));
    }

    #[test]
    fn via_repeats_preserve_order() {
        let mut headers = HeaderMap::new();
        headers.append("Via", "SIP/2.0/UDP a");
        headers.append("Via", "SIP/2.0/UDP b");
        let values = headers.get("Via").unwrap().values();
        assert_eq!(values, vec!["SIP/2.0/UDP a", "SIP/2.0/UDP b"]);
    }

    #[test]
    fn format_headers_sorts_non_via_ascending_with_via_first() {
        let mut headers = HeaderMap::new();
        headers.set("To", "<sip:b@b>");
        headers.set("From", "<sip:a@a>");
        headers.append("Via", "SIP/2.0/UDP a");
        let out = headers.format_headers(false);
        let lines: Vec<&str> = out.split("\r\n").collect();
        assert_eq!(lines[0], "Via: SIP/2.0/UDP a");
        assert_eq!(lines[1], "From: <sip:a@a>");
        assert_eq!(lines[2], "To: <sip:b@b>");
    }

    #[test]
    fn compact_mode_aliases_every_header_not_just_via() {
        let mut headers = HeaderMap::new();
        headers.set("Content-Length", "0");
        headers.set("From", "<sip:a@a>");
        let out = headers.format_headers(true);
        assert!(out.contains("l: 0"));
        assert!(out.contains("f: <sip:a@a>"));
    }
}
