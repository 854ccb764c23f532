//! Byte-level JSON access helpers on top of `sonic_rs` lazy values. The
//! resolver splices raw JSON fragments between buffers and only ever parses
//! the pieces a plan node actually points at.

use sonic_rs::LazyValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JsonKind {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Null,
    Unknown,
}

/// Classifies a raw JSON fragment by its first meaningful byte.
pub(crate) fn kind_of(raw: &[u8]) -> JsonKind {
    let first = raw.iter().find(|b| !b.is_ascii_whitespace());
    match first {
        Some(b'{') => JsonKind::Object,
        Some(b'[') => JsonKind::Array,
        Some(b'"') => JsonKind::String,
        Some(b't') | Some(b'f') => JsonKind::Boolean,
        Some(b'n') => JsonKind::Null,
        Some(b) if b.is_ascii_digit() || *b == b'-' => JsonKind::Number,
        _ => JsonKind::Unknown,
    }
}

/// Lazy value at `path`, `None` when the document is empty, the path is
/// missing, or the input is not valid JSON. Callers keep the returned value
/// alive while borrowing its raw slice.
pub(crate) fn get_value<'a, S: AsRef<str>>(data: &'a [u8], path: &[S]) -> Option<LazyValue<'a>> {
    if data.is_empty() || path.is_empty() {
        return None;
    }
    sonic_rs::get(data, path.iter().map(|s| s.as_ref())).ok()
}

/// Raw fragment of `value` with the outer quotes stripped for strings. This
/// matches the shape template variables and nested object lookups expect:
/// string payloads are spliced into positions that provide their own quoting.
pub(crate) fn unquoted<'l>(value: &'l LazyValue<'_>) -> &'l str {
    string_content(value.as_raw_str())
}

pub(crate) fn string_content(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(raw)
}

/// Collects the raw elements of a JSON array fragment. Anything that is not
/// an array yields no elements.
pub(crate) fn array_elements(raw: &str) -> Vec<LazyValue<'_>> {
    sonic_rs::to_array_iter(raw).flatten().collect()
}
