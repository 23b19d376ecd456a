//! Canonical tag strings.
//!
//! Tags are stored and compared as strings, so two writers describing the
//! same series must render byte-identical text. Rendering goes through a
//! `BTreeMap` (sorted keys) serialized as a compact JSON object; the empty
//! map renders to the empty string.

use std::collections::BTreeMap;

/// Render a tag map to its canonical string form.
pub fn canonical(tags: &BTreeMap<String, String>) -> String {
    if tags.is_empty() {
        return String::new();
    }
    // BTreeMap serializes in key order, which is what makes this stable.
    serde_json::to_string(tags).unwrap_or_default()
}

/// Single-tag convenience for the common `{"core":"3"}` style series.
pub fn single(key: &str, value: &str) -> String {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), value.to_string());
    canonical(&map)
}

/// Two-tag convenience, e.g. `{"device":"sda1","mount":"/"}`.
pub fn pair(k1: &str, v1: &str, k2: &str, v2: &str) -> String {
    let mut map = BTreeMap::new();
    map.insert(k1.to_string(), v1.to_string());
    map.insert(k2.to_string(), v2.to_string());
    canonical(&map)
}

/// Parse a canonical tag string back into a map. The empty string parses
/// to the empty map.
pub fn parse(tags: &str) -> BTreeMap<String, String> {
    if tags.is_empty() {
        return BTreeMap::new();
    }
    serde_json::from_str(tags).unwrap_or_default()
}
