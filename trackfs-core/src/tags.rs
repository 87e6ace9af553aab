//! `[AMBIENT]` case-insensitive, multi-valued tag dictionary (spec §3, §4.D).
//!
//! Vorbis comment keys are conventionally uppercase and compared
//! case-insensitively (`ARTIST` == `artist`); we store keys upper-cased so
//! lookups and inserts agree regardless of how the caller wrote them.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    values: BTreeMap<String, Vec<String>>,
}

fn normalize(key: &str) -> String {
    key.to_ascii_uppercase()
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.values.get(&normalize(key)).map(Vec::as_slice)
    }

    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&normalize(key))
    }

    /// Replace all values for `key`.
    pub fn set(&mut self, key: &str, values: Vec<String>) {
        if values.is_empty() {
            self.values.remove(&normalize(key));
        } else {
            self.values.insert(normalize(key), values);
        }
    }

    pub fn set_one(&mut self, key: &str, value: impl Into<String>) {
        self.set(key, vec![value.into()]);
    }

    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .entry(normalize(key))
            .or_default()
            .push(value.into());
    }

    /// Set `key` to `values` only if `key` currently has no values.
    pub fn fill_if_absent(&mut self, key: &str, values: Vec<String>) {
        if !self.contains(key) {
            self.set(key, values);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(&normalize(key));
    }

    /// Drop every key matching `pattern`, or whose sole/any value contains a newline.
    pub fn remove_matching(&mut self, pattern: &regex::Regex) {
        self.values
            .retain(|key, vals| !pattern.is_match(key) && !vals.iter().any(|v| v.contains('\n')));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Split a cue `PERFORMER`/`SONGWRITER` value on `;`, trimming surrounding
/// whitespace from each part (spec §4.B).
pub fn split_multivalue(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_round_trip() {
        let mut tags = TagMap::new();
        tags.set_one("Artist", "Alice");
        assert_eq!(tags.get_first("ARTIST"), Some("Alice"));
        assert_eq!(tags.get_first("artist"), Some("Alice"));
    }

    #[test]
    fn fill_if_absent_never_overwrites() {
        let mut tags = TagMap::new();
        tags.set_one("ALBUM", "Live");
        tags.fill_if_absent("ALBUM", vec!["Other".into()]);
        assert_eq!(tags.get_first("ALBUM"), Some("Live"));
    }

    #[test]
    fn remove_matching_drops_newline_values() {
        let mut tags = TagMap::new();
        tags.set_one("COMMENT", "fine");
        tags.set_one("CUESHEET", "line one\nline two");
        tags.set_one("CUE_TRACK00_MSF", "00:00:00");
        let ignore = regex::Regex::new(r"(?i)CUE_TRACK.*|COMMENT").unwrap();
        tags.remove_matching(&ignore);
        assert!(tags.get("COMMENT").is_none());
        assert!(tags.get("CUE_TRACK00_MSF").is_none());
        assert!(tags.get("CUESHEET").is_none(), "multi-line value dropped");
    }

    #[test]
    fn split_multivalue_trims_and_drops_empty() {
        assert_eq!(
            split_multivalue("Bob ; Carol ;; Dee"),
            vec!["Bob".to_string(), "Carol".to_string(), "Dee".to_string()]
        );
    }
}
