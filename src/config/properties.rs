//! Property value parsing
//!
//! List-valued keys accept either a comma-separated string (the properties
//! file form) or a native list (the TOML form). Translation entries are
//! `from:to` pairs split at the first colon not escaped as `\:`.

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use tracing::warn;

/// Split a comma-separated list, trimming entries and dropping empty ones
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn unescape(value: &str) -> String {
    value.replace("\\:", ":").trim().to_string()
}

/// Split one `from:to` entry at the first unescaped colon
pub fn split_pair(entry: &str) -> Option<(String, String)> {
    let bytes = entry.as_bytes();
    let pos = (0..bytes.len()).find(|&i| bytes[i] == b':' && (i == 0 || bytes[i - 1] != b'\\'))?;

    let from = unescape(&entry[..pos]);
    let to = unescape(&entry[pos + 1..]);
    if from.is_empty() || to.is_empty() {
        return None;
    }
    Some((from, to))
}

/// Parse a comma-separated list of `from:to` pairs, skipping malformed entries
pub fn parse_pairs(value: &str) -> Vec<(String, String)> {
    split_list(value)
        .into_iter()
        .filter_map(|entry| {
            let pair = split_pair(&entry);
            if pair.is_none() {
                warn!("Ignoring topic translation without 'from:to' form: '{}'", entry);
            }
            pair
        })
        .collect()
}

/// Deserialize a comma-separated string or a list of strings
pub fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a comma-separated string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(split_list(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(vec![value.to_string()])
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(vec![value.to_string()])
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut items = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                items.extend(split_list(&item));
            }
            Ok(items)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

/// Deserialize translation pairs from a string, a list of `from:to`
/// strings, or a table of `from = "to"` entries
pub fn deserialize_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("comma-separated 'from:to' pairs, a list of them, or a table")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(parse_pairs(value))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut pairs = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                pairs.extend(parse_pairs(&item));
            }
            Ok(pairs)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut pairs = Vec::new();
            while let Some((from, to)) = map.next_entry::<String, String>()? {
                pairs.push((from, to));
            }
            // Tables carry no order; keep the result deterministic
            pairs.sort();
            Ok(pairs)
        }
    }

    deserializer.deserialize_any(PairsVisitor)
}

/// Deserialize an optional string, treating blank values as absent
pub fn deserialize_non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("test1,test2", &["test1", "test2"] ; "two topics")]
    #[test_case(" a , b ,, c ", &["a", "b", "c"] ; "trims and skips empties")]
    #[test_case("", &[] ; "empty")]
    #[test_case("single", &["single"] ; "single topic")]
    fn test_split_list(input: &str, expected: &[&str]) {
        assert_eq!(split_list(input), expected);
    }

    #[test]
    fn test_parse_pairs_with_escaped_colon() {
        let pairs = parse_pairs(r"ktest:stest,ktwo:s/two\:fluff");
        assert_eq!(
            pairs,
            vec![
                ("ktest".to_string(), "stest".to_string()),
                ("ktwo".to_string(), "s/two:fluff".to_string()),
            ]
        );
    }

    #[test]
    fn test_escaped_colon_in_source() {
        assert_eq!(
            split_pair(r"a\:b:c"),
            Some(("a:b".to_string(), "c".to_string()))
        );
    }

    #[test]
    fn test_splits_at_first_unescaped_colon() {
        assert_eq!(
            split_pair("a:b:c"),
            Some(("a".to_string(), "b:c".to_string()))
        );
    }

    #[test_case("nocolon" ; "no colon")]
    #[test_case(":dest" ; "empty source")]
    #[test_case("src:" ; "empty destination")]
    #[test_case(r"only\:escaped" ; "escaped colon only")]
    fn test_malformed_pairs_are_skipped(entry: &str) {
        assert_eq!(split_pair(entry), None);
        assert!(parse_pairs(entry).is_empty());
    }
}
