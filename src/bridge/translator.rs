//! Topic Translation
//!
//! Directional mapping from source topic names to destination topic names.
//! Topics without an entry pass through unchanged.

use ahash::AHashMap;

/// Maps topic names for one forwarding direction
#[derive(Debug, Clone, Default)]
pub struct TopicTranslator {
    table: AHashMap<String, String>,
}

impl TopicTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(from, to)` pairs; a repeated `from` keeps the last `to`
    pub fn from_pairs<I, F, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (F, T)>,
        F: Into<String>,
        T: Into<String>,
    {
        let table = pairs
            .into_iter()
            .map(|(from, to)| (from.into(), to.into()))
            .collect();
        Self { table }
    }

    /// Destination topic for `topic`, or `topic` itself when unmapped
    #[inline]
    pub fn translate<'a>(&'a self, topic: &'a str) -> &'a str {
        self.table.get(topic).map(String::as_str).unwrap_or(topic)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("a", "b" ; "mapped")]
    #[test_case("b", "b" ; "destination is not a source")]
    #[test_case("z", "z" ; "unmapped is identity")]
    #[test_case("", "" ; "empty topic")]
    fn test_translate(topic: &str, expected: &str) {
        let translator = TopicTranslator::from_pairs([("a", "b")]);
        assert_eq!(translator.translate(topic), expected);
    }

    #[test]
    fn test_last_pair_wins() {
        let translator = TopicTranslator::from_pairs([("orders", "Q1"), ("orders", "Q2")]);
        assert_eq!(translator.len(), 1);
        assert_eq!(translator.translate("orders"), "Q2");
    }

    #[test]
    fn test_empty_is_identity() {
        let translator = TopicTranslator::new();
        assert!(translator.is_empty());
        assert_eq!(translator.translate("anything/at/all"), "anything/at/all");
    }

    #[test]
    fn test_names_are_exact() {
        let translator = TopicTranslator::from_pairs(vec![
            ("s/two:fluff".to_string(), "ktwo".to_string()),
        ]);
        assert_eq!(translator.translate("s/two:fluff"), "ktwo");
        assert_eq!(translator.translate("s/two"), "s/two");
        assert_eq!(translator.translate("S/TWO:FLUFF"), "S/TWO:FLUFF");
    }
}
