//! Parsing of free-form model output into reply suggestions.
//!
//! The backend is asked for a numbered list but answers in unstructured
//! text. Parsing is line-based and tolerant; a result is only usable when it
//! has exactly [`SUGGESTION_COUNT`] entries.

use std::sync::LazyLock;

use regex::Regex;

/// Number of candidates a batch must contain to be shown.
pub const SUGGESTION_COUNT: usize = 3;

/// `1. `, `2) `, ` 3.` at the start of a line.
static ORDINAL_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)](?:\s+|$)").expect("ordinal pattern is valid"));

/// Candidate replies parsed from one raw completion, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SuggestionBatch {
    candidates: Vec<String>,
}

impl SuggestionBatch {
    /// Split into lines, strip list numbering, trim, drop empty lines.
    pub fn parse(raw: &str) -> Self {
        let candidates = raw
            .lines()
            .map(|line| ORDINAL_PREFIX.replace(line, "").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        Self { candidates }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn is_accepted(&self) -> bool {
        self.candidates.len() == SUGGESTION_COUNT
    }

    /// The candidates, if the batch has exactly the expected count.
    pub fn accepted(self) -> Option<Vec<String>> {
        if self.is_accepted() {
            Some(self.candidates)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_list() {
        let batch = SuggestionBatch::parse("1. Hi\n2. Hey\n3. Yo");
        assert_eq!(batch.accepted().unwrap(), vec!["Hi", "Hey", "Yo"]);
    }

    #[test]
    fn blank_line_does_not_shift_count() {
        let batch = SuggestionBatch::parse("1. Sure\n2. Okay\n\n3. Nope");
        assert_eq!(batch.candidates(), ["Sure", "Okay", "Nope"]);
        assert!(batch.is_accepted());
    }

    #[test]
    fn two_lines_are_rejected() {
        let batch = SuggestionBatch::parse("1. Sure\n2. Okay");
        assert_eq!(batch.len(), 2);
        assert!(batch.accepted().is_none());
    }

    #[test]
    fn preamble_line_makes_four() {
        let batch = SuggestionBatch::parse("Here are some replies:\n1. Hi\n2. Hey\n3. Yo");
        assert_eq!(batch.len(), 4);
        assert!(!batch.is_accepted());
    }

    #[test]
    fn empty_and_whitespace_only() {
        assert!(SuggestionBatch::parse("").is_empty());
        assert!(SuggestionBatch::parse("\n  \n\t\n").is_empty());
    }

    #[test]
    fn trims_and_handles_crlf_and_parens() {
        let batch = SuggestionBatch::parse("  1)  Sounds good  \r\n2.\tSure thing\r\n 3. Later\r\n");
        assert_eq!(batch.candidates(), ["Sounds good", "Sure thing", "Later"]);
    }

    #[test]
    fn unnumbered_lines_are_kept() {
        let batch = SuggestionBatch::parse("Hi\nHey\nYo");
        assert_eq!(batch.candidates(), ["Hi", "Hey", "Yo"]);
    }

    #[test]
    fn bare_ordinal_line_is_dropped() {
        let batch = SuggestionBatch::parse("1.\n2. Okay\n3. Fine\n4. Nope");
        assert_eq!(batch.candidates(), ["Okay", "Fine", "Nope"]);
    }

    #[test]
    fn numbers_inside_text_survive() {
        let batch = SuggestionBatch::parse("1. See you at 5. Bye\n2. 10.5 is fine\n3. Ok");
        assert_eq!(batch.candidates(), ["See you at 5. Bye", "10.5 is fine", "Ok"]);
    }

    #[test]
    fn multi_digit_ordinals() {
        let batch = SuggestionBatch::parse("10. a\n11. b\n12. c");
        assert_eq!(batch.candidates(), ["a", "b", "c"]);
    }
}
