//! Output comparison
//!
//! `trailing-whitespace` (the default) compares the two texts exactly after
//! normalizing line endings to `\n`, stripping trailing whitespace from every
//! line and dropping trailing empty lines. Leading whitespace, blank lines in
//! the middle and letter case all count.
//!
//! `contains-lines` is the lenient rule: each expected line, taken verbatim,
//! must appear somewhere in the output, ignoring case, and not glued to a
//! letter, digit or underscore on either side. A match is removed from the
//! output before the next expected line is searched, so repeated lines must
//! be printed repeatedly. Extra output is not penalized. Lines are not
//! trimmed and blank expected lines are not skipped: a blank line matches
//! only where two non-word characters (or a text edge) meet.

use lazy_regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

const TRUNCATION_MARKER: &str = "...[more output above]...\n";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparePolicy {
    #[default]
    TrailingWhitespace,
    ContainsLines,
}

impl ComparePolicy {
    pub fn matches(self, expected: &str, actual: &str) -> bool {
        match self {
            ComparePolicy::TrailingWhitespace => normalize(expected) == normalize(actual),
            ComparePolicy::ContainsLines => contains_lines(expected, actual),
        }
    }
}

/// Canonical form used by the `trailing-whitespace` policy
pub fn normalize(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn contains_lines(expected: &str, actual: &str) -> bool {
    let mut remaining = actual.lines().collect::<Vec<_>>().join("\n");
    for line in expected.lines() {
        let Ok(pattern) = RegexBuilder::new(&lazy_regex::regex::escape(line))
            .case_insensitive(true)
            .build()
        else {
            return false;
        };
        match find_bordered(&pattern, &remaining) {
            Some(range) => {
                remaining.replace_range(range, "");
            }
            None => return false,
        }
    }
    true
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Byte range of the first match of `pattern` with no word character
/// immediately before or after it. Overlapping candidates are tried too.
fn find_bordered(pattern: &Regex, text: &str) -> Option<std::ops::Range<usize>> {
    let mut from = 0;
    while from <= text.len() {
        let found = pattern.find_at(text, from)?;
        let before = text[..found.start()].chars().next_back();
        let after = text[found.end()..].chars().next();
        if !before.is_some_and(is_word) && !after.is_some_and(is_word) {
            return Some(found.range());
        }
        // Retry one character past the rejected start
        from = found.start()
            + text[found.start()..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
    }
    None
}

/// Keep the last `max_chars` characters, prefixed with a marker when
/// something was cut
pub fn tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }
    let kept: String = text.chars().skip(total - max_chars).collect();
    format!("{TRUNCATION_MARKER}{kept}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_newline_is_ignored() {
        assert!(ComparePolicy::TrailingWhitespace.matches("7", "7\n"));
        assert!(ComparePolicy::TrailingWhitespace.matches("7\n", "7\n\n\n"));
    }

    #[test]
    fn trailing_spaces_and_crlf_are_ignored() {
        assert!(ComparePolicy::TrailingWhitespace.matches("a b\nc", "a b  \r\nc\t\r\n"));
    }

    #[test]
    fn leading_whitespace_and_inner_blank_lines_count() {
        assert!(!ComparePolicy::TrailingWhitespace.matches("7", " 7"));
        assert!(!ComparePolicy::TrailingWhitespace.matches("a\nb", "a\n\nb"));
        assert!(!ComparePolicy::TrailingWhitespace.matches("Yes", "yes"));
    }

    #[test]
    fn empty_matches_whitespace_only() {
        assert!(ComparePolicy::TrailingWhitespace.matches("", "\n  \n"));
        assert!(!ComparePolicy::TrailingWhitespace.matches("", "0"));
    }

    #[test]
    fn contains_lines_ignores_case_and_extra_output() {
        let actual = "Introduce dos numeros:\nLa suma es 7\n";
        assert!(ComparePolicy::ContainsLines.matches("la SUMA es 7", actual));
        assert!(ComparePolicy::ContainsLines.matches("7", actual));
    }

    #[test]
    fn contains_lines_respects_word_boundaries() {
        assert!(!ComparePolicy::ContainsLines.matches("7", "17\n"));
        assert!(!ComparePolicy::ContainsLines.matches("sum", "summary"));
        assert!(ComparePolicy::ContainsLines.matches("7", "x=7."));
    }

    #[test]
    fn contains_lines_consumes_matches() {
        assert!(ComparePolicy::ContainsLines.matches("3\n3", "3 3"));
        assert!(!ComparePolicy::ContainsLines.matches("3\n3", "3"));
    }

    #[test]
    fn contains_lines_takes_expected_lines_verbatim() {
        // Leading spaces are part of the line
        assert!(!ComparePolicy::ContainsLines.matches("  7", "7"));
        assert!(ComparePolicy::ContainsLines.matches("  7", "x =  7"));
        // A blank line needs a spot between two non-word characters
        assert!(!ComparePolicy::ContainsLines.matches("\nok", "OK"));
        assert!(ComparePolicy::ContainsLines.matches("\nok", "-OK"));
        assert!(ComparePolicy::ContainsLines.matches("", ""));
    }

    #[test]
    fn contains_lines_escapes_regex_syntax() {
        assert!(ComparePolicy::ContainsLines.matches("a+b (1)", "A+B (1)"));
        assert!(!ComparePolicy::ContainsLines.matches("a.b", "axb"));
    }

    #[test]
    fn contains_lines_tries_overlapping_candidates() {
        // "a-a" at offset 1 is glued to "b"; the one at offset 3 is not
        assert!(ComparePolicy::ContainsLines.matches("a-a", "ba-a-a"));
    }

    #[test]
    fn contains_lines_matches_across_crlf_output() {
        assert!(ComparePolicy::ContainsLines.matches("hola\nadios", "HOLA\r\nADIOS\r\n"));
    }

    #[test]
    fn policy_serde_names() {
        assert_eq!(
            serde_json::to_string(&ComparePolicy::ContainsLines).unwrap(),
            "\"contains-lines\""
        );
        assert_eq!(ComparePolicy::default(), ComparePolicy::TrailingWhitespace);
    }

    #[test]
    fn tail_keeps_short_text() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("hello", 5), "hello");
    }

    #[test]
    fn tail_cuts_from_the_front() {
        assert_eq!(tail("abcdef", 3), format!("{TRUNCATION_MARKER}def"));
    }

    #[test]
    fn tail_counts_chars_not_bytes() {
        assert_eq!(tail("ñandú", 5), "ñandú");
        assert_eq!(tail("ñandú", 2), format!("{TRUNCATION_MARKER}dú"));
    }
}
