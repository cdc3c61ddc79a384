//! Full filename composition and the inverse: reading counters back out.
//!
//! A saved file name is the resolved base name plus a zero-padded counter,
//! joined with the delimiter, plus the format extension. The counter sits
//! either at the end (`last`, the default) or at the start (`first`):
//!
//! - `last`  → `ComfyUI-euler-20-0007.webp`
//! - `first` → `0007-ComfyUI-euler-20.webp`
//!
//! The counter scan in [`counter`](crate::counter) uses [`counter_pattern`]
//! to recognise files written under the same scheme.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the counter goes in a file name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterPosition {
    First,
    #[default]
    Last,
}

impl fmt::Display for CounterPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterPosition::First => f.write_str("first"),
            CounterPosition::Last => f.write_str("last"),
        }
    }
}

/// Everything needed to turn a base name and a counter into a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameScheme {
    pub delimiter: String,
    pub counter_digits: usize,
    pub position: CounterPosition,
    /// Extension including the dot, e.g. `.webp`.
    pub extension: String,
}

impl NameScheme {
    /// Zero-pad `counter` to the configured width. Wider counters are kept whole.
    pub fn format_counter(&self, counter: u64) -> String {
        format!("{:0width$}", counter, width = self.counter_digits)
    }

    /// File name without extension.
    pub fn stem(&self, base: &str, counter: u64) -> String {
        let counter = self.format_counter(counter);
        match self.position {
            CounterPosition::First => format!("{}{}{}", counter, self.delimiter, base),
            CounterPosition::Last => format!("{}{}{}", base, self.delimiter, counter),
        }
    }

    /// Complete file name.
    pub fn file_name(&self, base: &str, counter: u64) -> String {
        format!("{}{}", self.stem(base, counter), self.extension)
    }

    /// Read the counter out of a file name written under this scheme.
    ///
    /// When `prefix` is given the name must also carry it next to the counter.
    pub fn parse_counter(&self, file_name: &str, prefix: Option<&str>) -> Option<u64> {
        let pattern = counter_pattern(self, prefix).ok()?;
        captured_counter(&pattern, file_name)
    }
}

/// Regex matching file names written under `scheme`, capturing the counter.
///
/// - `last`: `^{prefix}.*?{delim}(\d{N,}){ext}$`
/// - `first`: `^(\d{N,}){delim}{prefix}.*{ext}$`
///
/// The prefix part is only present when `prefix` is `Some`. The filler before
/// a trailing counter is lazy so that with an empty delimiter the counter
/// takes every trailing digit.
pub fn counter_pattern(scheme: &NameScheme, prefix: Option<&str>) -> Result<Regex, regex::Error> {
    let delim = regex::escape(&scheme.delimiter);
    let ext = regex::escape(&scheme.extension);
    let prefix = prefix.map(regex::escape).unwrap_or_default();
    let digits = scheme.counter_digits.max(1);
    let pattern = match scheme.position {
        CounterPosition::Last => format!(r"^{prefix}.*?{delim}(\d{{{digits},}}){ext}$"),
        CounterPosition::First => format!(r"^(\d{{{digits},}}){delim}{prefix}.*{ext}$"),
    };
    Regex::new(&pattern)
}

/// Counter captured by a [`counter_pattern`] regex.
pub fn captured_counter(pattern: &Regex, file_name: &str) -> Option<u64> {
    pattern.captures(file_name)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme(position: CounterPosition) -> NameScheme {
        NameScheme {
            delimiter: "-".into(),
            counter_digits: 4,
            position,
            extension: ".webp".into(),
        }
    }

    #[test]
    fn counter_last() {
        let s = scheme(CounterPosition::Last);
        assert_eq!(s.file_name("ComfyUI-euler", 7), "ComfyUI-euler-0007.webp");
    }

    #[test]
    fn counter_first() {
        let s = scheme(CounterPosition::First);
        assert_eq!(s.file_name("ComfyUI-euler", 7), "0007-ComfyUI-euler.webp");
    }

    #[test]
    fn counter_wider_than_digits_is_not_truncated() {
        let s = scheme(CounterPosition::Last);
        assert_eq!(s.format_counter(12345), "12345");
    }

    #[test]
    fn empty_delimiter_concatenates() {
        let s = NameScheme {
            delimiter: String::new(),
            ..scheme(CounterPosition::Last)
        };
        assert_eq!(s.stem("img", 3), "img0003");
    }

    #[test]
    fn position_serde_lowercase() {
        let json = serde_json::to_string(&CounterPosition::First).unwrap();
        assert_eq!(json, "\"first\"");
        let parsed: CounterPosition = serde_json::from_str("\"last\"").unwrap();
        assert_eq!(parsed, CounterPosition::Last);
    }

    // =========================================================================
    // Parsing counters
    // =========================================================================

    #[test]
    fn parse_counter_last() {
        let s = scheme(CounterPosition::Last);
        assert_eq!(s.parse_counter("ComfyUI-euler-0042.webp", None), Some(42));
        assert_eq!(s.parse_counter("ComfyUI-euler-0042.png", None), None);
        assert_eq!(s.parse_counter("ComfyUI-euler-42.webp", None), None);
        assert_eq!(s.parse_counter("notes.txt", None), None);
    }

    #[test]
    fn parse_counter_first() {
        let s = scheme(CounterPosition::First);
        assert_eq!(s.parse_counter("0042-ComfyUI.webp", None), Some(42));
        assert_eq!(s.parse_counter("ComfyUI-0042.webp", None), None);
    }

    #[test]
    fn parse_counter_with_prefix() {
        let s = scheme(CounterPosition::Last);
        assert_eq!(s.parse_counter("cat-0005.webp", Some("cat")), Some(5));
        assert_eq!(s.parse_counter("dog-0005.webp", Some("cat")), None);

        let s = scheme(CounterPosition::First);
        assert_eq!(s.parse_counter("0005-cat.webp", Some("cat")), Some(5));
        assert_eq!(s.parse_counter("0005-dog.webp", Some("cat")), None);
    }

    #[test]
    fn parse_counter_uses_configured_delimiter() {
        let s = NameScheme {
            delimiter: "_".into(),
            ..scheme(CounterPosition::Last)
        };
        assert_eq!(s.parse_counter("img_0009.webp", None), Some(9));
        assert_eq!(s.parse_counter("img-0009.webp", None), None);
    }

    #[test]
    fn parse_counter_escapes_regex_characters() {
        let s = NameScheme {
            delimiter: ".".into(),
            ..scheme(CounterPosition::Last)
        };
        assert_eq!(s.parse_counter("img.0001.webp", None), Some(1));
        assert_eq!(s.parse_counter("imgx0001.webp", None), None);
    }

    #[test]
    fn parse_counter_accepts_overflowed_width() {
        let s = scheme(CounterPosition::Last);
        assert_eq!(s.parse_counter("img-10000.webp", None), Some(10000));
    }

    #[test]
    fn parse_counter_without_delimiter_takes_all_digits() {
        let last = NameScheme {
            delimiter: String::new(),
            ..scheme(CounterPosition::Last)
        };
        assert_eq!(last.parse_counter("img12345.webp", None), Some(12345));
        assert_eq!(last.parse_counter("img0042.webp", None), Some(42));
        assert_eq!(last.parse_counter("img042.webp", None), None);

        let first = NameScheme {
            delimiter: String::new(),
            ..scheme(CounterPosition::First)
        };
        assert_eq!(first.parse_counter("12345img.webp", None), Some(12345));
    }

    #[test]
    fn parse_counter_lazy_filler_still_anchors_on_last_delimiter() {
        let s = scheme(CounterPosition::Last);
        assert_eq!(s.parse_counter("a-12345-6789.webp", None), Some(6789));
        assert_eq!(s.parse_counter("a-1234-5-0010.webp", None), Some(10));
    }

    #[test]
    fn compose_then_parse_agree() {
        for position in [CounterPosition::First, CounterPosition::Last] {
            let s = scheme(position);
            let name = s.file_name("ComfyUI-euler-7.5", 31);
            assert_eq!(s.parse_counter(&name, None), Some(31), "{position}");
        }
    }
}
