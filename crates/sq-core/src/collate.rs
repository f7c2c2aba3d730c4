//! # Collation — Text Ordering for Sort Keys
//!
//! Sorting compares rendered field values as text. Two collations exist:
//!
//! - [`Collation::Lexicographic`]: lower-cased, byte-wise. Numeric-looking
//!   values sort as text, so `"10"` comes before `"2"`. This is the default
//!   and matches what dashboards built on this engine have always shown.
//! - [`Collation::Natural`]: lower-cased, with digit runs compared by value,
//!   so `"2"` comes before `"10"`. The status.dat reader sorts this way.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::render;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collation {
    #[default]
    Lexicographic,
    Natural,
}

impl Collation {
    /// Compare two optional field values. Absent values render as `""`.
    pub fn compare(self, a: Option<&Value>, b: Option<&Value>) -> Ordering {
        let a = a.map(render).unwrap_or_default();
        let b = b.map(render).unwrap_or_default();
        self.compare_str(&a, &b)
    }

    pub fn compare_str(self, a: &str, b: &str) -> Ordering {
        match self {
            Self::Lexicographic => a.to_lowercase().cmp(&b.to_lowercase()),
            Self::Natural => natural_case_cmp(a, b),
        }
    }
}

/// Case-insensitive natural comparison.
pub fn natural_case_cmp(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let start_a = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let start_b = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let ord = compare_digit_runs(&a[start_a..i], &b[start_b..j]);
            if ord != Ordering::Equal {
                return ord;
            }
            continue;
        }

        match a[i].cmp(&b[j]) {
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
            ord => return ord,
        }
    }

    (a.len() - i).cmp(&(b.len() - j))
}

fn compare_digit_runs(a: &[char], b: &[char]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(run: &[char]) -> &[char] {
    let zeros = run.iter().take_while(|c| **c == '0').count();
    &run[zeros.min(run.len().saturating_sub(1))..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lexicographic_is_case_insensitive() {
        assert_eq!(
            Collation::Lexicographic.compare_str("Apple", "apple"),
            Ordering::Equal
        );
        assert_eq!(
            Collation::Lexicographic.compare_str("B", "a"),
            Ordering::Greater
        );
    }

    #[test]
    fn test_lexicographic_sorts_numbers_as_text() {
        let ten = json!(10);
        let two = json!("2");
        assert_eq!(
            Collation::Lexicographic.compare(Some(&ten), Some(&two)),
            Ordering::Less
        );
    }

    #[test]
    fn test_natural_sorts_digit_runs_by_value() {
        assert_eq!(natural_case_cmp("2", "10"), Ordering::Less);
        assert_eq!(natural_case_cmp("web10", "WEB9"), Ordering::Greater);
        assert_eq!(natural_case_cmp("web007", "web7"), Ordering::Equal);
        assert_eq!(natural_case_cmp("web", "web1"), Ordering::Less);
    }

    #[test]
    fn test_absent_value_sorts_as_empty_text() {
        let a = json!("a");
        assert_eq!(
            Collation::Lexicographic.compare(None, Some(&a)),
            Ordering::Less
        );
        assert_eq!(
            Collation::Natural.compare(None, Some(&Value::Null)),
            Ordering::Equal
        );
    }
}
