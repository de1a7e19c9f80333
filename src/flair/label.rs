//! Label splitting and composition
//!
//! A label is the free-text flair CSS class a user carries in one forum. The
//! configured [`MatchRule`] identifies the managed ("valid") part of it; the
//! rest ("other") belongs to the forum's moderators and is carried through
//! untouched.

use regex::{Match, Regex};

use crate::flair::FlairError;

/// Pattern identifying the valid flair substring inside a label
#[derive(Debug, Clone)]
pub struct MatchRule {
    regex: Regex,
}

impl MatchRule {
    /// Compile a rule. Patterns that match the empty string are rejected.
    pub fn new(pattern: &str) -> Result<Self, FlairError> {
        let regex = Regex::new(pattern).map_err(|e| FlairError::InvalidRule {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        if regex.is_match("") {
            return Err(FlairError::InvalidRule {
                pattern: pattern.to_string(),
                reason: "pattern matches the empty string".to_string(),
            });
        }

        Ok(Self { regex })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Non-empty matches, left to right
    fn matches<'h>(&self, label: &'h str) -> impl Iterator<Item = Match<'h>> {
        self.regex.find_iter(label).filter(|m| !m.is_empty())
    }

    /// Classify where the valid flair sits inside `label`.
    pub fn split<'a>(&self, label: &'a str) -> LabelSplit<'a> {
        let mut matches = self.matches(label);

        let Some(first) = matches.next() else {
            return LabelSplit::NoMatch { label };
        };

        let extra = matches.count();
        if extra > 0 {
            return LabelSplit::AmbiguousMultipleMatches {
                label,
                matches: extra + 1,
            };
        }

        let before = &label[..first.start()];
        let valid = &label[first.range()];
        let after = &label[first.end()..];

        match (before.trim().is_empty(), after.trim().is_empty()) {
            (true, false) => LabelSplit::MatchAtStart { valid, after },
            (_, true) => LabelSplit::MatchAtEnd { before, valid },
            (false, false) => LabelSplit::MatchInMiddle {
                before,
                valid,
                after,
            },
        }
    }

    /// First valid flair in `label`, or an empty string.
    pub fn extract_valid(&self, label: &str) -> String {
        self.matches(label)
            .next()
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }

    /// Everything in `label` that is not valid flair, trimmed.
    pub fn extract_other(&self, label: &str) -> Result<String, FlairError> {
        self.split(label).other()
    }
}

/// Position of the valid flair within a label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSplit<'a> {
    /// The pattern does not occur.
    NoMatch { label: &'a str },
    /// Only whitespace precedes the match.
    MatchAtStart { valid: &'a str, after: &'a str },
    /// Only whitespace follows the match (or the label is exactly the match).
    MatchAtEnd { before: &'a str, valid: &'a str },
    /// Text on both sides of the match.
    MatchInMiddle {
        before: &'a str,
        valid: &'a str,
        after: &'a str,
    },
    /// The pattern occurs more than once.
    AmbiguousMultipleMatches { label: &'a str, matches: usize },
}

impl<'a> LabelSplit<'a> {
    /// The valid substring, empty for `NoMatch` and ambiguous labels.
    pub fn valid(&self) -> &'a str {
        match *self {
            LabelSplit::MatchAtStart { valid, .. }
            | LabelSplit::MatchAtEnd { valid, .. }
            | LabelSplit::MatchInMiddle { valid, .. } => valid,
            LabelSplit::NoMatch { .. } | LabelSplit::AmbiguousMultipleMatches { .. } => "",
        }
    }

    /// The unmanaged remainder. Text on both sides of a middle match is
    /// joined with a single space.
    pub fn other(&self) -> Result<String, FlairError> {
        match *self {
            LabelSplit::NoMatch { label } => Ok(label.trim().to_string()),
            LabelSplit::MatchAtStart { after, .. } => Ok(after.trim().to_string()),
            LabelSplit::MatchAtEnd { before, .. } => Ok(before.trim().to_string()),
            LabelSplit::MatchInMiddle { before, after, .. } => {
                Ok(format!("{} {}", before.trim(), after.trim()))
            }
            LabelSplit::AmbiguousMultipleMatches { label, matches } => {
                Err(FlairError::AmbiguousLabel {
                    label: label.to_string(),
                    matches,
                })
            }
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, LabelSplit::AmbiguousMultipleMatches { .. })
    }
}

/// Join the unmanaged and managed parts into one label, other first.
///
/// Labels that carried their valid flair before (or inside) the other text
/// come back in other-then-valid order; only other-then-valid labels
/// round-trip exactly.
pub fn compose(other: &str, valid: &str) -> String {
    let other = other.trim();
    let valid = valid.trim();

    match (other.is_empty(), valid.is_empty()) {
        (true, _) => valid.to_string(),
        (false, true) => other.to_string(),
        (false, false) => format!("{} {}", other, valid),
    }
}
