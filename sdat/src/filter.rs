//! Include/exclude decisions for sequences
//!
//! Strip asks a [`Decider`] about every sequence, passing its name and the ID of the archive
//! it came from. [`Rules`] is the stock implementation, driven by wildcard patterns as they
//! are typically given on a command line:
//!
//! ```
//! # use sdat::filter::{Decider, Keep, Rules};
//! let mut rules = Rules::new();
//! rules.exclude("SE_*");
//! rules.include("SE_JINGLE");
//! rules.exclude("rom.nds#2/BGM_??");
//!
//! assert_eq!(rules.decide("se_jump", "rom.nds#1"), Keep::Exclude);
//! assert_eq!(rules.decide("SE_JINGLE", "rom.nds#1"), Keep::Include);
//! assert_eq!(rules.decide("BGM_01", "rom.nds#2"), Keep::Exclude);
//! assert_eq!(rules.decide("BGM_01", "rom.nds#1"), Keep::Unspecified);
//! ```

/// The verdict for a single sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Keep {
    Include,
    Exclude,

    /// No rule applies; strip keeps the sequence
    #[default]
    Unspecified,
}

/// Decides whether a sequence should be kept
pub trait Decider {
    fn decide(&self, name: &str, archive_id: &str) -> Keep;
}

impl<F> Decider for F
where
    F: Fn(&str, &str) -> Keep,
{
    fn decide(&self, name: &str, archive_id: &str) -> Keep {
        self(name, archive_id)
    }
}

/// A single include or exclude rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Pattern the archive ID should match, if the rule was given as `archive/name`
    pub archive: Option<String>,

    /// Pattern the sequence name should match
    pub name: String,

    pub keep: Keep,
}

impl Rule {
    /// Parse a rule, splitting an optional `archive/` prefix off at the first slash
    pub fn new(pattern: &str, keep: Keep) -> Self {
        match pattern.split_once('/') {
            Some((archive, name)) => Self {
                archive: Some(archive.to_owned()),
                name: name.to_owned(),
                keep,
            },
            None => Self {
                archive: None,
                name: pattern.to_owned(),
                keep,
            },
        }
    }

    pub fn matches(&self, name: &str, archive_id: &str) -> bool {
        let archive_matches = self
            .archive
            .as_deref()
            .map_or(true, |pattern| wildcard_match(pattern, archive_id));

        archive_matches && wildcard_match(&self.name, name)
    }
}

/// An ordered list of rules, where the last one that matches wins
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rules {
    pub rules: Vec<Rule>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(&mut self, pattern: &str) {
        self.rules.push(Rule::new(pattern, Keep::Include));
    }

    pub fn exclude(&mut self, pattern: &str) {
        self.rules.push(Rule::new(pattern, Keep::Exclude));
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Decider for Rules {
    fn decide(&self, name: &str, archive_id: &str) -> Keep {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(name, archive_id))
            .map_or(Keep::Unspecified, |rule| rule.keep)
    }
}

/// Case-insensitive matching where `*` matches any run of characters and `?` any single one
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().flat_map(char::to_uppercase).collect();
    let text: Vec<char> = text.chars().flat_map(char::to_uppercase).collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(c) if *c == '?' || *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                // Let the last star swallow one more character
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards() {
        assert!(wildcard_match("BGM_TITLE", "bgm_title"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("BGM_*", "BGM_"));
        assert!(wildcard_match("*_TITLE", "BGM_TITLE"));
        assert!(wildcard_match("B?M_*E", "BGM_TITLE"));
        assert!(wildcard_match("*T*T*", "BGM_TITLE"));

        assert!(!wildcard_match("BGM_?", "BGM_"));
        assert!(!wildcard_match("BGM", "BGM_TITLE"));
        assert!(!wildcard_match("*X*", "BGM_TITLE"));
        assert!(!wildcard_match("", "A"));
    }

    #[test]
    fn last_match_wins() {
        let mut rules = Rules::new();
        assert_eq!(rules.decide("SEQ", "a"), Keep::Unspecified);

        rules.include("*");
        rules.exclude("SE_*");
        assert_eq!(rules.decide("BGM", "a"), Keep::Include);
        assert_eq!(rules.decide("SE_A", "a"), Keep::Exclude);

        rules.include("se_a");
        assert_eq!(rules.decide("SE_A", "a"), Keep::Include);
        assert_eq!(rules.decide("SE_B", "a"), Keep::Exclude);
    }

    #[test]
    fn archive_qualified() {
        let rule = Rule::new("game.sdat/BGM_*", Keep::Exclude);
        assert_eq!(rule.archive.as_deref(), Some("game.sdat"));
        assert!(rule.matches("BGM_1", "GAME.SDAT"));
        assert!(!rule.matches("BGM_1", "other.sdat"));

        let rule = Rule::new("*/BGM_*", Keep::Exclude);
        assert!(rule.matches("BGM_1", "other.sdat"));
    }

    #[test]
    fn closures() {
        let decider = |name: &str, _: &str| {
            if name.starts_with("SE") {
                Keep::Exclude
            } else {
                Keep::Unspecified
            }
        };

        assert_eq!(decider.decide("SE_A", ""), Keep::Exclude);
        assert_eq!(decider.decide("BGM", ""), Keep::Unspecified);
    }
}
