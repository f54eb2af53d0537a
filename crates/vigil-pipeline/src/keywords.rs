//! Keyword extraction and narrative mining.
//!
//! Term lists are configuration; [`KeywordStrategy`] is the seam for
//! swapping the matching logic.

use std::collections::BTreeSet;

/// Terms scanned for in analyst narratives.
pub const DEFAULT_ANALYST_TERMS: &[&str] = &[
    "danger",
    "alert",
    "emergency",
    "fire",
    "weapon",
    "fight",
    "injured",
    "medical",
    "suspicious",
    "unknown",
    "threat",
];

/// Keywords that trigger automatic specialist escalation.
pub const DEFAULT_CRITICAL_TERMS: &[&str] = &["danger", "emergency", "weapon", "fire", "threat"];

/// Words that mark a specialist sentence as a threat.
pub const THREAT_TERMS: &[&str] = &[
    "danger", "threat", "risk", "hazard", "unsafe", "emergency", "caution", "warning", "alert",
];

/// Words that mark a specialist sentence as a recommendation.
pub const ADVISORY_TERMS: &[&str] = &[
    "should",
    "recommend",
    "suggest",
    "advise",
    "ensure",
    "need to",
    "must",
    "consider",
    "implement",
];

/// Entity vocabulary reported as detected objects.
pub const ENTITY_TERMS: &[&str] = &[
    "person", "people", "crowd", "vehicle", "bag", "weapon", "fire", "smoke", "barrier", "camera",
    "door", "exit",
];

/// Max threats and recommendations kept per narrative.
pub const MAX_MINED_SENTENCES: usize = 5;

/// Maps narrative text to a keyword set.
pub trait KeywordStrategy: Send + Sync {
    fn extract(&self, text: &str) -> BTreeSet<String>;
}

impl<F> KeywordStrategy for F
where
    F: Fn(&str) -> BTreeSet<String> + Send + Sync,
{
    fn extract(&self, text: &str) -> BTreeSet<String> {
        self(text)
    }
}

/// Case-insensitive substring match over a fixed term list.
#[derive(Debug, Clone)]
pub struct SubstringKeywords {
    terms: Vec<String>,
}

impl SubstringKeywords {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

impl Default for SubstringKeywords {
    fn default() -> Self {
        Self::new(DEFAULT_ANALYST_TERMS)
    }
}

impl KeywordStrategy for SubstringKeywords {
    fn extract(&self, text: &str) -> BTreeSet<String> {
        let lower = text.to_lowercase();
        self.terms
            .iter()
            .filter(|term| lower.contains(term.as_str()))
            .cloned()
            .collect()
    }
}

/// True iff any keyword is in the critical set. Stateless.
pub fn intersects_critical(keywords: &BTreeSet<String>, critical: &[String]) -> bool {
    critical.iter().any(|c| keywords.contains(c))
}

/// Split on runs of `.`, `!` or `?`, dropping empty fragments.
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn sentences_matching(text: &str, terms: &[&str]) -> Vec<String> {
    split_sentences(text)
        .into_iter()
        .filter(|s| {
            let lower = s.to_lowercase();
            terms.iter().any(|t| lower.contains(t))
        })
        .take(MAX_MINED_SENTENCES)
        .map(str::to_string)
        .collect()
}

/// Sentences mentioning risk terms.
pub fn mine_threats(text: &str) -> Vec<String> {
    sentences_matching(text, THREAT_TERMS)
}

/// Sentences containing advisory language.
pub fn mine_recommendations(text: &str) -> Vec<String> {
    sentences_matching(text, ADVISORY_TERMS)
}

/// Entity words present in the text, in vocabulary order, deduplicated.
///
/// Matches whole words and simple plurals ("vehicles", "exits").
pub fn extract_entities(text: &str) -> Vec<String> {
    let words: BTreeSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();

    ENTITY_TERMS
        .iter()
        .filter(|term| {
            words.contains(**term)
                || words.contains(&format!("{}s", term))
                || words.contains(&format!("{}es", term))
        })
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_keywords_case_insensitive() {
        let strategy = SubstringKeywords::default();
        let keywords = strategy.extract("ALERT: a person appears INJURED near the Fire exit.");
        let expected: BTreeSet<String> = ["alert", "injured", "fire"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(keywords, expected);
    }

    #[test]
    fn test_substring_keywords_empty_text() {
        assert!(SubstringKeywords::default().extract("").is_empty());
        assert!(SubstringKeywords::default()
            .extract("Calm plaza, light foot traffic.")
            .is_empty());
    }

    #[test]
    fn test_closure_strategy() {
        let strategy = |text: &str| -> BTreeSet<String> {
            text.split_whitespace().map(|w| w.to_string()).collect()
        };
        assert_eq!(strategy.extract("a b a").len(), 2);
    }

    #[test]
    fn test_intersects_critical() {
        let critical: Vec<String> = DEFAULT_CRITICAL_TERMS.iter().map(|s| s.to_string()).collect();
        let hit: BTreeSet<String> = ["weapon".to_string(), "alert".to_string()].into();
        let miss: BTreeSet<String> = ["alert".to_string(), "medical".to_string()].into();
        assert!(intersects_critical(&hit, &critical));
        assert!(!intersects_critical(&miss, &critical));
        assert!(!intersects_critical(&BTreeSet::new(), &critical));
    }

    #[test]
    fn test_split_sentences() {
        let parts = split_sentences("One. Two!! Three?  ...Four");
        assert_eq!(parts, vec!["One", "Two", "Three", "Four"]);
    }

    #[test]
    fn test_mine_threats_and_recommendations() {
        let text = "Crowd density is high near gate B. There is a crush risk at the barrier. \
                    Staff should open exit 3. Ensure stewards monitor the stage. All clear elsewhere.";
        assert_eq!(mine_threats(text), vec!["There is a crush risk at the barrier"]);
        assert_eq!(
            mine_recommendations(text),
            vec!["Staff should open exit 3", "Ensure stewards monitor the stage"]
        );
    }

    #[test]
    fn test_mining_caps_at_five() {
        let text = "Danger one. Danger two. Danger three. Danger four. Danger five. Danger six.";
        assert_eq!(mine_threats(text).len(), MAX_MINED_SENTENCES);
    }

    #[test]
    fn test_extract_entities() {
        let entities = extract_entities("Two people and several vehicles near the exits; smoke rising. A personal item.");
        assert_eq!(entities, vec!["people", "vehicle", "smoke", "exit"]);
    }
}
