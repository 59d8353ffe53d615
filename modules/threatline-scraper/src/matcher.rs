use regex::Regex;

/// Per-article match outcome.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub matched: bool,
    pub matched_keywords: Vec<String>,
}

/// Compiled word-boundary patterns for a user's keyword list.
/// Pure: matching never touches I/O, so it is order-independent by
/// construction.
pub struct KeywordMatcher {
    patterns: Vec<(String, Regex)>,
}

impl KeywordMatcher {
    /// Compile one case-insensitive `\b<word>\b` pattern per keyword.
    /// Regex metacharacters in the keyword are escaped first.
    pub fn new(keywords: &[String]) -> Self {
        let patterns = keywords
            .iter()
            .filter_map(|word| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(word));
                match Regex::new(&pattern) {
                    Ok(re) => Some((word.clone(), re)),
                    Err(_) => None,
                }
            })
            .collect();
        Self { patterns }
    }

    /// Scan `title + " " + content`. An empty keyword list matches nothing.
    pub fn match_text(&self, title: &str, content: &str) -> MatchResult {
        if self.patterns.is_empty() {
            return MatchResult::default();
        }
        let haystack = format!("{title} {content}");
        let matched_keywords: Vec<String> = self
            .patterns
            .iter()
            .filter(|(_, re)| re.is_match(&haystack))
            .map(|(word, _)| word.clone())
            .collect();
        MatchResult {
            matched: !matched_keywords.is_empty(),
            matched_keywords,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn matches_on_word_boundary() {
        let matcher = KeywordMatcher::new(&kw(&["ransomware"]));
        let hit = matcher.match_text("LockBit ransomware hits X", "");
        assert!(hit.matched);
        assert_eq!(hit.matched_keywords, vec!["ransomware"]);

        // Substring inside a longer word does not match
        let miss = matcher.match_text("antiransomwareism", "");
        assert!(!miss.matched);
    }

    #[test]
    fn case_insensitive() {
        let matcher = KeywordMatcher::new(&kw(&["fortinet"]));
        assert!(matcher.match_text("FORTINET advisory", "").matched);
    }

    #[test]
    fn empty_keyword_list_matches_nothing() {
        let matcher = KeywordMatcher::new(&[]);
        let result = matcher.match_text("ransomware everywhere", "ransomware");
        assert!(!result.matched);
        assert!(result.matched_keywords.is_empty());
    }

    #[test]
    fn metacharacters_are_escaped() {
        let matcher = KeywordMatcher::new(&kw(&["log4j (cve)"]));
        assert!(matcher.match_text("patched log4j (cve) issue", "").matched);
        // The parens must not act as a regex group
        assert!(!matcher.match_text("log4j cve", "").matched);
    }

    #[test]
    fn scans_title_and_content() {
        let matcher = KeywordMatcher::new(&kw(&["phishing"]));
        assert!(matcher.match_text("Quiet title", "a phishing campaign").matched);
    }

    #[test]
    fn matching_is_order_independent() {
        let matcher = KeywordMatcher::new(&kw(&["apt", "botnet"]));
        let texts = ["apt activity", "botnet takedown", "nothing here"];
        let forward: Vec<bool> = texts
            .iter()
            .map(|t| matcher.match_text(t, "").matched)
            .collect();
        let mut reversed: Vec<bool> = texts
            .iter()
            .rev()
            .map(|t| matcher.match_text(t, "").matched)
            .collect();
        reversed.reverse();
        assert_eq!(forward, reversed);
    }
}
