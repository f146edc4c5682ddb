//! # Topic Patterns
//!
//! Topic-exchange routing over dot-separated words.
//!
//! | Pattern word | Matches                    |
//! |--------------|----------------------------|
//! | `*`          | exactly one word           |
//! | `#`          | zero or more words         |
//! | anything else| that exact word            |

/// Maximum routing key length (AMQP short string).
pub const MAX_ROUTING_KEY_LEN: usize = 255;

/// Returns true if `routing_key` is selected by `pattern`.
///
/// # Example
///
/// ```rust
/// use tickbridge_core::topic_matches;
///
/// assert!(topic_matches("building.record.*", "building.record.click"));
/// assert!(topic_matches("building.#", "building.record.update"));
/// assert!(!topic_matches("building.*", "building.record.update"));
/// ```
#[must_use]
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    // Fast path: plain keys on direct-style bindings
    if !pattern.contains(['*', '#']) {
        return pattern == routing_key;
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            if rest.is_empty() {
                return true;
            }
            (0..=key.len()).any(|skip| match_words(rest, &key[skip..]))
        }
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

/// Returns true if `pattern` is a well-formed binding key.
///
/// Wildcards must occupy a whole word (`a.*.c` is fine, `a.b*.c` is not) and
/// the key must fit in an AMQP short string.
#[must_use]
pub fn is_valid_pattern(pattern: &str) -> bool {
    pattern.len() <= MAX_ROUTING_KEY_LEN
        && pattern
            .split('.')
            .all(|word| word == "*" || word == "#" || !word.contains(['*', '#']))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("building.clicked", "building.clicked"));
        assert!(!topic_matches("building.clicked", "building.clicked.twice"));
        assert!(!topic_matches("building.clicked", "building"));
    }

    #[test]
    fn test_star_matches_one_word() {
        assert!(topic_matches("*.record.click", "building.record.click"));
        assert!(!topic_matches("*.click", "building.record.click"));
        assert!(!topic_matches("building.*", "building"));
    }

    #[test]
    fn test_hash_matches_zero_or_more() {
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("building.#", "building"));
        assert!(topic_matches("building.#", "building.record.update"));
        assert!(topic_matches("#.update", "building.record.update"));
        assert!(topic_matches("building.#.update", "building.update"));
        assert!(!topic_matches("building.#.update", "building.record.click"));
    }

    #[test]
    fn test_mixed_wildcards() {
        assert!(topic_matches("*.#.results", "propagation.neo4j.results"));
        assert!(topic_matches("*.#.results", "propagation.results"));
        assert!(!topic_matches("*.#.results", "results"));
    }

    #[test]
    fn test_pattern_validation() {
        assert!(is_valid_pattern("building.record.click"));
        assert!(is_valid_pattern("building.*.#"));
        assert!(!is_valid_pattern("building.rec*"));
        assert!(!is_valid_pattern(&"a".repeat(MAX_ROUTING_KEY_LEN + 1)));
    }
}
