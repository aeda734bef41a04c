use std::sync::OnceLock;

use regex::Regex;

/// How a candidate answered "are you available?".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Affirmative,
    Negative,
    Unrecognized,
}

fn affirmative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(yes|yea|yup|yep|ya|sure|ok|okay|y|yeah|yah)\b")
            .expect("affirmative pattern is valid")
    })
}

fn negative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(no|nah|nope|n)\b").expect("negative pattern is valid")
    })
}

/// Classifies a free-text reply by its leading word. The two recognized
/// classes cannot both match the same reply.
pub fn classify_availability(text: &str) -> Availability {
    if affirmative_pattern().is_match(text) {
        Availability::Affirmative
    } else if negative_pattern().is_match(text) {
        Availability::Negative
    } else {
        Availability::Unrecognized
    }
}
