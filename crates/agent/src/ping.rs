/// True when `text` is exactly `ping`, optionally after a leading mention of
/// the bot. Matching is case-sensitive.
pub fn is_ping(text: &str) -> bool {
    strip_leading_mention(text.trim()).trim() == "ping"
}

fn strip_leading_mention(text: &str) -> &str {
    text.strip_prefix("<@")
        .and_then(|rest| rest.find('>').map(|end| &rest[end + 1..]))
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::is_ping;

    #[test]
    fn matches_bare_and_mentioned_ping() {
        for text in ["ping", "  ping\n", "<@UBOT> ping", "<@UBOT|knowbot>ping"] {
            assert!(is_ping(text), "{text:?}");
        }
    }

    #[test]
    fn rejects_anything_else() {
        for text in ["Ping", "PING", "ping?", "pinging", "please ping", "<@UBOT> ping me", "", "<@UBOT"] {
            assert!(!is_ping(text), "{text:?}");
        }
    }
}
