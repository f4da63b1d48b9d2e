//! Prompt fingerprinting.
//!
//! Provider replies quote the prompt back (usually bolded) with parameter
//! flags, progress percentages, and requester mentions appended. Pairing a
//! reply to the generation that caused it therefore never compares raw
//! strings; both sides are reduced to a normalized fingerprint first:
//! parameter flags stripped, lowercased, whitespace collapsed, and cut to a
//! 120-character prefix.

/// Maximum fingerprint length in characters.
pub const FINGERPRINT_MAX_CHARS: usize = 120;

/// A normalized, parameter-stripped prompt prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a raw prompt.
    pub fn new(prompt: &str) -> Self {
        Self(normalize(prompt))
    }

    /// The normalized text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the normalized prompt came out empty (e.g. a flags-only
    /// prompt).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Strict match: the first `**bold**` segment of `content`, normalized,
    /// equals this fingerprint. Used to recognize the provider's primary
    /// reply for a prompt.
    pub fn matches_bold(&self, content: &str) -> bool {
        match bold_segment(content) {
            Some(segment) => normalize(segment) == self.0,
            None => false,
        }
    }

    /// Loose match: the normalized content contains this fingerprint.
    /// Used during upscale correlation, where the prompt is embedded in a
    /// longer reply line.
    pub fn matches_content(&self, content: &str) -> bool {
        !self.0.is_empty() && normalize_unbounded(content).contains(self.0.as_str())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a prompt: strip parameter flags, lowercase, collapse
/// whitespace, truncate to [`FINGERPRINT_MAX_CHARS`] characters.
///
/// Normalization is idempotent: `normalize(normalize(p)) == normalize(p)`.
pub fn normalize(prompt: &str) -> String {
    truncate_chars(&normalize_unbounded(prompt), FINGERPRINT_MAX_CHARS)
}

/// Normalization without the prefix cut, for substring containment checks.
fn normalize_unbounded(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for token in text.split_whitespace() {
        // Everything from the first parameter flag onwards is config, not
        // prompt text.
        if token.starts_with("--") {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        for c in token.chars() {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// Content between the first pair of `**` markers, if any.
pub fn bold_segment(content: &str) -> Option<&str> {
    let start = content.find("**")? + 2;
    let rest = &content[start..];
    let end = rest.find("**")?;
    Some(&rest[..end])
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_parameter_flags() {
        assert_eq!(
            normalize("Cosmic Space Dolphin --v 6 --ar 16:9 --seed 42"),
            "cosmic space dolphin"
        );
        assert_eq!(normalize("a cat --niji"), "a cat");
    }

    #[test]
    fn test_collapses_whitespace_and_lowercases() {
        assert_eq!(normalize("  A   Cat \t jumps\nhigh  "), "a cat jumps high");
    }

    #[test]
    fn test_truncates_to_prefix() {
        let long = "x".repeat(500);
        assert_eq!(normalize(&long).chars().count(), FINGERPRINT_MAX_CHARS);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = "é".repeat(200);
        let normalized = normalize(&long);
        assert_eq!(normalized.chars().count(), FINGERPRINT_MAX_CHARS);
        assert!(normalized.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for prompt in [
            "Cosmic Space Dolphin --v 6 --ar 16:9",
            "  A   Cat  ",
            "--v 6 only flags",
            "",
            "x",
            &"long prompt word ".repeat(30),
        ] {
            let once = normalize(prompt);
            assert_eq!(normalize(&once), once, "not idempotent for {prompt:?}");
        }
    }

    #[test]
    fn test_bold_segment_extraction() {
        assert_eq!(
            bold_segment("**a cat --v 6** - <@123> (fast)"),
            Some("a cat --v 6")
        );
        assert_eq!(bold_segment("no markers"), None);
        assert_eq!(bold_segment("**unterminated"), None);
    }

    #[test]
    fn test_matches_bold() {
        let fp = Fingerprint::new("A Cat --v 6");
        assert!(fp.matches_bold("**a cat** - <@123> (0%) (fast)"));
        assert!(fp.matches_bold("**A   CAT --seed 7** - done"));
        assert!(!fp.matches_bold("**a dog** - <@123>"));
        assert!(!fp.matches_bold("a cat without markers"));
    }

    #[test]
    fn test_matches_content() {
        let fp = Fingerprint::new("cosmic space dolphin");
        assert!(fp.matches_content("**Cosmic Space Dolphin** - Image #2 <@123>"));
        assert!(!fp.matches_content("**something else** - Image #2"));
    }

    #[test]
    fn test_empty_fingerprint_never_matches() {
        let fp = Fingerprint::new("--v 6");
        assert!(fp.is_empty());
        assert!(!fp.matches_content("anything at all"));
    }

    #[test]
    fn test_single_char_and_long_prompts() {
        let short = Fingerprint::new("x");
        assert!(short.matches_bold("**x** (Stopped)"));

        let long_prompt = "word ".repeat(200);
        let fp = Fingerprint::new(&long_prompt);
        assert_eq!(fp.as_str().chars().count(), FINGERPRINT_MAX_CHARS);
        let content = format!("**{long_prompt}** - <@1>");
        assert!(fp.matches_bold(&content));
    }
}
