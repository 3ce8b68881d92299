//! Output redaction
//!
//! Every line a step writes, and every failure message, passes through the
//! job's redactor before it is stored.

use secrecy::{ExposeSecret, SecretString};

/// Minimum secret length the broker accepts; shorter values would redact
/// ordinary words
pub const MIN_SECRET_LENGTH: usize = 4;

pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Replaces known secret values with [`REDACTED_PLACEHOLDER`]
///
/// Patterns are held as [`SecretString`]s like the values they came from,
/// so they are zeroed when the job's redactor is dropped.
#[derive(Default)]
pub struct Redactor {
    /// Longest first, so a secret containing another is replaced whole
    patterns: Vec<SecretString>,
}

impl Redactor {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns: Vec<SecretString> = Vec::new();
        for secret in secrets {
            let secret = secret.as_ref();
            // Output is redacted line by line, so each line of a multi-line
            // secret is a pattern of its own
            let pieces = std::iter::once(secret).chain(secret.lines().map(str::trim));
            for piece in pieces {
                let known = patterns.iter().any(|p| p.expose_secret() == piece);
                if piece.len() >= MIN_SECRET_LENGTH && !known {
                    patterns.push(SecretString::from(piece.to_string()));
                }
            }
        }
        patterns.sort_by_key(|p| std::cmp::Reverse(p.expose_secret().len()));
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for pattern in &self.patterns {
            let pattern = pattern.expose_secret();
            if out.contains(pattern) {
                out = out.replace(pattern, REDACTED_PLACEHOLDER);
            }
        }
        out
    }
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("patterns", &self.patterns.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_all_occurrences() {
        let redactor = Redactor::new(["hunter22"]);
        assert_eq!(
            redactor.redact("login hunter22 ok hunter22"),
            "login [REDACTED] ok [REDACTED]"
        );
        assert_eq!(redactor.redact("nothing here"), "nothing here");
    }

    #[test]
    fn test_longest_secret_wins() {
        let redactor = Redactor::new(["abcd", "abcdefgh"]);
        assert_eq!(redactor.redact("x abcdefgh y"), "x [REDACTED] y");
    }

    #[test]
    fn test_short_values_ignored() {
        let redactor = Redactor::new(["abc"]);
        assert!(redactor.is_empty());
        assert_eq!(redactor.redact("abc"), "abc");
    }

    #[test]
    fn test_multiline_secret_lines() {
        let key = "-----BEGIN KEY-----\nMIIEvQIBADANBgkq\n-----END KEY-----";
        let redactor = Redactor::new([key]);
        assert_eq!(redactor.redact("MIIEvQIBADANBgkq"), "[REDACTED]");
        assert_eq!(redactor.redact(key), "[REDACTED]");
    }

    #[test]
    fn test_patterns_outlive_their_source() {
        let redactor = {
            let value = String::from("registry-token-9f8e");
            Redactor::new([value.as_str()])
        };
        assert_eq!(redactor.redact("token registry-token-9f8e"), "token [REDACTED]");
    }

    #[test]
    fn test_debug_does_not_print_patterns() {
        let redactor = Redactor::new(["topsecret"]);
        assert!(!format!("{:?}", redactor).contains("topsecret"));
    }
}
