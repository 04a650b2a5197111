//! Text utilities: normalization, content fingerprints, heuristics.
//!
//! Change detection and extraction both hash *normalized* text so that
//! formatting noise (reflowed whitespace, trailing newlines) never produces
//! a spurious new regulation version or re-extraction.

use sha2::{Digest, Sha256};
use unicode_script::{Script, UnicodeScript};

/// Collapse every run of whitespace to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_ws = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_ws = true;
        } else {
            if in_ws && !out.is_empty() {
                out.push(' ');
            }
            in_ws = false;
            out.push(ch);
        }
    }
    out
}

/// SHA-256 hex fingerprint of normalized text.
///
/// Callers that already normalized should use [`content_hash_raw`] to avoid
/// double work; this helper normalizes first so the two never diverge.
pub fn content_hash(text: &str) -> String {
    content_hash_raw(&normalize_whitespace(text))
}

/// SHA-256 hex fingerprint of the input bytes as-is.
pub fn content_hash_raw(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 hex fingerprint of raw file bytes (upload dedup key).
pub fn file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Heuristic token count: ~4 characters per token, floor 1 for non-empty
/// text. Not a real tokenizer; good enough for rough context sizing.
pub fn estimate_tokens(text: &str) -> i32 {
    let chars = text.chars().count();
    if chars == 0 {
        0
    } else {
        ((chars + 3) / 4) as i32
    }
}

/// Best-effort language tag from a single pass of Unicode script counting.
///
/// Returns a coarse tag ("en", "ru", "zh", ...) or "und" when no script
/// clearly dominates. This is a retrieval hint, not a language identifier.
pub fn detect_language_tag(text: &str) -> &'static str {
    let mut counts: [usize; 9] = [0; 9];
    let mut total = 0usize;

    for ch in text.chars() {
        if ch.is_whitespace() || ch.is_ascii_punctuation() || ch.is_ascii_digit() {
            continue;
        }
        let idx = match ch.script() {
            Script::Latin => 0,
            Script::Cyrillic => 1,
            Script::Han | Script::Hiragana | Script::Katakana | Script::Hangul => 2,
            Script::Arabic => 3,
            Script::Devanagari => 4,
            Script::Greek => 5,
            Script::Hebrew => 6,
            Script::Thai => 7,
            _ => 8,
        };
        counts[idx] += 1;
        total += 1;
    }

    if total == 0 {
        return "und";
    }

    let (best_idx, best_count) = counts
        .iter()
        .enumerate()
        .max_by_key(|(_, c)| **c)
        .unwrap_or((8, &0));

    // Require a clear majority before committing to a tag.
    if *best_count * 2 <= total {
        return "und";
    }

    match best_idx {
        0 => "en",
        1 => "ru",
        2 => "zh",
        3 => "ar",
        4 => "hi",
        5 => "el",
        6 => "he",
        7 => "th",
        _ => "und",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_runs() {
        assert_eq!(
            normalize_whitespace("a  b\t\tc\n\nd"),
            "a b c d".to_string()
        );
    }

    #[test]
    fn test_normalize_trims_ends() {
        assert_eq!(normalize_whitespace("  hello  "), "hello");
        assert_eq!(normalize_whitespace("\n\n"), "");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize_whitespace(""), "");
    }

    #[test]
    fn test_content_hash_ignores_formatting() {
        let a = content_hash("Article 1.\n\nScope   of application.");
        let b = content_hash("Article 1. Scope of application.");
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_hash_differs_on_content() {
        assert_ne!(content_hash("Article 1"), content_hash("Article 2"));
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        let h = content_hash("x");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_file_hash_stable() {
        assert_eq!(file_hash(b"bytes"), file_hash(b"bytes"));
        assert_ne!(file_hash(b"bytes"), file_hash(b"other"));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_detect_language_latin() {
        assert_eq!(detect_language_tag("General Data Protection Regulation"), "en");
    }

    #[test]
    fn test_detect_language_cyrillic() {
        assert_eq!(detect_language_tag("Федеральный закон о персональных данных"), "ru");
    }

    #[test]
    fn test_detect_language_cjk() {
        assert_eq!(detect_language_tag("個人情報の保護に関する法律"), "zh");
    }

    #[test]
    fn test_detect_language_empty_and_symbols() {
        assert_eq!(detect_language_tag(""), "und");
        assert_eq!(detect_language_tag("123 ... !!!"), "und");
    }

    #[test]
    fn test_detect_language_mixed_no_majority() {
        // Half Latin, half Cyrillic: no clear majority.
        assert_eq!(detect_language_tag("abcd абвг"), "und");
    }
}
