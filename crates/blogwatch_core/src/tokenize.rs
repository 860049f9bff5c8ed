//! Title tokenizer used for word-frequency tables.
//!
//! Splits on non-alphanumeric characters, lowercases Latin text and strips
//! trailing Korean particles so that `카드를`, `카드가` and `카드` count as
//! the same word.

use std::collections::BTreeSet;

/// Particles checked longest first. Only stripped when at least two
/// syllables remain.
const PARTICLES: &[&str] = &[
    "에서는", "으로는", "에게서", "이라는", "에서", "에게", "으로", "까지", "부터", "처럼", "보다",
    "라는", "이랑", "하고", "은", "는", "이", "가", "을", "를", "의", "에", "와", "과", "도", "로",
    "만", "랑",
];

const MIN_STEM_CHARS: usize = 2;

pub fn tokenize_title(title: &str, stop_words: &BTreeSet<String>) -> Vec<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|raw| !raw.is_empty())
        .map(normalize_token)
        .filter(|token| keep_token(token, stop_words))
        .collect()
}

fn normalize_token(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    if lowered.chars().last().is_some_and(is_hangul_syllable) {
        strip_particle(&lowered)
    } else {
        lowered
    }
}

fn strip_particle(word: &str) -> String {
    let total = word.chars().count();
    for particle in PARTICLES {
        if let Some(stem) = word.strip_suffix(particle) {
            let remaining = total - particle.chars().count();
            if remaining >= MIN_STEM_CHARS {
                return stem.to_string();
            }
        }
    }
    word.to_string()
}

fn keep_token(token: &str, stop_words: &BTreeSet<String>) -> bool {
    token.chars().count() > 1
        && !token.chars().all(|c| c.is_ascii_digit())
        && !stop_words.contains(token)
}

fn is_hangul_syllable(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stops(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|word| (*word).to_string()).collect()
    }

    #[test]
    fn strips_particles_and_punctuation() {
        let tokens = tokenize_title("교통카드를 충전했다! 편의점에서 [후기]", &stops(&[]));
        assert_eq!(tokens, vec!["교통카드", "충전했다", "편의점", "후기"]);
    }

    #[test]
    fn keeps_short_stems_intact() {
        // "아이" would shrink to a single syllable
        let tokens = tokenize_title("아이 나이", &stops(&[]));
        assert_eq!(tokens, vec!["아이", "나이"]);
    }

    #[test]
    fn drops_stop_words_single_chars_and_numbers() {
        let tokens = tokenize_title("EZL 이즐 카드 a 2025 후불", &stops(&["ezl", "이즐"]));
        assert_eq!(tokens, vec!["카드", "후불"]);
    }

    #[test]
    fn stop_words_match_after_particle_strip() {
        let tokens = tokenize_title("티머니로 결제", &stops(&["티머니"]));
        assert_eq!(tokens, vec!["결제"]);
    }
}
