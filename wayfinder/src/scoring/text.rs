//! Text similarity: edit distance blended with semantic containment

use crate::context::ElementContext;
use crate::scoring::ScoringFactor;

pub struct TextSimilarity {
    weight: f64,
}

impl TextSimilarity {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl ScoringFactor for TextSimilarity {
    fn name(&self) -> &'static str {
        "text_similarity"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, candidate: &ElementContext, original: &ElementContext) -> f64 {
        normalized_similarity(
            original.text.as_deref().unwrap_or(""),
            candidate.text.as_deref().unwrap_or(""),
        )
    }
}

/// Similarity of two free-text strings in [0, 1].
///
/// Both sides are lowercased, whitespace-collapsed, and stripped of
/// punctuation before comparison. The result is the better of an
/// edit-distance ratio and a semantic heuristic (containment, common
/// prefix, word overlap), with a bonus for already-strong matches.
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);

    if a.chars().count() < 2 && b.chars().count() < 2 {
        return 0.5;
    }
    if a.is_empty() != b.is_empty() {
        return 0.3;
    }

    let lev = levenshtein_similarity(&a, &b);
    let sem = semantic_similarity(&a, &b);
    let score = lev.max(sem);
    if score >= 0.7 {
        (score + 0.15).min(1.0)
    } else {
        score
    }
}

fn normalize(input: &str) -> String {
    let lowered = input.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `1 - editDistance / max(len)`, space-optimized two-row DP
fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    1.0 - prev[b.len()] as f64 / max_len as f64
}

fn semantic_similarity(a: &str, b: &str) -> f64 {
    let mut best: f64 = 0.0;

    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let (shorter, longer, short_len, long_len) = if len_a <= len_b {
        (a, b, len_a, len_b)
    } else {
        (b, a, len_b, len_a)
    };

    // Containment: the shorter string appearing whole in the longer
    if short_len > 0 && longer.contains(shorter) {
        best = best.max(0.8 * short_len as f64 / long_len as f64);
    }

    // Common prefix, when it is long enough to mean something
    let prefix = a
        .chars()
        .zip(b.chars())
        .take_while(|(ca, cb)| ca == cb)
        .count();
    if prefix > 3 {
        let max_len = len_a.max(len_b);
        best = best.max(0.6 * prefix as f64 / max_len as f64);
    }

    // Word overlap, ignoring short glue tokens
    let words_a: Vec<&str> = a.split(' ').filter(|w| w.chars().count() >= 3).collect();
    let words_b: Vec<&str> = b.split(' ').filter(|w| w.chars().count() >= 3).collect();
    let max_words = words_a.len().max(words_b.len());
    if max_words > 0 {
        let matching = words_a.iter().filter(|w| words_b.contains(w)).count();
        best = best.max(0.7 * matching as f64 / max_words as f64);
    }

    best
}
