//! Inline citation protocol — a last-resort fallback used when the indexed
//! protocol's partial-success policy rejects the placement plan.
//!
//! The LLM is given the report and asked to insert `[n]` markers directly
//! into the text. Since this can't be constrained the way indexed placement
//! can, the only verification available is: did the model change anything
//! beyond inserting markers? That's checked via a normalized edit-distance
//! ratio against the original report.

use super::normalize::canonicalize;
use std::collections::HashMap;

/// Full Levenshtein distance is exact but O(n*m); above this rune count we
/// switch to a cheaper sampled estimator.
const FULL_ALGORITHM_MAX_RUNES: usize = 10_000;
const SAMPLE_CHUNKS: usize = 10;
const TOLERANCE_RATIO: f64 = 0.15;

/// Strips any `[n]` marker (single or chained, e.g. `[1][2]`) from `text`,
/// returning the marker-free content for edit-distance comparison.
fn strip_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '[' {
            let mut lookahead = chars.clone();
            let mut digits = String::new();
            while let Some(&d) = lookahead.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    lookahead.next();
                } else {
                    break;
                }
            }
            if !digits.is_empty() && lookahead.peek() == Some(&']') {
                lookahead.next();
                chars = lookahead;
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Edit distance ratio between two canonicalized strings: 0.0 means
/// identical, 1.0 means completely different. Uses the full Levenshtein
/// algorithm for texts up to [`FULL_ALGORITHM_MAX_RUNES`] runes; beyond that,
/// splits both strings into [`SAMPLE_CHUNKS`] aligned chunks and averages
/// the per-chunk ratio as an estimate.
pub fn edit_distance_ratio(a: &str, b: &str) -> f64 {
    let a = canonicalize(a);
    let b = canonicalize(b);

    if a.chars().count() <= FULL_ALGORITHM_MAX_RUNES && b.chars().count() <= FULL_ALGORITHM_MAX_RUNES {
        return full_ratio(&a, &b);
    }

    sampled_ratio(&a, &b)
}

fn full_ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    strsim::levenshtein(a, b) as f64 / max_len as f64
}

fn sampled_ratio(a: &str, b: &str) -> f64 {
    let a_chunks = split_chunks(a, SAMPLE_CHUNKS);
    let b_chunks = split_chunks(b, SAMPLE_CHUNKS);
    let n = a_chunks.len().max(b_chunks.len()).max(1);

    let mut total = 0.0;
    for i in 0..n {
        let ca = a_chunks.get(i).map(String::as_str).unwrap_or("");
        let cb = b_chunks.get(i).map(String::as_str).unwrap_or("");
        total += full_ratio(ca, cb);
    }
    total / n as f64
}

fn split_chunks(text: &str, n: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let chunk_size = chars.len().div_ceil(n).max(1);
    chars.chunks(chunk_size).map(|c| c.iter().collect()).collect()
}

#[derive(Debug, Clone, Default)]
pub struct InlineResult {
    pub cited_report: String,
    /// True when the edit-distance ratio (after marker stripping) is within
    /// tolerance, i.e. the model didn't rewrite content beyond inserting markers.
    pub verified: bool,
    pub redundant_citations: Vec<(usize, Vec<u32>)>,
    /// Count of sentences that carry at least one surviving marker.
    pub applied: usize,
}

/// Validates an LLM-produced inline-cited report against the original:
/// scrubs out-of-range citation numbers, reports redundant same-sentence
/// citations, and verifies the marker-stripped text hasn't drifted from the
/// original beyond the tolerated edit-distance ratio.
pub fn validate(original_report: &str, cited_report: &str, citation_count: u32) -> InlineResult {
    let scrubbed = scrub_out_of_range(cited_report, citation_count);
    let ratio = edit_distance_ratio(original_report, &strip_markers(&scrubbed));
    let verified = ratio <= TOLERANCE_RATIO;
    let redundant = find_redundant_same_sentence(&scrubbed);
    let applied = super::segment::segment(&scrubbed).iter().filter(|s| !extract_ids(&s.text).is_empty()).count();

    InlineResult { cited_report: scrubbed, verified, redundant_citations: redundant, applied }
}

fn scrub_out_of_range(text: &str, citation_count: u32) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '[' {
            let mut lookahead = chars.clone();
            let mut digits = String::new();
            while let Some(&d) = lookahead.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    lookahead.next();
                } else {
                    break;
                }
            }
            if !digits.is_empty() && lookahead.peek() == Some(&']') {
                lookahead.next();
                let id: u32 = digits.parse().unwrap_or(0);
                if id >= 1 && id <= citation_count {
                    out.push('[');
                    out.push_str(&digits);
                    out.push(']');
                }
                chars = lookahead;
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Sentence-splits `text` (by the shared segmenter) and flags any sentence
/// that contains the same citation id more than once.
fn find_redundant_same_sentence(text: &str) -> Vec<(usize, Vec<u32>)> {
    let sentences = super::segment::segment(text);
    let mut redundant = Vec::new();
    for sentence in &sentences {
        let ids = extract_ids(&sentence.text);
        let mut seen: HashMap<u32, u32> = HashMap::new();
        for id in &ids {
            *seen.entry(*id).or_insert(0) += 1;
        }
        let dupes: Vec<u32> = seen.into_iter().filter(|(_, count)| *count > 1).map(|(id, _)| id).collect();
        if !dupes.is_empty() {
            redundant.push((sentence.index, dupes));
        }
    }
    redundant
}

fn extract_ids(text: &str) -> Vec<u32> {
    let mut ids = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '[' {
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            if !digits.is_empty() && chars.peek() == Some(&']') {
                chars.next();
                if let Ok(id) = digits.parse() {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_ratio_is_symmetric() {
        let pairs = [
            ("Paris is the capital.", "Completely different sentence."),
            ("identical text", "identical text"),
            ("", "non-empty"),
            ("short", "a much longer string than the other one"),
        ];
        for (a, b) in pairs {
            assert_eq!(edit_distance_ratio(a, b), edit_distance_ratio(b, a));
        }
    }

    #[test]
    fn marker_only_insertion_passes_verification() {
        let original = "Paris is the capital. It has many museums.";
        let cited = "Paris is the capital.[1] It has many museums.[2]";
        let result = validate(original, cited, 2);
        assert!(result.verified);
    }

    #[test]
    fn heavy_rewrite_fails_verification() {
        let original = "Paris is the capital of France and has a long history.";
        let cited = "Completely different sentence that bears no resemblance whatsoever to the source.";
        let result = validate(original, cited, 1);
        assert!(!result.verified);
    }

    #[test]
    fn out_of_range_citation_ids_are_scrubbed() {
        let original = "A sentence.";
        let cited = "A sentence.[99]";
        let result = validate(original, cited, 2);
        assert!(!result.cited_report.contains("[99]"));
    }

    #[test]
    fn redundant_same_sentence_citations_are_reported() {
        let cited = "A claim backed twice.[1][1] Another claim.[2]";
        let result = validate("A claim backed twice. Another claim.", cited, 2);
        assert_eq!(result.redundant_citations.len(), 1);
    }

    #[test]
    fn edit_distance_ratio_of_identical_text_is_zero() {
        assert_eq!(edit_distance_ratio("hello world", "hello world"), 0.0);
    }

    #[test]
    fn sampled_ratio_used_for_long_texts() {
        let a = "word ".repeat(3000);
        let b = a.clone();
        assert_eq!(edit_distance_ratio(&a, &b), 0.0);
    }
}
