//! Indexed placement protocol (C11) — deterministic apply of a
//! [`PlacementPlan`] onto a sentence-segmented report.

use super::segment::{is_table_row, segment, Sentence};
use crate::hash::Hash6;
use crate::types::{Citation, Placement, PlacementPlan};
use std::collections::HashSet;

/// Dynamic cap on how many placements the LLM may return, per report size.
pub fn placement_cap(sentence_count: usize) -> usize {
    let scaled = (sentence_count as f64 * 0.30).round() as usize;
    scaled.clamp(25, 100)
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    pub cited_report: String,
    pub applied: usize,
    pub attempted: usize,
}

impl ApplyOutcome {
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.applied as f64 / self.attempted as f64
        }
    }

    /// Per §4.10.5: applied >= 1 and success_rate >= 0.5, or applied >= 5.
    pub fn passes(&self) -> bool {
        (self.applied >= 1 && self.success_rate() >= 0.5) || self.applied >= 5
    }
}

/// Applies `plan` to `report`, following the apply protocol: placements are
/// sorted by descending sentence index (so marker insertion never shifts
/// the offsets of not-yet-processed sentences), bounds/id/hash/table-row
/// checks reject invalid placements, and surviving ones get `[id1][id2]…`
/// appended before trailing whitespace.
pub fn apply(report: &str, plan: &PlacementPlan, citations: &[Citation]) -> ApplyOutcome {
    let sentences = segment(report);
    let citation_count = citations.len() as u32;

    let mut ordered = plan.placements.clone();
    ordered.sort_by(|a, b| b.sentence_index.cmp(&a.sentence_index));

    let mut markers: Vec<Option<String>> = vec![None; sentences.len()];
    let mut applied = 0usize;
    let attempted = ordered.len();

    for placement in &ordered {
        if let Some(marker) = resolve_placement(placement, &sentences, citation_count) {
            let (target_index, ids) = marker;
            if markers[target_index].is_none() {
                markers[target_index] = Some(render_marker(&ids));
                applied += 1;
            }
        }
    }

    let cited_report = render(&sentences, &markers);
    ApplyOutcome { cited_report, applied, attempted }
}

/// Validates one placement against bounds, citation ids, hash, and
/// table-row rules. Returns the resolved (possibly hash-shifted) sentence
/// index and the surviving citation ids, or `None` if it must be rejected.
fn resolve_placement(
    placement: &Placement,
    sentences: &[Sentence],
    citation_count: u32,
) -> Option<(usize, Vec<u32>)> {
    if placement.sentence_index >= sentences.len() {
        return None;
    }

    let mut seen = HashSet::new();
    let ids: Vec<u32> = placement
        .citation_ids
        .iter()
        .copied()
        .filter(|id| *id >= 1 && *id <= citation_count && seen.insert(*id))
        .collect();
    if ids.is_empty() {
        return None;
    }

    let target_index = match &placement.sentence_hash {
        None => placement.sentence_index,
        Some(hash_hex) => {
            let Some(expected) = Hash6::from_hex(hash_hex) else {
                return Some((placement.sentence_index, ids));
            };
            let at = Hash6::of_sentence(&sentences[placement.sentence_index].text);
            if at == expected {
                placement.sentence_index
            } else {
                let candidate = [placement.sentence_index.checked_sub(1), Some(placement.sentence_index + 1)];
                let shifted = candidate.into_iter().flatten().find(|idx| {
                    sentences.get(*idx).map(|s| Hash6::of_sentence(&s.text) == expected).unwrap_or(false)
                });
                match shifted {
                    Some(idx) => idx,
                    None => return None, // strict: no lenient apply
                }
            }
        }
    };

    if is_table_row(&sentences[target_index].text) {
        return None;
    }

    Some((target_index, ids))
}

fn render_marker(ids: &[u32]) -> String {
    ids.iter().map(|id| format!("[{id}]")).collect()
}

/// Reassembles sentences with markers appended before trailing whitespace.
fn render(sentences: &[Sentence], markers: &[Option<String>]) -> String {
    let mut out = String::new();
    for (sentence, marker) in sentences.iter().zip(markers) {
        match marker {
            None => out.push_str(&sentence.text),
            Some(m) => {
                let trimmed_end = sentence.text.trim_end_matches([' ', '\t', '\n']);
                let trailing = &sentence.text[trimmed_end.len()..];
                out.push_str(trimmed_end);
                out.push_str(m);
                out.push_str(trailing);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(id: u32) -> Citation {
        Citation { id, url: format!("https://example.com/{id}"), title: "t".into(), source: "s".into(), snippet: "sn".into(), credibility: 0.8, quality: 0.8 }
    }

    fn placement(index: usize, ids: Vec<u32>) -> Placement {
        Placement { sentence_index: index, sentence_hash: None, citation_ids: ids, confidence: "high".into(), reason: "r".into() }
    }

    #[test]
    fn placement_cap_is_bounded() {
        assert_eq!(placement_cap(10), 25);
        assert_eq!(placement_cap(1000), 100);
        assert_eq!(placement_cap(200), 60);
    }

    #[test]
    fn applies_markers_before_trailing_whitespace() {
        let report = "Paris is the capital. It has many museums.";
        let plan = PlacementPlan { placements: vec![placement(0, vec![1])] };
        let citations = vec![citation(1)];
        let outcome = apply(report, &plan, &citations);
        assert_eq!(outcome.applied, 1);
        assert!(outcome.cited_report.starts_with("Paris is the capital.[1]"));
    }

    #[test]
    fn out_of_bounds_index_is_rejected() {
        let report = "Only one sentence here.";
        let plan = PlacementPlan { placements: vec![placement(5, vec![1])] };
        let outcome = apply(report, &plan, &[citation(1)]);
        assert_eq!(outcome.applied, 0);
    }

    #[test]
    fn invalid_citation_ids_are_dropped_and_placement_rejected_if_none_survive() {
        let report = "A sentence.";
        let plan = PlacementPlan { placements: vec![placement(0, vec![99])] };
        let outcome = apply(report, &plan, &[citation(1)]);
        assert_eq!(outcome.applied, 0);
    }

    #[test]
    fn hash_mismatch_falls_back_to_adjacent_sentence() {
        let report = "First sentence here. Second sentence here.";
        let sentences = segment(report);
        let correct_hash = Hash6::of_sentence(&sentences[1].text).as_str().to_string();
        let mut p = placement(0, vec![1]);
        p.sentence_hash = Some(correct_hash);
        let plan = PlacementPlan { placements: vec![p] };
        let outcome = apply(report, &plan, &[citation(1)]);
        assert_eq!(outcome.applied, 1);
        assert!(outcome.cited_report.contains("Second sentence here.[1]"));
    }

    #[test]
    fn hash_mismatch_with_no_adjacent_match_is_rejected() {
        let report = "First sentence here. Second sentence here.";
        let mut p = placement(0, vec![1]);
        p.sentence_hash = Some("ffffff".into());
        let plan = PlacementPlan { placements: vec![p] };
        let outcome = apply(report, &plan, &[citation(1)]);
        assert_eq!(outcome.applied, 0);
    }

    #[test]
    fn table_rows_reject_placements() {
        let report = "| Name | Age |\nSecond sentence.";
        let plan = PlacementPlan { placements: vec![placement(0, vec![1])] };
        let outcome = apply(report, &plan, &[citation(1)]);
        assert_eq!(outcome.applied, 0);
    }

    #[test]
    fn descending_apply_order_prevents_offset_drift() {
        let report = "One. Two. Three.";
        let plan = PlacementPlan {
            placements: vec![placement(0, vec![1]), placement(1, vec![2]), placement(2, vec![3])],
        };
        let outcome = apply(report, &plan, &[citation(1), citation(2), citation(3)]);
        assert_eq!(outcome.applied, 3);
        assert!(outcome.cited_report.contains("One.[1]"));
        assert!(outcome.cited_report.contains("Two.[2]"));
        assert!(outcome.cited_report.contains("Three.[3]"));
    }

    #[test]
    fn passes_policy_with_five_applied_even_at_low_success_rate() {
        let outcome = ApplyOutcome { cited_report: String::new(), applied: 5, attempted: 20 };
        assert!(outcome.passes());
    }

    #[test]
    fn fails_policy_with_zero_applied() {
        let outcome = ApplyOutcome { cited_report: String::new(), applied: 0, attempted: 3 };
        assert!(!outcome.passes());
    }
}
