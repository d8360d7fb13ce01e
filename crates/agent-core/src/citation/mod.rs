//! Citation Placement Engine (C11).
//!
//! Converts a report plus candidate citations into a cited report. The
//! indexed placement protocol is preferred; the inline protocol is a
//! last-resort fallback used once when indexed placement's partial-success
//! policy rejects the result. A verify-backed variant restricts allowed
//! citation ids to an upstream-approved `ClaimMapping` bundle and appends a
//! `Sources` section.

pub mod indexed;
pub mod inline;
pub mod normalize;
pub mod segment;

use crate::clients::LlmServiceClient;
use crate::error::AgentCoreError;
use crate::types::{Citation, ClaimMapping, PlacementPlan};
use percent_encoding::percent_decode_str;
use std::collections::HashSet;
use std::sync::Arc;

pub use indexed::{placement_cap, ApplyOutcome};
pub use inline::InlineResult;

#[derive(Debug, Clone)]
pub struct CitationResult {
    pub cited_report: String,
    pub protocol_used: ProtocolUsed,
    pub applied: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolUsed {
    Indexed,
    InlineFallback,
}

pub struct CitationEngine {
    llm: Arc<dyn LlmServiceClient>,
}

impl CitationEngine {
    pub fn new(llm: Arc<dyn LlmServiceClient>) -> Self {
        Self { llm }
    }

    /// Runs the indexed protocol first; on policy failure, falls back to
    /// the inline protocol exactly once.
    pub async fn place(
        &self,
        report: &str,
        citations: &[Citation],
        agent_id: &str,
    ) -> Result<CitationResult, AgentCoreError> {
        let sentences = segment::segment(report);
        let plan = self.request_indexed_plan(report, &sentences, citations, agent_id).await?;
        let outcome = indexed::apply(report, &plan, citations);

        if outcome.passes() {
            return Ok(CitationResult {
                cited_report: outcome.cited_report,
                protocol_used: ProtocolUsed::Indexed,
                applied: outcome.applied,
            });
        }

        let inline_cited = self.request_inline_citations(report, citations, agent_id).await?;
        let validated = inline::validate(report, &inline_cited, citations.len() as u32);
        Ok(CitationResult {
            cited_report: validated.cited_report,
            protocol_used: ProtocolUsed::InlineFallback,
            applied: validated.applied,
        })
    }

    /// Verify-backed variant: claim-source matching was already performed
    /// upstream, so this only places the pre-approved citation ids and
    /// appends a Sources section.
    pub async fn place_verified(
        &self,
        report: &str,
        citations: &[Citation],
        mappings: &[ClaimMapping],
        agent_id: &str,
    ) -> Result<CitationResult, AgentCoreError> {
        let allowed: HashSet<u32> = mappings.iter().flat_map(|m| m.supporting_citation_ids.iter().copied()).collect();

        let sentences = segment::segment(report);
        let plan = self.request_indexed_plan(report, &sentences, citations, agent_id).await?;
        let restricted = PlacementPlan {
            placements: plan
                .placements
                .into_iter()
                .map(|mut p| {
                    p.citation_ids.retain(|id| allowed.contains(id));
                    p
                })
                .filter(|p| !p.citation_ids.is_empty())
                .collect(),
        };

        let outcome = indexed::apply(report, &restricted, citations);
        let with_sources = append_sources_section(&outcome.cited_report, citations, &allowed);

        Ok(CitationResult {
            cited_report: with_sources,
            protocol_used: ProtocolUsed::Indexed,
            applied: outcome.applied,
        })
    }

    async fn request_indexed_plan(
        &self,
        report: &str,
        sentences: &[segment::Sentence],
        citations: &[Citation],
        agent_id: &str,
    ) -> Result<PlacementPlan, AgentCoreError> {
        let prompt = build_indexed_prompt(report, sentences, citations);
        let req = crate::clients::AgentQueryRequest {
            query: prompt,
            context: serde_json::Value::Null,
            max_tokens: None,
            temperature: None,
            agent_id: agent_id.to_string(),
            model_tier: None,
            forced_tool_calls: None,
            session_context: None,
        };
        let response = self.llm.agent_query(req).await?;
        let stripped = strip_markdown_fences(&response.response);
        Ok(serde_json::from_str(stripped).unwrap_or_default())
    }

    async fn request_inline_citations(
        &self,
        report: &str,
        citations: &[Citation],
        agent_id: &str,
    ) -> Result<String, AgentCoreError> {
        let prompt = build_inline_prompt(report, citations);
        let req = crate::clients::AgentQueryRequest {
            query: prompt,
            context: serde_json::Value::Null,
            max_tokens: None,
            temperature: None,
            agent_id: agent_id.to_string(),
            model_tier: None,
            forced_tool_calls: None,
            session_context: None,
        };
        let response = self.llm.agent_query(req).await?;
        Ok(response.response)
    }
}

fn build_indexed_prompt(report: &str, sentences: &[segment::Sentence], citations: &[Citation]) -> String {
    let numbered = sentences
        .iter()
        .map(|s| format!("[{}] hash={}", s.index, crate::hash::Hash6::of_sentence(&s.text)))
        .collect::<Vec<_>>()
        .join("\n");
    let citation_list = citations
        .iter()
        .map(|c| format!("{}. {} ({}): {}", c.id, c.title, c.source, c.snippet))
        .collect::<Vec<_>>()
        .join("\n");
    let cap = placement_cap(sentences.len());

    format!(
        "Report:\n{report}\n\nSentence hash table:\n{numbered}\n\nCitations:\n{citation_list}\n\n\
         Return JSON {{\"placements\": [...]}} with at most {cap} entries. Each placement has \
         sentence_index, sentence_hash (optional), citation_ids (1-based), confidence, reason."
    )
}

fn build_inline_prompt(report: &str, citations: &[Citation]) -> String {
    let citation_list = citations
        .iter()
        .map(|c| format!("{}. {} ({}): {}", c.id, c.title, c.source, c.snippet))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Insert inline citation markers like [1] or [1][2] into the report below, \
         without changing any other content. Citations:\n{citation_list}\n\nReport:\n{report}"
    )
}

fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    let body = body.strip_prefix('\n').unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Appends a `Sources` section listing every known citation, sorted by id,
/// labeled "Used inline" if placed at least once in the cited report body
/// (i.e. present in `allowed`) or "Additional source" otherwise, with
/// percent-decoded URLs.
fn append_sources_section(cited_report: &str, citations: &[Citation], allowed: &HashSet<u32>) -> String {
    let mut sorted: Vec<&Citation> = citations.iter().collect();
    sorted.sort_by_key(|c| c.id);

    let mut section = String::from("\n\nSources:\n");
    for c in sorted {
        let label = if allowed.contains(&c.id) { "Used inline" } else { "Additional source" };
        let url = percent_decode_str(&c.url).decode_utf8_lossy();
        section.push_str(&format!("[{}] {} ({label}): {}\n", c.id, c.title, url));
    }

    format!("{cited_report}{section}")
}
