//! Research Refiner (C9).
//!
//! One-shot LLM call that turns a raw query into a structured research plan.
//! Never propagates a decode failure — falls back to a degenerate
//! single-area plan instead.

use crate::clients::{AgentQueryRequest, LlmServiceClient};
use crate::error::AgentCoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAX_TRANSIENT_RETRIES: u32 = 3;
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Company,
    Industry,
    Scientific,
    Comparative,
    Exploratory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchDimension {
    pub name: String,
    pub questions: Vec<String>,
    pub source_types: Vec<String>,
    pub priority: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub refined_query: String,
    pub research_areas: Vec<String>,
    pub rationale: String,
    pub query_type: QueryType,
    pub research_dimensions: Vec<ResearchDimension>,
    #[serde(default)]
    pub canonical_name: Option<String>,
    #[serde(default)]
    pub exact_queries: Vec<String>,
    #[serde(default)]
    pub official_domains: Vec<String>,
    #[serde(default)]
    pub disambiguation_terms: Vec<String>,
    #[serde(default)]
    pub localization_needed: bool,
    #[serde(default)]
    pub target_languages: Vec<String>,
    #[serde(default)]
    pub localized_names: Vec<String>,
    #[serde(skip)]
    pub detected_language: Option<String>,
}

impl ResearchPlan {
    fn degenerate(query: &str, reason: &str) -> Self {
        Self {
            refined_query: query.to_string(),
            research_areas: vec![query.to_string()],
            rationale: format!("fallback plan: {reason}"),
            query_type: QueryType::Exploratory,
            research_dimensions: Vec::new(),
            canonical_name: None,
            exact_queries: Vec::new(),
            official_domains: Vec::new(),
            disambiguation_terms: Vec::new(),
            localization_needed: false,
            target_languages: Vec::new(),
            localized_names: Vec::new(),
            detected_language: None,
        }
    }
}

fn build_prompt(query: &str) -> String {
    format!(
        "Return a JSON object describing a research plan for the query below. \
         Required fields: refined_query, research_areas, rationale, \
         query_type (one of company|industry|scientific|comparative|exploratory), \
         research_dimensions (array of {{name, questions[2-4], source_types, priority}}), \
         canonical_name, exact_queries, official_domains, disambiguation_terms, \
         localization_needed, target_languages, localized_names.\n\nQuery: {query}"
    )
}

/// Strips a leading/trailing Markdown code fence (```` ``` ```` or ```` ```json ````).
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    let body = body.strip_prefix('\n').unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Unicode-range heuristic language detector. Returns `(language, confidence)`.
fn detect_language(text: &str) -> (&'static str, f64) {
    let mut cjk = 0usize;
    let mut cyrillic = 0usize;
    let mut arabic = 0usize;
    let mut latin = 0usize;
    let mut total = 0usize;

    for c in text.chars() {
        let cp = c as u32;
        if c.is_whitespace() || c.is_ascii_punctuation() {
            continue;
        }
        total += 1;
        match cp {
            0x4E00..=0x9FFF | 0x3040..=0x30FF | 0xAC00..=0xD7A3 => cjk += 1,
            0x0400..=0x04FF => cyrillic += 1,
            0x0600..=0x06FF => arabic += 1,
            0x0041..=0x005A | 0x0061..=0x007A | 0x00C0..=0x024F => latin += 1,
            _ => {}
        }
    }

    if total == 0 {
        return ("unknown", 0.0);
    }

    let (label, count) = [("cjk", cjk), ("cyrillic", cyrillic), ("arabic", arabic), ("latin", latin)]
        .into_iter()
        .max_by_key(|(_, c)| *c)
        .unwrap_or(("unknown", 0));

    let confidence = count as f64 / total as f64;
    (label, confidence)
}

pub struct ResearchRefiner {
    llm: Arc<dyn LlmServiceClient>,
}

impl ResearchRefiner {
    pub fn new(llm: Arc<dyn LlmServiceClient>) -> Self {
        Self { llm }
    }

    pub async fn refine(&self, query: &str, agent_id: &str) -> ResearchPlan {
        let prompt = build_prompt(query);
        let mut attempt = 0;
        let mut plan = loop {
            let req = AgentQueryRequest {
                query: prompt.clone(),
                context: serde_json::Value::Null,
                max_tokens: None,
                temperature: None,
                agent_id: agent_id.to_string(),
                model_tier: None,
                forced_tool_calls: None,
                session_context: None,
            };

            match self.llm.agent_query(req).await {
                Ok(response) => break self.decode_or_degenerate(query, &response.response),
                Err(e) if e.is_retryable() && attempt < MAX_TRANSIENT_RETRIES => {
                    attempt += 1;
                    log::debug!("research_refiner: transient failure, retry {attempt}/{MAX_TRANSIENT_RETRIES}: {e}");
                    continue;
                }
                Err(e) => break ResearchPlan::degenerate(query, &e.to_string()),
            }
        };

        let (language, confidence) = detect_language(query);
        plan.detected_language = Some(language.to_string());
        if confidence < LOW_CONFIDENCE_THRESHOLD {
            log::debug!("research_refiner: low-confidence language detection ({language}, {confidence:.2}) for query {query:?}");
        }

        plan
    }

    fn decode_or_degenerate(&self, original_query: &str, raw: &str) -> ResearchPlan {
        let stripped = strip_markdown_fences(raw);
        match serde_json::from_str::<ResearchPlan>(stripped) {
            Ok(plan) => plan,
            Err(e) => {
                log::debug!("research_refiner: decode failed, falling back to degenerate plan: {e}");
                ResearchPlan::degenerate(original_query, "could not decode research plan JSON")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::AgentQueryResponse;
    use crate::test_support::FakeLlmServiceBuilder;

    fn response_with(body: &str) -> AgentQueryResponse {
        AgentQueryResponse {
            success: true,
            response: body.to_string(),
            tokens_used: Some(10),
            model_used: None,
            provider: None,
            finish_reason: Some("stop".into()),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn decodes_valid_json_plan() {
        let body = serde_json::json!({
            "refined_query": "Acme Corp overview",
            "research_areas": ["founders"],
            "rationale": "direct lookup",
            "query_type": "company",
            "research_dimensions": [],
        })
        .to_string();
        let llm = Arc::new(FakeLlmServiceBuilder::new().with_query_response(response_with(&body)).build());
        let refiner = ResearchRefiner::new(llm);
        let plan = refiner.refine("tell me about Acme Corp", "agent-1").await;
        assert_eq!(plan.refined_query, "Acme Corp overview");
        assert_eq!(plan.query_type, QueryType::Company);
    }

    #[tokio::test]
    async fn strips_markdown_fences_before_decoding() {
        let body = format!(
            "```json\n{}\n```",
            serde_json::json!({
                "refined_query": "x", "research_areas": ["x"], "rationale": "r",
                "query_type": "exploratory", "research_dimensions": [],
            })
        );
        let llm = Arc::new(FakeLlmServiceBuilder::new().with_query_response(response_with(&body)).build());
        let refiner = ResearchRefiner::new(llm);
        let plan = refiner.refine("x", "agent-1").await;
        assert_eq!(plan.refined_query, "x");
    }

    #[tokio::test]
    async fn decode_failure_yields_degenerate_plan_not_error() {
        let llm = Arc::new(FakeLlmServiceBuilder::new().with_query_response(response_with("not json")).build());
        let refiner = ResearchRefiner::new(llm);
        let plan = refiner.refine("original query text", "agent-1").await;
        assert_eq!(plan.research_areas, vec!["original query text".to_string()]);
        assert_eq!(plan.query_type, QueryType::Exploratory);
    }

    #[test]
    fn detects_cjk_text() {
        let (lang, confidence) = detect_language("这是一个中文查询");
        assert_eq!(lang, "cjk");
        assert!(confidence > 0.5);
    }

    #[test]
    fn detects_latin_text() {
        let (lang, confidence) = detect_language("what is the capital of France");
        assert_eq!(lang, "latin");
        assert!(confidence > 0.5);
    }

    #[test]
    fn strip_markdown_fences_handles_bare_json() {
        assert_eq!(strip_markdown_fences("{\"a\":1}"), "{\"a\":1}");
    }
}
