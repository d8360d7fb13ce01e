//! Subquery Generator (C10).
//!
//! Given a query, known coverage gaps, and a research iteration number,
//! emits up to N targeted subqueries. Falls back to a static classifier-
//! driven generator when the LLM response fails to decode.

use crate::clients::{AgentQueryRequest, LlmServiceClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_MAX_SUBQUERIES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subquery {
    pub id: String,
    pub query: String,
    pub target_gap: String,
    pub priority: u32,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    #[serde(default)]
    pub source_types: Vec<String>,
    #[serde(default)]
    pub tool_parameters: serde_json::Value,
    #[serde(default)]
    pub source_guidance: String,
    #[serde(default)]
    pub boundaries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SubqueryResponse {
    subqueries: Vec<Subquery>,
}

#[derive(Debug, Clone)]
pub struct SubqueryGenInput {
    pub query: String,
    pub coverage_gaps: Vec<String>,
    pub iteration: u32,
    pub canonical_name: Option<String>,
    pub target_languages: Vec<String>,
    pub max_subqueries: usize,
}

impl SubqueryGenInput {
    pub fn new(query: impl Into<String>, coverage_gaps: Vec<String>, iteration: u32) -> Self {
        Self {
            query: query.into(),
            coverage_gaps,
            iteration,
            canonical_name: None,
            target_languages: Vec::new(),
            max_subqueries: DEFAULT_MAX_SUBQUERIES,
        }
    }
}

struct InfoTypeMatcher {
    info_type: &'static str,
    keywords: &'static [&'static str],
    templates: &'static [&'static str],
}

const INFO_TYPE_MATCHERS: &[InfoTypeMatcher] = &[
    InfoTypeMatcher {
        info_type: "founder_ceo",
        keywords: &["founder", "ceo", "chief executive", "创始人", "首席执行官", "創業者", "代表取締役"],
        templates: &["who founded {entity} and who is the current CEO", "{entity} founder CEO leadership team"],
    },
    InfoTypeMatcher {
        info_type: "funding_history",
        keywords: &["funding", "investment", "raised", "series", "融资", "投资", "資金調達"],
        templates: &["{entity} funding history and investment rounds", "{entity} total capital raised"],
    },
    InfoTypeMatcher {
        info_type: "employee_count",
        keywords: &["employee", "headcount", "staff size", "员工", "員工数"],
        templates: &["{entity} number of employees", "{entity} headcount"],
    },
    InfoTypeMatcher {
        info_type: "founding_year",
        keywords: &["founded", "founding year", "established", "成立于", "設立"],
        templates: &["what year was {entity} founded"],
    },
    InfoTypeMatcher {
        info_type: "headquarters",
        keywords: &["headquarters", "hq", "based in", "总部", "本社"],
        templates: &["where is {entity} headquartered"],
    },
    InfoTypeMatcher {
        info_type: "revenue",
        keywords: &["revenue", "annual sales", "turnover", "营收", "収益"],
        templates: &["{entity} annual revenue", "{entity} revenue figures"],
    },
];

const REGIONAL_SOURCE_MAP: &[(&str, &str)] = &[
    ("zh", "site:sec.gov.cn OR site:crunchbase.com"),
    ("ja", "site:prtimes.jp OR site:crunchbase.com"),
    ("es", "site:crunchbase.com OR site:elpais.com"),
];

fn build_prompt(input: &SubqueryGenInput) -> String {
    format!(
        "Given the query \"{}\" at research iteration {}, with known coverage gaps: {:?}, \
         return JSON {{\"subqueries\": [...]}} with up to {} entries. Each subquery object has \
         id, query, target_gap, priority, suggested_tools, source_types, tool_parameters, \
         source_guidance, boundaries.",
        input.query, input.iteration, input.coverage_gaps, input.max_subqueries
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

pub struct SubqueryGenerator {
    llm: Arc<dyn LlmServiceClient>,
}

impl SubqueryGenerator {
    pub fn new(llm: Arc<dyn LlmServiceClient>) -> Self {
        Self { llm }
    }

    pub async fn generate(&self, input: &SubqueryGenInput, agent_id: &str) -> Vec<Subquery> {
        let req = AgentQueryRequest {
            query: build_prompt(input),
            context: serde_json::Value::Null,
            max_tokens: None,
            temperature: None,
            agent_id: agent_id.to_string(),
            model_tier: None,
            forced_tool_calls: None,
            session_context: None,
        };

        match self.llm.agent_query(req).await {
            Ok(response) => {
                let stripped = strip_markdown_fences(&response.response);
                match serde_json::from_str::<SubqueryResponse>(stripped) {
                    Ok(parsed) => {
                        let mut subqueries = parsed.subqueries;
                        subqueries.truncate(input.max_subqueries.max(1));
                        subqueries
                    }
                    Err(e) => {
                        log::debug!("subquery: decode failed, using fallback generator: {e}");
                        fallback_generate(input)
                    }
                }
            }
            Err(e) => {
                log::debug!("subquery: llm call failed, using fallback generator: {e}");
                fallback_generate(input)
            }
        }
    }
}

/// Static classifier-driven fallback used when the LLM response cannot be
/// decoded (or the call itself fails). Matches each coverage gap's
/// description against known info-type keyword sets, emits 1-2 entity-gap
/// queries per match, then appends a site-filter query and any
/// regional-language queries implied by `target_languages`.
pub fn fallback_generate(input: &SubqueryGenInput) -> Vec<Subquery> {
    let entity = input.canonical_name.clone().unwrap_or_else(|| input.query.clone());
    let mut out = Vec::new();
    let mut next_id = 1u32;

    for gap in &input.coverage_gaps {
        let gap_lower = gap.to_ascii_lowercase();
        if let Some(matcher) = INFO_TYPE_MATCHERS.iter().find(|m| {
            m.keywords.iter().any(|kw| gap_lower.contains(&kw.to_ascii_lowercase()) || gap.contains(kw))
        }) {
            for template in matcher.templates.iter().take(2) {
                out.push(Subquery {
                    id: format!("sq-{next_id}"),
                    query: template.replace("{entity}", &entity),
                    target_gap: gap.clone(),
                    priority: 1,
                    suggested_tools: vec!["web_search".to_string()],
                    source_types: vec![matcher.info_type.to_string()],
                    tool_parameters: serde_json::Value::Null,
                    source_guidance: format!("fallback classifier matched info type {}", matcher.info_type),
                    boundaries: Vec::new(),
                });
                next_id += 1;
            }
        }
    }

    let domains = ["crunchbase.com", "linkedin.com", "bloomberg.com"];
    let site_filter = domains.iter().map(|d| format!("site:{d}")).collect::<Vec<_>>().join(" OR ");
    out.push(Subquery {
        id: format!("sq-{next_id}"),
        query: format!("{entity} {site_filter}"),
        target_gap: "general coverage".to_string(),
        priority: 2,
        suggested_tools: vec!["web_search".to_string()],
        source_types: vec!["site_filter".to_string()],
        tool_parameters: serde_json::Value::Null,
        source_guidance: "site-filtered fallback query".to_string(),
        boundaries: Vec::new(),
    });
    next_id += 1;

    for lang in &input.target_languages {
        if let Some((_, sources)) = REGIONAL_SOURCE_MAP.iter().find(|(code, _)| code == lang) {
            out.push(Subquery {
                id: format!("sq-{next_id}"),
                query: format!("{entity} {sources}"),
                target_gap: format!("regional coverage ({lang})"),
                priority: 3,
                suggested_tools: vec!["web_search".to_string()],
                source_types: vec!["regional".to_string()],
                tool_parameters: serde_json::Value::Null,
                source_guidance: format!("regional source mapping for {lang}"),
                boundaries: Vec::new(),
            });
            next_id += 1;
        }
    }

    out.truncate(input.max_subqueries.max(out.len().min(input.max_subqueries + input.target_languages.len() + 1)));
    out
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
            tokens_used: Some(5),
            model_used: None,
            provider: None,
            finish_reason: Some("stop".into()),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn decodes_valid_subquery_json() {
        let body = serde_json::json!({
            "subqueries": [
                {"id": "sq-1", "query": "who founded Acme", "target_gap": "founder", "priority": 1}
            ]
        })
        .to_string();
        let llm = Arc::new(FakeLlmServiceBuilder::new().with_query_response(response_with(&body)).build());
        let gen = SubqueryGenerator::new(llm);
        let input = SubqueryGenInput::new("Acme Corp", vec!["founder".into()], 0);
        let subqueries = gen.generate(&input, "agent-1").await;
        assert_eq!(subqueries.len(), 1);
        assert_eq!(subqueries[0].id, "sq-1");
    }

    #[tokio::test]
    async fn decode_failure_falls_back_to_classifier() {
        let llm = Arc::new(FakeLlmServiceBuilder::new().with_query_response(response_with("not json")).build());
        let gen = SubqueryGenerator::new(llm);
        let input = SubqueryGenInput::new("Acme Corp", vec!["who is the founder and CEO".into()], 0);
        let subqueries = gen.generate(&input, "agent-1").await;
        assert!(subqueries.iter().any(|s| s.source_types.contains(&"founder_ceo".to_string())));
    }

    #[test]
    fn fallback_matches_multilingual_keywords() {
        let input = SubqueryGenInput::new("测试公司", vec!["创始人是谁".into()], 0);
        let subqueries = fallback_generate(&input);
        assert!(subqueries.iter().any(|s| s.source_types.contains(&"founder_ceo".to_string())));
    }

    #[test]
    fn fallback_always_includes_site_filter_query() {
        let input = SubqueryGenInput::new("Acme Corp", vec![], 0);
        let subqueries = fallback_generate(&input);
        assert!(subqueries.iter().any(|s| s.source_types.contains(&"site_filter".to_string())));
    }

    #[test]
    fn fallback_adds_regional_language_query_when_target_language_known() {
        let mut input = SubqueryGenInput::new("Acme Corp", vec![], 0);
        input.target_languages = vec!["ja".to_string()];
        let subqueries = fallback_generate(&input);
        assert!(subqueries.iter().any(|s| s.source_types.contains(&"regional".to_string())));
    }

    #[test]
    fn fallback_substitutes_canonical_name_for_entity_placeholder() {
        let mut input = SubqueryGenInput::new("acme", vec!["founding year".into()], 0);
        input.canonical_name = Some("Acme Corporation".to_string());
        let subqueries = fallback_generate(&input);
        assert!(subqueries.iter().any(|s| s.query.contains("Acme Corporation")));
    }
}
