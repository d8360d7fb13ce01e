//! Fallback pricing table for cost accounting (§4.4.4) when the LLM/agent
//! service does not report `cost_usd` itself.
//!
//! Prices are USD per 1,000 tokens, approximating public list pricing at the
//! time this table was assembled. Unknown models fall back to a blended
//! flat rate rather than failing cost accounting outright.

const FALLBACK_INPUT_PER_1K: f64 = 0.0025;
const FALLBACK_OUTPUT_PER_1K: f64 = 0.01;
const FALLBACK_BLENDED_PER_1K: f64 = 0.005;

struct ModelPricing {
    prefix: &'static str,
    input_per_1k: f64,
    output_per_1k: f64,
}

const TABLE: &[ModelPricing] = &[
    ModelPricing { prefix: "gpt-4o-mini", input_per_1k: 0.00015, output_per_1k: 0.0006 },
    ModelPricing { prefix: "gpt-4o", input_per_1k: 0.0025, output_per_1k: 0.01 },
    ModelPricing { prefix: "gpt-4", input_per_1k: 0.03, output_per_1k: 0.06 },
    ModelPricing { prefix: "gpt-3.5", input_per_1k: 0.0005, output_per_1k: 0.0015 },
    ModelPricing { prefix: "claude-3-haiku", input_per_1k: 0.00025, output_per_1k: 0.00125 },
    ModelPricing { prefix: "claude-3-5-sonnet", input_per_1k: 0.003, output_per_1k: 0.015 },
    ModelPricing { prefix: "claude-3-opus", input_per_1k: 0.015, output_per_1k: 0.075 },
    ModelPricing { prefix: "gemini-1.5-flash", input_per_1k: 0.000075, output_per_1k: 0.0003 },
    ModelPricing { prefix: "gemini-1.5-pro", input_per_1k: 0.00125, output_per_1k: 0.005 },
];

fn lookup(model: Option<&str>) -> Option<&'static ModelPricing> {
    let model = model?.to_ascii_lowercase();
    TABLE.iter().find(|p| model.starts_with(p.prefix))
}

/// Estimate cost from separately known input/output token counts.
pub fn estimate_split(model: Option<&str>, input_tokens: u64, output_tokens: u64) -> f64 {
    match lookup(model) {
        Some(p) => {
            (input_tokens as f64 / 1000.0) * p.input_per_1k + (output_tokens as f64 / 1000.0) * p.output_per_1k
        }
        None => {
            (input_tokens as f64 / 1000.0) * FALLBACK_INPUT_PER_1K
                + (output_tokens as f64 / 1000.0) * FALLBACK_OUTPUT_PER_1K
        }
    }
}

/// Estimate cost when only a combined token total is known (no split).
pub fn estimate_total(model: Option<&str>, total_tokens: u64) -> f64 {
    match lookup(model) {
        Some(p) => (total_tokens as f64 / 1000.0) * ((p.input_per_1k + p.output_per_1k) / 2.0),
        None => (total_tokens as f64 / 1000.0) * FALLBACK_BLENDED_PER_1K,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_its_own_rates() {
        let cost = estimate_split(Some("gpt-4o-mini"), 1000, 1000);
        assert!((cost - (0.00015 + 0.0006)).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_fallback_rates() {
        let cost = estimate_split(Some("some-mystery-model"), 1000, 1000);
        assert!((cost - (FALLBACK_INPUT_PER_1K + FALLBACK_OUTPUT_PER_1K)).abs() < 1e-9);
    }

    #[test]
    fn total_only_uses_blended_rate_for_unknown_model() {
        let cost = estimate_total(None, 2000);
        assert!((cost - FALLBACK_BLENDED_PER_1K * 2.0).abs() < 1e-9);
    }

    #[test]
    fn prefix_matching_is_case_insensitive() {
        let a = estimate_split(Some("GPT-4O-MINI"), 1000, 0);
        let b = estimate_split(Some("gpt-4o-mini"), 1000, 0);
        assert!((a - b).abs() < 1e-12);
    }
}
