//! Agent Selection (C12).
//!
//! Two exploration policies over `AgentPerformance` rows, both guarded by a
//! single process-wide PRNG instance (mutex-protected, matching the rest of
//! this crate's posture on shared mutable state).

use crate::types::AgentPerformance;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEFAULT_AGENT_ID: &str = "default-agent";

static PROCESS_RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::from_entropy()));

fn next_f64() -> f64 {
    PROCESS_RNG.lock().gen::<f64>()
}

fn uniform_index(len: usize) -> usize {
    PROCESS_RNG.lock().gen_range(0..len)
}

/// ε-greedy selection. `performances` is assumed pre-sorted descending by
/// success rate; with probability `epsilon` a uniform random pick is made
/// from `available_agent_ids` (falling back to the performance list itself
/// when the available-ids list is empty), otherwise the top-ranked agent
/// wins. An empty input set returns [`DEFAULT_AGENT_ID`], never an error —
/// this is treated as data-unavailable, not a selection failure (see
/// DESIGN.md's Open Question decision).
pub fn epsilon_greedy(
    performances: &[AgentPerformance],
    available_agent_ids: &[String],
    epsilon: f64,
) -> String {
    if performances.is_empty() && available_agent_ids.is_empty() {
        return DEFAULT_AGENT_ID.to_string();
    }

    if next_f64() < epsilon {
        let pool: Vec<&str> = if !available_agent_ids.is_empty() {
            available_agent_ids.iter().map(String::as_str).collect()
        } else {
            performances.iter().map(|p| p.agent_id.as_str()).collect()
        };
        if pool.is_empty() {
            return DEFAULT_AGENT_ID.to_string();
        }
        return pool[uniform_index(pool.len())].to_string();
    }

    performances
        .first()
        .map(|p| p.agent_id.clone())
        .or_else(|| available_agent_ids.first().cloned())
        .unwrap_or_else(|| DEFAULT_AGENT_ID.to_string())
}

/// UCB1 selection using the simplified ratio `success_rate + sqrt(2) *
/// total_selections / runs` rather than the classical logarithmic-regret
/// term (a documented deviation — both are monotone in sparsity). Rows with `run_count
/// == 0` are treated as having infinite score (unexplored agents are always
/// tried first).
pub fn ucb1(performances: &[AgentPerformance]) -> String {
    if performances.is_empty() {
        return DEFAULT_AGENT_ID.to_string();
    }

    let total_selections: u64 = performances.iter().map(|p| p.run_count).sum();

    let mut best: Option<(&AgentPerformance, f64)> = None;
    for p in performances {
        let score = if p.run_count == 0 {
            f64::INFINITY
        } else {
            p.success_rate + std::f64::consts::SQRT_2 * total_selections as f64 / p.run_count as f64
        };
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((p, score)),
        }
    }

    best.map(|(p, _)| p.agent_id.clone()).unwrap_or_else(|| DEFAULT_AGENT_ID.to_string())
}
