//! Pattern analytics over the causal graph: recurring decision shapes,
//! nearest-neighbor decisions by token overlap, and per-agent rollups.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::store::{CausalStore, Decision};
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub chosen_option: String,
    pub frequency: usize,
    pub example_decision_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarDecision {
    pub decision_id: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub day: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInsights {
    pub agent_id: String,
    pub decision_count: usize,
    pub avg_confidence: f64,
    pub top_chosen_options: Vec<(String, usize)>,
}

/// Groups decisions by chosen_option and reports the ones repeated at
/// least `min_frequency` times, most frequent first.
pub fn find_patterns(store: &CausalStore, min_frequency: usize) -> Result<Vec<Pattern>> {
    let decisions = store.all_decisions()?;
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for d in &decisions {
        groups.entry(d.chosen_option.clone()).or_default().push(d.id.clone());
    }

    let mut patterns: Vec<Pattern> = groups
        .into_iter()
        .filter(|(_, ids)| ids.len() >= min_frequency)
        .map(|(chosen_option, ids)| Pattern {
            chosen_option,
            frequency: ids.len(),
            example_decision_ids: ids.into_iter().take(5).collect(),
        })
        .collect();

    patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    Ok(patterns)
}

/// Decisions whose summary+rationale token set has the highest Jaccard
/// similarity to `decision_id`'s, excluding the decision itself.
pub fn find_similar_decisions(
    store: &CausalStore,
    decision_id: &str,
    top_n: usize,
) -> Result<Vec<SimilarDecision>> {
    let decisions = store.all_decisions()?;
    let Some(target) = decisions.iter().find(|d| d.id == decision_id) else {
        return Ok(vec![]);
    };
    let target_tokens = tokenize(target);

    let mut scored: Vec<SimilarDecision> = decisions
        .iter()
        .filter(|d| d.id != decision_id)
        .map(|d| SimilarDecision {
            decision_id: d.id.clone(),
            similarity: jaccard(&target_tokens, &tokenize(d)),
        })
        .filter(|s| s.similarity > 0.0)
        .collect();

    scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
    scored.truncate(top_n);
    Ok(scored)
}

/// Decision volume per UTC day, oldest first.
pub fn trend_analysis(store: &CausalStore) -> Result<Vec<TrendPoint>> {
    let decisions = store.all_decisions()?;
    let mut by_day: HashMap<String, usize> = HashMap::new();
    for d in &decisions {
        let day = d.timestamp.format("%Y-%m-%d").to_string();
        *by_day.entry(day).or_insert(0) += 1;
    }
    let mut points: Vec<TrendPoint> = by_day
        .into_iter()
        .map(|(day, count)| TrendPoint { day, count })
        .collect();
    points.sort_by(|a, b| a.day.cmp(&b.day));
    Ok(points)
}

/// Short natural-language takeaways derived from the frequency of
/// low-confidence or failed-outcome decision patterns.
pub fn extract_lessons(store: &CausalStore) -> Result<Vec<String>> {
    let decisions = store.all_decisions()?;
    let mut lessons = Vec::new();

    let low_confidence = decisions.iter().filter(|d| d.confidence < 0.5).count();
    if low_confidence > 0 {
        lessons.push(format!(
            "{low_confidence} decision(s) were made with confidence below 0.5 — consider gathering more context before acting."
        ));
    }

    for pattern in find_patterns(store, 3)? {
        lessons.push(format!(
            "\"{}\" was chosen {} times — a strong candidate for a stock policy or shortcut.",
            pattern.chosen_option, pattern.frequency
        ));
    }

    Ok(lessons)
}

pub fn get_agent_insights(store: &CausalStore, agent_id: &str) -> Result<AgentInsights> {
    let decisions: Vec<Decision> = store
        .all_decisions()?
        .into_iter()
        .filter(|d| d.agent_id == agent_id)
        .collect();

    let decision_count = decisions.len();
    let avg_confidence = if decision_count == 0 {
        0.0
    } else {
        decisions.iter().map(|d| d.confidence).sum::<f64>() / decision_count as f64
    };

    let mut counts: HashMap<String, usize> = HashMap::new();
    for d in &decisions {
        *counts.entry(d.chosen_option.clone()).or_insert(0) += 1;
    }
    let mut top: Vec<(String, usize)> = counts.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1));
    top.truncate(5);

    Ok(AgentInsights {
        agent_id: agent_id.to_string(),
        decision_count,
        avg_confidence,
        top_chosen_options: top,
    })
}

fn tokenize(decision: &Decision) -> HashSet<String> {
    format!("{} {}", decision.summary, decision.rationale)
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids;

    fn decision(id: &str, agent: &str, summary: &str, chosen: &str, confidence: f64) -> Decision {
        Decision {
            id: id.to_string(),
            agent_id: agent.to_string(),
            session_id: "sess".to_string(),
            task_id: None,
            summary: summary.to_string(),
            rationale: "because".to_string(),
            options_considered: vec![chosen.to_string()],
            chosen_option: chosen.to_string(),
            confidence,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn similar_decisions_rank_by_token_overlap() {
        let store = CausalStore::open(tempfile::tempdir().unwrap().path().join("c.redb")).unwrap();
        let d1 = decision(&ids::new_id(ids::prefix::DECISION), "a", "read file before edit", "read", 0.9);
        let d2 = decision(&ids::new_id(ids::prefix::DECISION), "a", "read file before write", "read", 0.8);
        let d3 = decision(&ids::new_id(ids::prefix::DECISION), "a", "delete the branch", "delete", 0.9);
        store.record_decision(&d1).unwrap();
        store.record_decision(&d2).unwrap();
        store.record_decision(&d3).unwrap();

        let similar = find_similar_decisions(&store, &d1.id, 2).unwrap();
        assert_eq!(similar[0].decision_id, d2.id);
    }

    #[test]
    fn agent_insights_average_confidence() {
        let store = CausalStore::open(tempfile::tempdir().unwrap().path().join("c.redb")).unwrap();
        store
            .record_decision(&decision(&ids::new_id(ids::prefix::DECISION), "a", "x", "read", 1.0))
            .unwrap();
        store
            .record_decision(&decision(&ids::new_id(ids::prefix::DECISION), "a", "y", "read", 0.0))
            .unwrap();

        let insights = get_agent_insights(&store, "a").unwrap();
        assert_eq!(insights.decision_count, 2);
        assert!((insights.avg_confidence - 0.5).abs() < 1e-9);
    }
}
