//! redb-backed storage for the causal graph's four entity kinds plus
//! secondary indices for lookup by agent, session, action type, and time.

use redb::{Database, MultimapTableDefinition, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::ids;
use crate::observability::metrics::CAUSAL_WRITES;
use crate::{CodeCoderError, Result};

const DECISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("decisions");
const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");
const OUTCOMES: TableDefinition<&str, &[u8]> = TableDefinition::new("outcomes");
const EDGES: TableDefinition<&str, &[u8]> = TableDefinition::new("edges");

const BY_AGENT: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("by_agent");
const BY_SESSION: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("by_session");
const BY_ACTION_TYPE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("by_action_type");
const BY_TIME: TableDefinition<&str, &str> = TableDefinition::new("by_time");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub agent_id: String,
    pub session_id: String,
    pub task_id: Option<String>,
    pub summary: String,
    pub rationale: String,
    pub options_considered: Vec<String>,
    pub chosen_option: String,
    pub confidence: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub decision_id: String,
    pub agent_id: String,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub risk_tier: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub action_id: String,
    pub success: bool,
    pub summary: String,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// An edge beyond the implicit decision → action → outcome chain, e.g.
/// "this decision supersedes that one" or "these two actions are related".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_id: String,
    pub to_id: String,
    pub relation: String,
}

/// A decision with all of its actions, each paired with its outcome
/// (if one has been recorded yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub decision: Decision,
    pub actions: Vec<(Action, Option<Outcome>)>,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub action_type: Option<String>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct CausalStore {
    db: Arc<Database>,
}

impl CausalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(|e| CodeCoderError::Internal(e.to_string()))?;
        let write_txn = db.begin_write().map_err(db_err)?;
        {
            write_txn.open_table(DECISIONS).map_err(db_err)?;
            write_txn.open_table(ACTIONS).map_err(db_err)?;
            write_txn.open_table(OUTCOMES).map_err(db_err)?;
            write_txn.open_table(EDGES).map_err(db_err)?;
            write_txn.open_table(BY_TIME).map_err(db_err)?;
            write_txn.open_multimap_table(BY_AGENT).map_err(db_err)?;
            write_txn.open_multimap_table(BY_SESSION).map_err(db_err)?;
            write_txn.open_multimap_table(BY_ACTION_TYPE).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn record_decision(&self, decision: &Decision) -> Result<()> {
        let bytes = bincode::serialize(decision).map_err(ser_err)?;
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(DECISIONS).map_err(db_err)?;
            table.insert(decision.id.as_str(), bytes.as_slice()).map_err(db_err)?;

            let mut by_agent = write_txn.open_multimap_table(BY_AGENT).map_err(db_err)?;
            by_agent
                .insert(decision.agent_id.as_str(), decision.id.as_str())
                .map_err(db_err)?;

            let mut by_session = write_txn.open_multimap_table(BY_SESSION).map_err(db_err)?;
            by_session
                .insert(decision.session_id.as_str(), decision.id.as_str())
                .map_err(db_err)?;

            let mut by_time = write_txn.open_table(BY_TIME).map_err(db_err)?;
            let time_key = time_key(decision.timestamp, &decision.id);
            by_time.insert(time_key.as_str(), decision.id.as_str()).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        CAUSAL_WRITES.with_label_values(&["decision"]).inc();
        Ok(())
    }

    pub fn record_action(&self, action: &Action) -> Result<()> {
        let bytes = bincode::serialize(action).map_err(ser_err)?;
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(ACTIONS).map_err(db_err)?;
            table.insert(action.id.as_str(), bytes.as_slice()).map_err(db_err)?;

            let mut by_agent = write_txn.open_multimap_table(BY_AGENT).map_err(db_err)?;
            by_agent.insert(action.agent_id.as_str(), action.id.as_str()).map_err(db_err)?;

            let mut by_type = write_txn.open_multimap_table(BY_ACTION_TYPE).map_err(db_err)?;
            by_type.insert(action.tool.as_str(), action.id.as_str()).map_err(db_err)?;

            let mut by_time = write_txn.open_table(BY_TIME).map_err(db_err)?;
            let time_key = time_key(action.timestamp, &action.id);
            by_time.insert(time_key.as_str(), action.id.as_str()).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        CAUSAL_WRITES.with_label_values(&["action"]).inc();
        Ok(())
    }

    pub fn record_outcome(&self, outcome: &Outcome) -> Result<()> {
        let bytes = bincode::serialize(outcome).map_err(ser_err)?;
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(OUTCOMES).map_err(db_err)?;
            table.insert(outcome.id.as_str(), bytes.as_slice()).map_err(db_err)?;

            let mut by_time = write_txn.open_table(BY_TIME).map_err(db_err)?;
            let time_key = time_key(outcome.timestamp, &outcome.id);
            by_time.insert(time_key.as_str(), outcome.id.as_str()).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        CAUSAL_WRITES.with_label_values(&["outcome"]).inc();
        Ok(())
    }

    pub fn link(&self, edge: &Edge) -> Result<()> {
        let id = ids::new_id(ids::prefix::EDGE);
        let bytes = bincode::serialize(edge).map_err(ser_err)?;
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(EDGES).map_err(db_err)?;
            table.insert(id.as_str(), bytes.as_slice()).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        CAUSAL_WRITES.with_label_values(&["edge"]).inc();
        Ok(())
    }

    pub fn get_decision(&self, id: &str) -> Result<Option<Decision>> {
        self.get(DECISIONS, id)
    }

    pub fn get_action(&self, id: &str) -> Result<Option<Action>> {
        self.get(ACTIONS, id)
    }

    pub fn get_outcome(&self, id: &str) -> Result<Option<Outcome>> {
        self.get(OUTCOMES, id)
    }

    fn get<T: for<'de> Deserialize<'de>>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        id: &str,
    ) -> Result<Option<T>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(table_def).map_err(db_err)?;
        match table.get(id).map_err(db_err)? {
            Some(guard) => {
                let value: T = bincode::deserialize(guard.value()).map_err(ser_err)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// The full chain for a decision: the decision itself plus every
    /// action it spawned, each paired with its outcome if recorded.
    pub fn get_chain(&self, decision_id: &str) -> Result<Option<Chain>> {
        let Some(decision) = self.get_decision(decision_id)? else {
            return Ok(None);
        };

        let read_txn = self.db.begin_read().map_err(db_err)?;
        let actions_table = read_txn.open_table(ACTIONS).map_err(db_err)?;
        let outcomes_table = read_txn.open_table(OUTCOMES).map_err(db_err)?;

        let mut actions = Vec::new();
        for entry in actions_table.iter().map_err(db_err)? {
            let (_, guard) = entry.map_err(db_err)?;
            let action: Action = bincode::deserialize(guard.value()).map_err(ser_err)?;
            if action.decision_id != decision_id {
                continue;
            }
            let outcome = outcomes_table
                .iter()
                .map_err(db_err)?
                .filter_map(|e| e.ok())
                .find_map(|(_, v)| {
                    let o: Outcome = bincode::deserialize(v.value()).ok()?;
                    (o.action_id == action.id).then_some(o)
                });
            actions.push((action, outcome));
        }

        Ok(Some(Chain { decision, actions }))
    }

    /// Ids matching the query's filters, most recent first.
    pub fn query(&self, query: &Query) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;

        let mut candidates: Option<Vec<String>> = None;

        if let Some(agent_id) = &query.agent_id {
            let table = read_txn.open_multimap_table(BY_AGENT).map_err(db_err)?;
            let ids: Vec<String> = table
                .get(agent_id.as_str())
                .map_err(db_err)?
                .filter_map(|v| v.ok().map(|g| g.value().to_string()))
                .collect();
            candidates = Some(intersect(candidates, ids));
        }

        if let Some(session_id) = &query.session_id {
            let table = read_txn.open_multimap_table(BY_SESSION).map_err(db_err)?;
            let ids: Vec<String> = table
                .get(session_id.as_str())
                .map_err(db_err)?
                .filter_map(|v| v.ok().map(|g| g.value().to_string()))
                .collect();
            candidates = Some(intersect(candidates, ids));
        }

        if let Some(action_type) = &query.action_type {
            let table = read_txn.open_multimap_table(BY_ACTION_TYPE).map_err(db_err)?;
            let ids: Vec<String> = table
                .get(action_type.as_str())
                .map_err(db_err)?
                .filter_map(|v| v.ok().map(|g| g.value().to_string()))
                .collect();
            candidates = Some(intersect(candidates, ids));
        }

        if query.since.is_some() || query.until.is_some() {
            let table = read_txn.open_table(BY_TIME).map_err(db_err)?;
            let since = query.since.map(|t| time_key(t, "")).unwrap_or_default();
            let until = query
                .until
                .map(|t| time_key(t, "\u{ffff}"))
                .unwrap_or_else(|| "\u{ffff}".repeat(4));
            let ids: Vec<String> = table
                .range::<&str>(since.as_str()..until.as_str())
                .map_err(db_err)?
                .filter_map(|e| e.ok().map(|(_, v)| v.value().to_string()))
                .collect();
            candidates = Some(intersect(candidates, ids));
        }

        Ok(candidates.unwrap_or_default())
    }

    /// Aggregate counts used by analytics and operator dashboards.
    pub fn stats(&self) -> Result<StoreStats> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let decisions = read_txn.open_table(DECISIONS).map_err(db_err)?.len().map_err(db_err)?;
        let actions = read_txn.open_table(ACTIONS).map_err(db_err)?.len().map_err(db_err)?;
        let outcomes = read_txn.open_table(OUTCOMES).map_err(db_err)?.len().map_err(db_err)?;
        Ok(StoreStats {
            decision_count: decisions,
            action_count: actions,
            outcome_count: outcomes,
        })
    }

    pub(crate) fn all_decisions(&self) -> Result<Vec<Decision>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(DECISIONS).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, guard) = entry.map_err(db_err)?;
            out.push(bincode::deserialize(guard.value()).map_err(ser_err)?);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub decision_count: u64,
    pub action_count: u64,
    pub outcome_count: u64,
}

fn intersect(existing: Option<Vec<String>>, next: Vec<String>) -> Vec<String> {
    match existing {
        None => next,
        Some(prev) => {
            let next_set: std::collections::HashSet<_> = next.into_iter().collect();
            prev.into_iter().filter(|id| next_set.contains(id)).collect()
        }
    }
}

fn time_key(timestamp: chrono::DateTime<chrono::Utc>, id: &str) -> String {
    format!("{:020}_{}", timestamp.timestamp_millis().max(0), id)
}

fn db_err(e: impl std::fmt::Display) -> CodeCoderError {
    CodeCoderError::Internal(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> CodeCoderError {
    CodeCoderError::Internal(format!("causal graph serialization error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CausalStore {
        let dir = tempfile::tempdir().unwrap();
        CausalStore::open(dir.path().join("causal.redb")).unwrap()
    }

    fn decision(agent: &str, session: &str) -> Decision {
        Decision {
            id: ids::new_id(ids::prefix::DECISION),
            agent_id: agent.to_string(),
            session_id: session.to_string(),
            task_id: None,
            summary: "chose to read file before editing".to_string(),
            rationale: "need current contents".to_string(),
            options_considered: vec!["read".into(), "skip".into()],
            chosen_option: "read".into(),
            confidence: 0.9,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn records_and_fetches_a_chain() {
        let store = store();
        let decision = decision("agent-1", "sess-1");
        store.record_decision(&decision).unwrap();

        let action = Action {
            id: ids::new_id(ids::prefix::ACTION),
            decision_id: decision.id.clone(),
            agent_id: "agent-1".into(),
            tool: "read_file".into(),
            arguments: serde_json::json!({"path": "a.rs"}),
            risk_tier: "low".into(),
            timestamp: chrono::Utc::now(),
        };
        store.record_action(&action).unwrap();

        let outcome = Outcome {
            id: ids::new_id(ids::prefix::OUTCOME),
            action_id: action.id.clone(),
            success: true,
            summary: "read 40 lines".into(),
            error: None,
            timestamp: chrono::Utc::now(),
        };
        store.record_outcome(&outcome).unwrap();

        let chain = store.get_chain(&decision.id).unwrap().unwrap();
        assert_eq!(chain.actions.len(), 1);
        assert!(chain.actions[0].1.is_some());
    }

    #[test]
    fn query_by_agent_and_action_type() {
        let store = store();
        let decision = decision("agent-2", "sess-2");
        store.record_decision(&decision).unwrap();
        let action = Action {
            id: ids::new_id(ids::prefix::ACTION),
            decision_id: decision.id.clone(),
            agent_id: "agent-2".into(),
            tool: "bash".into(),
            arguments: serde_json::json!({}),
            risk_tier: "medium".into(),
            timestamp: chrono::Utc::now(),
        };
        store.record_action(&action).unwrap();

        let results = store
            .query(&Query {
                agent_id: Some("agent-2".into()),
                action_type: Some("bash".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(results.contains(&action.id));
    }
}
