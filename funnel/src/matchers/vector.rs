//! Nearest-neighbour matching over precomputed scenario embeddings.
//!
//! The turn text is embedded by an external [`EmbeddingProvider`]; that
//! call is paid and is written to the cost ledger whether it succeeds or
//! not. Similarities are used directly as confidence.

use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{rank, MatchCandidate, MatcherError, Scorer, Stage, TurnText};
use crate::catalog::{CatalogSnapshot, ScenarioId, ScenarioRef};
use crate::ledger::{CallRecord, CostLedger, STAGE_VECTOR_EMBEDDING};
use crate::providers::{EmbeddingProvider, ProviderError};

/// Upper bound on neighbours requested from the index in one search.
const MAX_NEIGHBOURS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorMatcherConfig {
    pub top_k: usize,
    /// Similarities below this are dropped.
    pub min_similarity: f64,
    /// Upper bound for each provider call.
    #[serde(with = "crate::config::duration_ms")]
    pub call_timeout: Duration,
}

impl Default for VectorMatcherConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.3,
            call_timeout: Duration::from_secs(3),
        }
    }
}

pub struct VectorMatcher {
    provider: Arc<dyn EmbeddingProvider>,
    ledger: CostLedger,
    config: VectorMatcherConfig,
}

impl VectorMatcher {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        ledger: CostLedger,
        config: VectorMatcherConfig,
    ) -> Self {
        Self {
            provider,
            ledger,
            config,
        }
    }

    /// Neighbours above the similarity floor that the snapshot still offers.
    fn usable(&self, neighbours: Vec<(ScenarioId, f32)>, catalog: &CatalogSnapshot) -> Vec<MatchCandidate> {
        neighbours
            .into_iter()
            .filter(|(_, sim)| f64::from(*sim) >= self.config.min_similarity)
            .filter_map(|(id, sim)| {
                catalog.get(id).map(|scenario| {
                    MatchCandidate::new(
                        ScenarioRef::from(scenario),
                        f64::from(sim),
                        Stage::Vector,
                        vec![format!("cosine:{sim:.3}")],
                    )
                })
            })
            .collect()
    }

    fn record(&self, turn: &TurnText, call: CallRecord) -> Result<(), MatcherError> {
        self.ledger
            .record(call.conversation(Some(turn.conversation_id.as_str())))?;
        Ok(())
    }
}

#[async_trait]
impl Scorer for VectorMatcher {
    fn stage(&self) -> Stage {
        Stage::Vector
    }

    async fn score(
        &self,
        turn: &TurnText,
        catalog: &CatalogSnapshot,
    ) -> Result<Vec<MatchCandidate>, MatcherError> {
        let call = CallRecord::new(
            &turn.user_id,
            self.provider.name(),
            self.provider.model(),
            STAGE_VECTOR_EMBEDDING,
        )
        .started_at(Utc::now());
        let started = StdInstant::now();
        let deadline = turn.call_deadline(self.config.call_timeout);

        let outcome = match tokio::time::timeout_at(deadline, self.provider.embed(&turn.raw)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(started.elapsed())),
        };
        let embedding = match outcome {
            Ok(embedding) => {
                self.record(
                    turn,
                    call.tokens(embedding.input_tokens, 0)
                        .latency(started.elapsed()),
                )?;
                embedding
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id = %turn.conversation_id,
                    provider = self.provider.name(),
                    error = %e,
                    "Embedding call failed"
                );
                self.record(turn, call.latency(started.elapsed()).failed(&e))?;
                return Err(e.into());
            }
        };

        // Inactive and rejected scenarios are still in the index; widen the
        // search until top_k usable neighbours are found or it runs dry.
        let mut requested = self.config.top_k;
        let mut candidates = loop {
            let deadline = turn.call_deadline(self.config.call_timeout);
            let neighbours = match tokio::time::timeout_at(
                deadline,
                self.provider.nearest(&embedding.vector, requested),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => return Err(ProviderError::Timeout(started.elapsed()).into()),
            };
            let exhausted = neighbours.len() < requested
                || requested >= MAX_NEIGHBOURS
                || neighbours
                    .last()
                    .is_some_and(|(_, sim)| f64::from(*sim) < self.config.min_similarity);
            let found = self.usable(neighbours, catalog);
            if found.len() >= self.config.top_k || exhausted {
                break found;
            }
            tracing::debug!(
                conversation_id = %turn.conversation_id,
                requested,
                usable = found.len(),
                "Widening neighbour search"
            );
            requested = requested.saturating_mul(2).min(MAX_NEIGHBOURS);
        };
        rank(&mut candidates);
        candidates.truncate(self.config.top_k);
        Ok(candidates)
    }
}

/// In-memory embedding index with brute-force cosine search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioIndex {
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub scenario_id: ScenarioId,
    pub vector: Vec<f32>,
}

impl ScenarioIndex {
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-`k` entries by cosine similarity, best first, ties by id.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<(ScenarioId, f32)> {
        let mut scored: Vec<(ScenarioId, f32)> = self
            .entries
            .iter()
            .filter(|e| e.vector.len() == query.len())
            .map(|e| (e.scenario_id, cosine(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}

/// Cosine similarity; zero vectors score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ServiceScenario;
    use crate::ledger::CostQuery;
    use crate::providers::Embedding;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbedder {
        index: ScenarioIndex,
        fail: bool,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn name(&self) -> &str {
            "openai"
        }
        fn model(&self) -> &str {
            "text-embedding-3-small"
        }
        async fn embed(&self, _text: &str) -> Result<Embedding, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProviderError::Http {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(Embedding {
                vector: vec![1.0, 0.0],
                input_tokens: 12,
            })
        }
        async fn nearest(
            &self,
            vector: &[f32],
            k: usize,
        ) -> Result<Vec<(ScenarioId, f32)>, ProviderError> {
            Ok(self.index.nearest(vector, k))
        }
    }

    fn index() -> ScenarioIndex {
        ScenarioIndex::new(vec![
            IndexEntry {
                scenario_id: 1,
                vector: vec![1.0, 0.1],
            },
            IndexEntry {
                scenario_id: 2,
                vector: vec![0.0, 1.0],
            },
            IndexEntry {
                scenario_id: 3,
                vector: vec![1.0, 0.0],
            },
        ])
    }

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::new(vec![
            ServiceScenario::new(1, "Уборка подъезда", "Уборка"),
            ServiceScenario::new(2, "Освещение", "Электрика"),
            ServiceScenario::new(3, "Ремонт подъезда", "Ремонт").inactive(),
        ])
    }

    fn embedder(fail: bool, delay: Duration) -> Arc<FixedEmbedder> {
        Arc::new(FixedEmbedder {
            index: index(),
            fail,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_index_orders_and_truncates() {
        let hits = index().nearest(&[1.0, 0.0], 2);
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[tokio::test]
    async fn test_inactive_neighbours_filtered_and_cost_recorded() {
        let ledger = CostLedger::in_memory();
        let matcher = VectorMatcher::new(
            embedder(false, Duration::ZERO),
            ledger.clone(),
            VectorMatcherConfig::default(),
        );
        let turn = TurnText::new("c1", "u1", "грязно в подъезде");
        let found = matcher.score(&turn, &catalog()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].scenario.id, 1);
        assert_eq!(found[0].stage, Stage::Vector);

        let rows = ledger.records(&CostQuery::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stage, STAGE_VECTOR_EMBEDDING);
        assert_eq!(rows[0].total_tokens, 12);
        assert_eq!(rows[0].conversation_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_inactive_neighbours_do_not_crowd_out_active_ones() {
        let mut entries: Vec<IndexEntry> = (5..=9)
            .map(|id| IndexEntry {
                scenario_id: id,
                vector: vec![1.0, 0.01 * id as f32],
            })
            .collect();
        entries.push(IndexEntry {
            scenario_id: 4,
            vector: vec![1.0, 0.4],
        });
        let provider = Arc::new(FixedEmbedder {
            index: ScenarioIndex::new(entries),
            fail: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let mut scenarios = vec![ServiceScenario::new(4, "Не работает лифт", "Лифты")];
        scenarios.extend((5..=9).map(|id| ServiceScenario::new(id, "Архив", "Архив").inactive()));
        let catalog = CatalogSnapshot::new(scenarios);

        let matcher = VectorMatcher::new(provider, CostLedger::in_memory(), VectorMatcherConfig::default());
        let found = matcher
            .score(&TurnText::new("c1", "u1", "лифт стоит"), &catalog)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].scenario.id, 4);
        assert!(found[0].confidence > 0.9);
    }

    #[tokio::test]
    async fn test_provider_error_recorded_as_failure() {
        let ledger = CostLedger::in_memory();
        let matcher = VectorMatcher::new(
            embedder(true, Duration::ZERO),
            ledger.clone(),
            VectorMatcherConfig::default(),
        );
        let turn = TurnText::new("c1", "u1", "темно");
        let err = matcher.score(&turn, &catalog()).await.unwrap_err();
        assert!(matches!(err, MatcherError::Provider(ProviderError::Http { .. })));
        let rows = ledger.records(&CostQuery::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].success);
        assert_eq!(rows[0].cost, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_timeout_bounded_by_turn_deadline() {
        let ledger = CostLedger::in_memory();
        let matcher = VectorMatcher::new(
            embedder(false, Duration::from_secs(30)),
            ledger.clone(),
            VectorMatcherConfig::default(),
        );
        let turn = TurnText::new("c1", "u1", "темно")
            .with_deadline(tokio::time::Instant::now() + Duration::from_millis(200));
        let err = matcher.score(&turn, &catalog()).await.unwrap_err();
        assert!(matches!(err, MatcherError::Provider(ProviderError::Timeout(_))));
        assert_eq!(ledger.summary(&CostQuery::all()).unwrap().failures, 1);
    }
}
