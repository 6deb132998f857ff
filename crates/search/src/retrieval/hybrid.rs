//! Hybrid merge coordinator
//!
//! Embeds the question once, fans out to the direct and discovery sources
//! concurrently and fuses whatever comes back before the shared deadline.
//! A failed or late source is dropped; the other one still answers.

use super::{
    direct::DirectSearch, discovery::DiscoverySearch, fusion::ScoreFusion, CandidateSource,
    MergeRequest,
};
use kazanim_common::backends::{CurriculumSearchBackend, QuestionSearchBackend};
use kazanim_common::config::{AppConfig, SearchConfig};
use kazanim_common::embeddings::Embedder;
use kazanim_common::errors::Result;
use kazanim_common::metrics;
use kazanim_common::models::{MergedCandidate, SearchCandidate};
use kazanim_common::resilience::{deps, BreakerRegistry, Resilience};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{info, instrument, warn};

/// Coordinator over both candidate sources
pub struct HybridMergeCoordinator {
    embedder: Arc<dyn Embedder>,
    embedding: Resilience,
    direct: Box<dyn CandidateSource>,
    discovery: Box<dyn CandidateSource>,
    fusion: ScoreFusion,
    config: SearchConfig,
}

impl HybridMergeCoordinator {
    /// Wire the coordinator from config, sharing breakers through `registry`
    pub fn new(
        embedder: Arc<dyn Embedder>,
        curriculum: Arc<dyn CurriculumSearchBackend>,
        questions: Arc<dyn QuestionSearchBackend>,
        registry: &BreakerRegistry,
        config: &AppConfig,
    ) -> Self {
        let resilience = &config.resilience;
        let retry = resilience.retry_policy();

        Self::with_sources(
            embedder,
            registry.resilience(deps::EMBEDDING, retry.clone(), resilience.embedding_timeout()),
            Box::new(DirectSearch::new(
                curriculum,
                registry.resilience(deps::CURRICULUM_SEARCH, retry.clone(), resilience.search_timeout()),
            )),
            Box::new(DiscoverySearch::new(
                questions,
                registry.resilience(deps::QUESTION_SEARCH, retry, resilience.search_timeout()),
            )),
            config.search.clone(),
        )
    }

    /// Assemble from already-built sources
    pub fn with_sources(
        embedder: Arc<dyn Embedder>,
        embedding: Resilience,
        direct: Box<dyn CandidateSource>,
        discovery: Box<dyn CandidateSource>,
        config: SearchConfig,
    ) -> Self {
        Self {
            embedder,
            embedding,
            direct,
            discovery,
            fusion: ScoreFusion::from(&config),
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    fn merge_timeout(&self) -> Duration {
        Duration::from_secs(self.config.merge_timeout_secs)
    }

    /// Ranked merged candidates for the request.
    ///
    /// Only validation errors are returned; dependency failures degrade to
    /// fewer (or zero) candidates.
    #[instrument(skip(self, request), fields(grade = ?request.grade, subject = ?request.subject, exam_mode = request.exam_mode))]
    pub async fn merge(&self, request: &MergeRequest) -> Result<Vec<MergedCandidate>> {
        let request = request.normalized(&self.config.known_subjects, self.config.max_top_k)?;
        let started = Instant::now();
        let deadline = started + self.merge_timeout();

        let query_vector = match timeout_at(
            deadline,
            self.embedding.call(|| self.embedder.embed(&request.question)),
        )
        .await
        {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                warn!(error = %e, "Question embedding failed; no candidates");
                self.finish(started, "embedding_failed", 0);
                return Ok(Vec::new());
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.merge_timeout().as_millis() as u64,
                    "Question embedding hit the merge deadline"
                );
                self.finish(started, "embedding_failed", 0);
                return Ok(Vec::new());
            }
        };

        let filter = request.filter();
        let limit = request.top_k.saturating_mul(self.config.candidate_multiplier.max(1));

        // Each branch is bounded by the same absolute deadline, so a finished
        // branch keeps its results when the other one runs out of time.
        let (direct, discovery) = tokio::join!(
            timeout_at(
                deadline,
                self.direct.search(&request.question, &query_vector, &filter, limit)
            ),
            timeout_at(
                deadline,
                self.discovery.search(&request.question, &query_vector, &filter, limit)
            ),
        );

        let direct = self.settle(self.direct.as_ref(), direct);
        let discovery = self.settle(self.discovery.as_ref(), discovery);

        let outcome = match (&direct, &discovery) {
            (Some(_), Some(_)) => "both",
            (Some(_), None) => "direct_only",
            (None, Some(_)) => "discovery_only",
            (None, None) => "none",
        };
        if outcome == "none" {
            warn!("Both search sources failed; no candidates");
        }

        let merged = self.fusion.fuse(
            direct.unwrap_or_default(),
            discovery.unwrap_or_default(),
            request.top_k,
        )?;

        info!(
            outcome,
            results = merged.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Hybrid merge complete"
        );
        self.finish(started, outcome, merged.len());

        Ok(merged)
    }

    /// Collapse a branch result, logging why a source dropped out
    fn settle(
        &self,
        source: &dyn CandidateSource,
        result: std::result::Result<Result<Vec<SearchCandidate>>, tokio::time::error::Elapsed>,
    ) -> Option<Vec<SearchCandidate>> {
        match result {
            Ok(Ok(candidates)) => Some(candidates),
            Ok(Err(e)) => {
                warn!(source = %source.source(), error = %e, "Search source failed; degrading");
                None
            }
            Err(_) => {
                warn!(
                    source = %source.source(),
                    timeout_ms = self.merge_timeout().as_millis() as u64,
                    "Search source missed the merge deadline; degrading"
                );
                None
            }
        }
    }

    fn finish(&self, started: Instant, outcome: &str, results: usize) {
        metrics::record_merge(started.elapsed().as_secs_f64(), outcome, results);
    }
}
