//! Question-similarity (discovery) search
//!
//! Finds past questions similar to the student's and surfaces the
//! objectives they were tagged with. Several questions can share a parent;
//! the objective keeps its best-scoring question.

use super::CandidateSource;
use kazanim_common::backends::{QuestionHit, QuestionSearchBackend, SearchFilter};
use kazanim_common::errors::Result;
use kazanim_common::models::{SearchCandidate, SearchSource};
use kazanim_common::resilience::Resilience;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Discovery source over the question index
pub struct DiscoverySearch {
    backend: Arc<dyn QuestionSearchBackend>,
    resilience: Resilience,
}

impl DiscoverySearch {
    pub fn new(backend: Arc<dyn QuestionSearchBackend>, resilience: Resilience) -> Self {
        Self { backend, resilience }
    }
}

/// Collapse question hits onto their parent objectives, keeping the max score
fn aggregate_by_parent(hits: Vec<QuestionHit>, filter: &SearchFilter) -> Vec<SearchCandidate> {
    let mut best: HashMap<String, SearchCandidate> = HashMap::new();

    for hit in hits.into_iter().filter(|h| filter.matches(&h.parent)) {
        match best.get_mut(&hit.parent.code) {
            Some(existing) if existing.raw_score >= hit.raw_score => {}
            Some(existing) => existing.raw_score = hit.raw_score,
            None => {
                best.insert(
                    hit.parent.code.clone(),
                    SearchCandidate {
                        objective: hit.parent,
                        raw_score: hit.raw_score,
                        source: SearchSource::Discovery,
                    },
                );
            }
        }
    }

    let mut candidates: Vec<SearchCandidate> = best.into_values().collect();
    candidates.sort_by(|a, b| {
        b.raw_score
            .total_cmp(&a.raw_score)
            .then_with(|| a.objective.code.cmp(&b.objective.code))
    });
    candidates
}

#[async_trait::async_trait]
impl CandidateSource for DiscoverySearch {
    async fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchCandidate>> {
        let hits = self
            .resilience
            .call(|| self.backend.search(query_text, query_vector, filter, limit))
            .await?;

        let question_count = hits.len();
        let candidates = aggregate_by_parent(hits, filter);

        debug!(
            questions = question_count,
            objectives = candidates.len(),
            "Discovery search complete"
        );
        Ok(candidates)
    }

    fn source(&self) -> SearchSource {
        SearchSource::Discovery
    }
}
