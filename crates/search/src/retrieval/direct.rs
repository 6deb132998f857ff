//! Curriculum direct search
//!
//! Matches the question against objective statements.

use super::CandidateSource;
use kazanim_common::backends::{CurriculumSearchBackend, SearchFilter};
use kazanim_common::errors::Result;
use kazanim_common::models::{SearchCandidate, SearchSource};
use kazanim_common::resilience::Resilience;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Direct source over the curriculum index
pub struct DirectSearch {
    backend: Arc<dyn CurriculumSearchBackend>,
    resilience: Resilience,
}

impl DirectSearch {
    pub fn new(backend: Arc<dyn CurriculumSearchBackend>, resilience: Resilience) -> Self {
        Self { backend, resilience }
    }
}

#[async_trait::async_trait]
impl CandidateSource for DirectSearch {
    async fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchCandidate>> {
        let mut hits = self
            .resilience
            .call(|| self.backend.search(query_text, query_vector, filter, limit))
            .await?;

        // Backends may return duplicates; the highest hit wins.
        hits.sort_by(|a, b| {
            b.raw_score
                .total_cmp(&a.raw_score)
                .then_with(|| a.objective.code.cmp(&b.objective.code))
        });
        let mut seen = HashSet::new();
        let candidates: Vec<SearchCandidate> = hits
            .into_iter()
            .filter(|hit| filter.matches(&hit.objective))
            .filter(|hit| seen.insert(hit.objective.code.clone()))
            .map(|hit| SearchCandidate {
                objective: hit.objective,
                raw_score: hit.raw_score,
                source: SearchSource::Direct,
            })
            .collect();

        debug!(count = candidates.len(), "Direct search complete");
        Ok(candidates)
    }

    fn source(&self) -> SearchSource {
        SearchSource::Direct
    }
}
