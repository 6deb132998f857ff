//! Weighted score fusion for combining the two search sources
//!
//! Each source's scores are normalized by that source's own maximum, then
//! combined per objective:
//! - both sources: `kazanim_weight·direct + question_weight·discovery + synergy_bonus`
//! - direct only: `kazanim_weight·direct`
//! - discovery only: `question_weight·discovery`
//!
//! The fused score is capped at 1.0.

use kazanim_common::config::SearchConfig;
use kazanim_common::errors::Result;
use kazanim_common::models::{CurriculumObjective, MatchType, MergedCandidate, SearchCandidate};
use std::collections::BTreeMap;

/// Fusion parameters
#[derive(Debug, Clone)]
pub struct ScoreFusion {
    /// Weight for direct (objective statement) scores
    pub kazanim_weight: f64,

    /// Weight for discovery (similar question) scores
    pub question_weight: f64,

    /// Added when both sources found the objective
    pub synergy_bonus: f64,

    /// Candidates within this ratio of the top score are also primary
    pub primary_ratio: f64,
}

impl Default for ScoreFusion {
    fn default() -> Self {
        Self {
            kazanim_weight: 0.6,
            question_weight: 0.4,
            synergy_bonus: 0.1,
            primary_ratio: 0.9,
        }
    }
}

impl From<&SearchConfig> for ScoreFusion {
    fn from(config: &SearchConfig) -> Self {
        Self {
            kazanim_weight: config.kazanim_weight,
            question_weight: config.question_weight,
            synergy_bonus: config.synergy_bonus,
            primary_ratio: config.primary_ratio,
        }
    }
}

/// Per-code normalized scores of one source
fn normalize(candidates: Vec<SearchCandidate>) -> BTreeMap<String, (CurriculumObjective, f64)> {
    let max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);
    let scale = if max > 0.0 { max } else { 1.0 };

    let mut normalized: BTreeMap<String, (CurriculumObjective, f64)> = BTreeMap::new();
    for candidate in candidates {
        let score = candidate.raw_score / scale;
        match normalized.get_mut(&candidate.objective.code) {
            Some((_, existing)) if *existing >= score => {}
            Some((_, existing)) => *existing = score,
            None => {
                normalized.insert(candidate.objective.code.clone(), (candidate.objective, score));
            }
        }
    }
    normalized
}

impl ScoreFusion {
    /// Fuse direct and discovery candidates into a ranked, tiered list
    pub fn fuse(
        &self,
        direct: Vec<SearchCandidate>,
        discovery: Vec<SearchCandidate>,
        top_k: usize,
    ) -> Result<Vec<MergedCandidate>> {
        let mut direct = normalize(direct);
        let discovery = normalize(discovery);

        let mut merged = Vec::with_capacity(direct.len() + discovery.len());

        for (code, (objective, question_score)) in discovery {
            let kazanim_score = direct.remove(&code).map(|(_, score)| score);
            let score = match kazanim_score {
                Some(kazanim) => {
                    self.kazanim_weight * kazanim
                        + self.question_weight * question_score
                        + self.synergy_bonus
                }
                None => self.question_weight * question_score,
            };
            merged.push(MergedCandidate::new(objective, kazanim_score, Some(question_score), score)?);
        }

        for (_, (objective, kazanim_score)) in direct {
            let score = self.kazanim_weight * kazanim_score;
            merged.push(MergedCandidate::new(objective, Some(kazanim_score), None, score)?);
        }

        merged.sort_by(|a, b| {
            b.merged_score
                .total_cmp(&a.merged_score)
                .then_with(|| a.code().cmp(b.code()))
        });
        merged.truncate(top_k);
        self.assign_tiers(&mut merged);

        Ok(merged)
    }

    /// Top entry is always primary; others are primary within `primary_ratio` of it
    fn assign_tiers(&self, ranked: &mut [MergedCandidate]) {
        let Some(top) = ranked.first().map(|c| c.merged_score) else {
            return;
        };
        let threshold = top * self.primary_ratio;

        for (i, candidate) in ranked.iter_mut().enumerate() {
            candidate.match_type = if i == 0 || candidate.merged_score >= threshold {
                MatchType::Primary
            } else {
                MatchType::Alternative
            };
        }
    }
}
