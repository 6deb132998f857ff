//! Curriculum data model
//!
//! Reference data (objectives), per-query candidates at each stage of the
//! retrieval pipeline, and prerequisite gaps.

mod code;

pub use code::ObjectiveCode;

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An atomic curriculum learning outcome (kazanım)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriculumObjective {
    /// Hierarchical code `subject.grade.unit.topic[.sub]`
    pub code: String,

    /// Objective statement
    pub description: String,

    /// Short title
    #[serde(default)]
    pub title: String,

    /// Grade level (1-12)
    pub grade: u8,

    /// Subject code, e.g. `BIO`
    pub subject: String,

    /// Semester: 0 = unspecified, 1 or 2
    #[serde(default)]
    pub semester: u8,
}

/// Which search source produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// Curriculum direct search over objective statements
    Direct,
    /// Question-similarity search linking back to parent objectives
    Discovery,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSource::Direct => "direct",
            SearchSource::Discovery => "discovery",
        }
    }
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single source's hit for an objective
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub objective: CurriculumObjective,

    /// Source-native score, not normalized
    pub raw_score: f64,

    pub source: SearchSource,
}

/// Non-empty set of sources that found a merged candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoundVia {
    Direct,
    Discovery,
    Both,
}

/// Answer-grade vs contextual tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Primary,
    Alternative,
}

/// An objective scored by fusing both search sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedCandidate {
    pub objective: CurriculumObjective,

    /// Normalized direct-search score, if the direct source found it
    pub kazanim_score: Option<f64>,

    /// Normalized discovery score, if the question source found it
    pub question_score: Option<f64>,

    pub found_via: FoundVia,

    /// Fused score in [0, 1]
    pub merged_score: f64,

    pub match_type: MatchType,
}

impl MergedCandidate {
    /// Build a merged candidate.
    ///
    /// `found_via` is derived from which source scores are present; at least
    /// one must be. The merged score is clipped to [0, 1]. Candidates start as
    /// alternatives; tiering happens once the full ranking is known.
    pub fn new(
        objective: CurriculumObjective,
        kazanim_score: Option<f64>,
        question_score: Option<f64>,
        merged_score: f64,
    ) -> Result<Self> {
        let found_via = match (kazanim_score, question_score) {
            (Some(_), Some(_)) => FoundVia::Both,
            (Some(_), None) => FoundVia::Direct,
            (None, Some(_)) => FoundVia::Discovery,
            (None, None) => {
                return Err(AppError::Internal {
                    message: format!(
                        "merged candidate {} has no contributing source",
                        objective.code
                    ),
                })
            }
        };

        Ok(Self {
            objective,
            kazanim_score,
            question_score,
            found_via,
            merged_score: clip_unit(merged_score),
            match_type: MatchType::Alternative,
        })
    }

    pub fn code(&self) -> &str {
        &self.objective.code
    }

    pub fn is_primary(&self) -> bool {
        self.match_type == MatchType::Primary
    }
}

/// A merged candidate annotated with language-model relevance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankedCandidate {
    #[serde(flatten)]
    pub candidate: MergedCandidate,

    /// Model relevance in [0, 1]; the normalized retrieval score when unscored
    pub llm_relevance_score: f64,

    /// Short model rationale
    pub reasoning: Option<String>,

    /// Retrieval/relevance blend used for final ordering
    pub blended_score: f64,
}

impl RerankedCandidate {
    /// Wrap a candidate that the model never scored
    pub fn unscored(candidate: MergedCandidate, normalized_retrieval: f64) -> Self {
        let normalized = clip_unit(normalized_retrieval);
        Self {
            candidate,
            llm_relevance_score: normalized,
            reasoning: None,
            blended_score: normalized,
        }
    }

    pub fn code(&self) -> &str {
        self.candidate.code()
    }
}

/// Priority tier of a missing prerequisite
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Critical,
    Important,
    Helpful,
}

impl Importance {
    /// Tier from grade distance between the target and the prerequisite
    pub fn from_grade_distance(distance: i32) -> Self {
        match distance {
            d if d >= 2 => Importance::Critical,
            1 => Importance::Important,
            _ => Importance::Helpful,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Critical => "critical",
            Importance::Important => "important",
            Importance::Helpful => "helpful",
        }
    }
}

/// A foundational objective the student is missing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrerequisiteGap {
    pub code: String,
    pub description: String,
    pub importance: Importance,

    /// Matched objectives that depend on this prerequisite
    pub supports: Vec<String>,
}

/// Supporting passage offered to the synthesizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChunk {
    /// Where the passage came from (book, page, section)
    pub source: String,
    pub content: String,
    pub score: f64,
}

/// Clip a score into [0, 1], mapping NaN to 0
pub fn clip_unit(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
