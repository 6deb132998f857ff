//! External collaborators of the engine
//!
//! The engine only reads from these: two search indexes over the curriculum
//! space, the prerequisite relation and (optionally) per-student mastery.

mod memory;

pub use memory::{
    InMemoryCurriculumIndex, InMemoryMasteryStore, InMemoryPrerequisiteGraph,
    InMemoryQuestionIndex,
};

use crate::errors::Result;
use crate::models::CurriculumObjective;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Grade and subject filter shared by both search sources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub grade: Option<u8>,

    /// Upper-case subject code
    pub subject: Option<String>,

    /// `grade <= requested` instead of `grade == requested`
    pub exam_mode: bool,
}

impl SearchFilter {
    pub fn matches(&self, objective: &CurriculumObjective) -> bool {
        let grade_ok = match self.grade {
            Some(grade) if self.exam_mode => objective.grade <= grade,
            Some(grade) => objective.grade == grade,
            None => true,
        };
        let subject_ok = self
            .subject
            .as_deref()
            .map_or(true, |s| objective.subject.eq_ignore_ascii_case(s));
        grade_ok && subject_ok
    }
}

/// A curriculum objective returned by direct search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveHit {
    pub objective: CurriculumObjective,
    pub raw_score: f64,
}

/// A past question returned by similarity search, linked to its objective
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionHit {
    pub question_id: String,
    pub question_text: String,
    pub parent: CurriculumObjective,
    pub raw_score: f64,
}

/// Index over objective statements
#[async_trait]
pub trait CurriculumSearchBackend: Send + Sync {
    async fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        filter: &SearchFilter,
        top_k: usize,
    ) -> Result<Vec<ObjectiveHit>>;
}

/// Index over past questions tagged with their objective
#[async_trait]
pub trait QuestionSearchBackend: Send + Sync {
    async fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        filter: &SearchFilter,
        top_k: usize,
    ) -> Result<Vec<QuestionHit>>;
}

/// Read-only prerequisite relation
#[async_trait]
pub trait PrerequisiteGraphStore: Send + Sync {
    /// Codes the given objective directly depends on
    async fn get_prerequisites(&self, code: &str) -> Result<Vec<String>>;

    /// Catalog lookup; stores without a catalog return `None`
    async fn get_objective(&self, _code: &str) -> Result<Option<CurriculumObjective>> {
        Ok(None)
    }
}

/// Read-only per-student mastery
#[async_trait]
pub trait MasteryStore: Send + Sync {
    async fn get_mastered_codes(&self, student_id: &str) -> Result<HashSet<String>>;
}
