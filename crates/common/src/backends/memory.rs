//! In-memory backends for embedded use and fixtures

use super::{
    CurriculumSearchBackend, MasteryStore, ObjectiveHit, PrerequisiteGraphStore, QuestionHit,
    QuestionSearchBackend, SearchFilter,
};
use crate::embeddings::cosine_similarity;
use crate::errors::Result;
use crate::models::CurriculumObjective;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Sort by score descending, code ascending, and keep `top_k`
fn rank<T>(mut scored: Vec<(f64, String, T)>, top_k: usize) -> Vec<(f64, T)> {
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    scored.truncate(top_k);
    scored.into_iter().map(|(score, _, item)| (score, item)).collect()
}

/// Objective statements with precomputed vectors
#[derive(Debug, Default, Clone)]
pub struct InMemoryCurriculumIndex {
    entries: Vec<(CurriculumObjective, Vec<f32>)>,
}

impl InMemoryCurriculumIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, objective: CurriculumObjective, vector: Vec<f32>) {
        self.entries.push((objective, vector));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CurriculumSearchBackend for InMemoryCurriculumIndex {
    async fn search(
        &self,
        _query_text: &str,
        query_vector: &[f32],
        filter: &SearchFilter,
        top_k: usize,
    ) -> Result<Vec<ObjectiveHit>> {
        let scored = self
            .entries
            .iter()
            .filter(|(objective, _)| filter.matches(objective))
            .map(|(objective, vector)| {
                let score = cosine_similarity(query_vector, vector) as f64;
                (score, objective.code.clone(), objective.clone())
            })
            .collect();

        Ok(rank(scored, top_k)
            .into_iter()
            .map(|(raw_score, objective)| ObjectiveHit {
                objective,
                raw_score,
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
struct StoredQuestion {
    id: String,
    text: String,
    parent: CurriculumObjective,
    vector: Vec<f32>,
}

/// Past questions with precomputed vectors, each tagged with its objective
#[derive(Debug, Default, Clone)]
pub struct InMemoryQuestionIndex {
    questions: Vec<StoredQuestion>,
}

impl InMemoryQuestionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        question_id: impl Into<String>,
        question_text: impl Into<String>,
        parent: CurriculumObjective,
        vector: Vec<f32>,
    ) {
        self.questions.push(StoredQuestion {
            id: question_id.into(),
            text: question_text.into(),
            parent,
            vector,
        });
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

#[async_trait]
impl QuestionSearchBackend for InMemoryQuestionIndex {
    async fn search(
        &self,
        _query_text: &str,
        query_vector: &[f32],
        filter: &SearchFilter,
        top_k: usize,
    ) -> Result<Vec<QuestionHit>> {
        let scored = self
            .questions
            .iter()
            .filter(|q| filter.matches(&q.parent))
            .map(|q| {
                let score = cosine_similarity(query_vector, &q.vector) as f64;
                (score, q.id.clone(), q)
            })
            .collect();

        Ok(rank(scored, top_k)
            .into_iter()
            .map(|(raw_score, q)| QuestionHit {
                question_id: q.id.clone(),
                question_text: q.text.clone(),
                parent: q.parent.clone(),
                raw_score,
            })
            .collect())
    }
}

/// Prerequisite edges plus an optional objective catalog
#[derive(Debug, Default, Clone)]
pub struct InMemoryPrerequisiteGraph {
    edges: HashMap<String, Vec<String>>,
    catalog: HashMap<String, CurriculumObjective>,
}

impl InMemoryPrerequisiteGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `code` depends on `prerequisite`
    pub fn add_edge(&mut self, code: impl Into<String>, prerequisite: impl Into<String>) {
        let prerequisites = self.edges.entry(code.into()).or_default();
        let prerequisite = prerequisite.into();
        if !prerequisites.contains(&prerequisite) {
            prerequisites.push(prerequisite);
        }
    }

    pub fn add_objective(&mut self, objective: CurriculumObjective) {
        self.catalog.insert(objective.code.clone(), objective);
    }
}

#[async_trait]
impl PrerequisiteGraphStore for InMemoryPrerequisiteGraph {
    async fn get_prerequisites(&self, code: &str) -> Result<Vec<String>> {
        Ok(self.edges.get(code).cloned().unwrap_or_default())
    }

    async fn get_objective(&self, code: &str) -> Result<Option<CurriculumObjective>> {
        Ok(self.catalog.get(code).cloned())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryMasteryStore {
    mastered: HashMap<String, HashSet<String>>,
}

impl InMemoryMasteryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_mastered(&mut self, student_id: impl Into<String>, code: impl Into<String>) {
        self.mastered.entry(student_id.into()).or_default().insert(code.into());
    }
}

#[async_trait]
impl MasteryStore for InMemoryMasteryStore {
    async fn get_mastered_codes(&self, student_id: &str) -> Result<HashSet<String>> {
        Ok(self.mastered.get(student_id).cloned().unwrap_or_default())
    }
}
