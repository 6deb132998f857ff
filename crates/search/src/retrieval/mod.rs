//! Hybrid curriculum retrieval
//!
//! Two independent sources over the same curriculum space:
//! - Direct search (question vs objective statements)
//! - Discovery search (question vs past questions, linked to their objective)
//!
//! The coordinator queries both concurrently and fuses their normalized
//! scores into a single ranked list of merged candidates.

mod direct;
mod discovery;
mod fusion;
mod hybrid;

pub use direct::DirectSearch;
pub use discovery::DiscoverySearch;
pub use fusion::ScoreFusion;
pub use hybrid::HybridMergeCoordinator;

use kazanim_common::backends::SearchFilter;
use kazanim_common::errors::{AppError, Result};
use kazanim_common::models::{SearchCandidate, SearchSource};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Longest accepted question, in characters
pub const MAX_QUESTION_CHARS: usize = 2000;

/// Merge request parameters
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MergeRequest {
    #[validate(length(min = 1, max = 2000))]
    pub question: String,

    #[validate(range(min = 1, max = 12))]
    pub grade: Option<u8>,

    pub subject: Option<String>,

    /// Relax the grade filter to `<=`
    #[serde(default)]
    pub exam_mode: bool,

    #[validate(range(min = 1))]
    pub top_k: usize,
}

impl MergeRequest {
    pub fn new(question: impl Into<String>, top_k: usize) -> Self {
        Self {
            question: question.into(),
            grade: None,
            subject: None,
            exam_mode: false,
            top_k,
        }
    }

    pub fn with_grade(mut self, grade: u8) -> Self {
        self.grade = Some(grade);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_exam_mode(mut self, exam_mode: bool) -> Self {
        self.exam_mode = exam_mode;
        self
    }

    /// Same request with the grade filter relaxed to `<=`
    pub fn relaxed(&self) -> Self {
        self.clone().with_exam_mode(true)
    }

    /// Validate and normalize: trimmed question, upper-case known subject,
    /// `top_k` clamped to `max_top_k`.
    pub fn normalized(&self, known_subjects: &[String], max_top_k: usize) -> Result<Self> {
        self.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: e.field_errors().keys().next().map(|k| k.to_string()),
        })?;

        let question = self.question.trim();
        if question.is_empty() {
            return Err(AppError::validation("question", "Question must not be blank"));
        }

        let subject = match self.subject.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(subject) => {
                let subject = subject.to_uppercase();
                if !known_subjects.iter().any(|known| known.eq_ignore_ascii_case(&subject)) {
                    return Err(AppError::validation(
                        "subject",
                        format!("Unknown subject code: {}", subject),
                    ));
                }
                Some(subject)
            }
        };

        Ok(Self {
            question: question.to_string(),
            grade: self.grade,
            subject,
            exam_mode: self.exam_mode,
            top_k: self.top_k.min(max_top_k.max(1)),
        })
    }

    /// Filter applied identically to both sources
    pub fn filter(&self) -> SearchFilter {
        SearchFilter {
            grade: self.grade,
            subject: self.subject.clone(),
            exam_mode: self.exam_mode,
        }
    }
}

/// One of the two candidate sources the coordinator fans out to
#[async_trait::async_trait]
pub trait CandidateSource: Send + Sync {
    /// Candidates for the query, each objective at most once
    async fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchCandidate>>;

    fn source(&self) -> SearchSource;
}
