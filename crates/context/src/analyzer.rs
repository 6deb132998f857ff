//! End-to-end question analysis
//!
//! merge → (relaxed retry) → rerank → gaps → synthesize. The request layer
//! calls [`QuestionAnalyzer::analyze`] and always gets an outcome back unless
//! the input itself is invalid.

use crate::gaps::PrerequisiteGapFinder;
use crate::synthesizer::{QuestionAnalysis, ResponseSynthesizer, SynthesisInput};
use kazanim_common::backends::{
    CurriculumSearchBackend, MasteryStore, PrerequisiteGraphStore, QuestionSearchBackend,
};
use kazanim_common::config::{AppConfig, SearchConfig};
use kazanim_common::embeddings::Embedder;
use kazanim_common::errors::Result;
use kazanim_common::llm::LanguageModel;
use kazanim_common::models::{ContextChunk, PrerequisiteGap, RerankedCandidate};
use kazanim_common::resilience::BreakerRegistry;
use kazanim_search::{HybridMergeCoordinator, MergeRequest, RelevanceReranker};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Analysis request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub question: String,

    pub grade: Option<u8>,

    pub subject: Option<String>,

    #[serde(default)]
    pub exam_mode: bool,

    /// Defaults to `search.default_top_k`
    pub top_k: Option<usize>,

    /// Enables mastery-aware gap analysis
    pub student_id: Option<String>,

    #[serde(default = "default_include_gaps")]
    pub include_gaps: bool,

    /// Extra passages for the synthesizer
    #[serde(default)]
    pub context_chunks: Vec<ContextChunk>,
}

fn default_include_gaps() -> bool {
    true
}

impl AnalysisRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            grade: None,
            subject: None,
            exam_mode: false,
            top_k: None,
            student_id: None,
            include_gaps: true,
            context_chunks: Vec::new(),
        }
    }
}

/// Analysis result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub analysis_id: Uuid,
    pub candidates: Vec<RerankedCandidate>,
    pub gaps: Vec<PrerequisiteGap>,
    pub analysis: QuestionAnalysis,

    /// The grade filter was relaxed to find any candidates
    pub relaxed_filter: bool,

    pub elapsed_ms: u64,
}

/// Orchestrates the engine for one question
pub struct QuestionAnalyzer {
    coordinator: HybridMergeCoordinator,
    reranker: RelevanceReranker,
    gap_finder: PrerequisiteGapFinder,
    synthesizer: ResponseSynthesizer,
    mastery: Option<Arc<dyn MasteryStore>>,
    search: SearchConfig,
}

impl QuestionAnalyzer {
    pub fn new(
        coordinator: HybridMergeCoordinator,
        reranker: RelevanceReranker,
        gap_finder: PrerequisiteGapFinder,
        synthesizer: ResponseSynthesizer,
    ) -> Self {
        let search = coordinator.config().clone();
        Self {
            coordinator,
            reranker,
            gap_finder,
            synthesizer,
            mastery: None,
            search,
        }
    }

    /// Wire every component from a validated config, sharing breakers
    /// through `registry`
    #[allow(clippy::too_many_arguments)]
    pub fn from_config(
        config: &AppConfig,
        registry: &BreakerRegistry,
        embedder: Arc<dyn Embedder>,
        curriculum: Arc<dyn CurriculumSearchBackend>,
        questions: Arc<dyn QuestionSearchBackend>,
        graph: Option<Arc<dyn PrerequisiteGraphStore>>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            HybridMergeCoordinator::new(embedder, curriculum, questions, registry, config),
            RelevanceReranker::new(model.clone(), registry, config),
            PrerequisiteGapFinder::new(graph, &config.gaps),
            ResponseSynthesizer::new(model, registry, config)?,
        ))
    }

    pub fn with_mastery_store(mut self, store: Arc<dyn MasteryStore>) -> Self {
        self.mastery = Some(store);
        self
    }

    #[instrument(skip(self, request), fields(grade = ?request.grade, subject = ?request.subject))]
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        let started = Instant::now();
        let analysis_id = Uuid::new_v4();
        let top_k = request.top_k.unwrap_or(self.search.default_top_k);

        let mut merge = MergeRequest::new(request.question.clone(), top_k).with_exam_mode(request.exam_mode);
        merge.grade = request.grade;
        merge.subject = request.subject.clone();

        let mut candidates = self.coordinator.merge(&merge).await?;
        let mut relaxed_filter = false;

        if candidates.is_empty() && !request.exam_mode && request.grade.is_some() && self.search.relax_on_empty {
            info!(%analysis_id, "No candidates; retrying with relaxed grade filter");
            candidates = self.coordinator.merge(&merge.relaxed()).await?;
            relaxed_filter = true;
        }

        let candidates = self.reranker.rerank(&request.question, candidates, top_k).await;

        let gaps = if request.include_gaps && !candidates.is_empty() {
            let matched: Vec<String> = candidates.iter().map(|c| c.code().to_string()).collect();
            let mastered = self.mastered_codes(request.student_id.as_deref()).await;
            self.gap_finder.find_gaps(&matched, request.grade, &mastered).await
        } else {
            Vec::new()
        };

        let analysis = self
            .synthesizer
            .synthesize(SynthesisInput {
                question: &request.question,
                grade: request.grade,
                candidates: &candidates,
                gaps: &gaps,
                chunks: &request.context_chunks,
            })
            .await?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            %analysis_id,
            candidates = candidates.len(),
            gaps = gaps.len(),
            relaxed_filter,
            degraded = analysis.degraded,
            elapsed_ms,
            "Question analyzed"
        );

        Ok(AnalysisOutcome {
            analysis_id,
            candidates,
            gaps,
            analysis,
            relaxed_filter,
            elapsed_ms,
        })
    }

    async fn mastered_codes(&self, student_id: Option<&str>) -> HashSet<String> {
        let (Some(store), Some(student_id)) = (&self.mastery, student_id) else {
            return HashSet::new();
        };
        match store.get_mastered_codes(student_id).await {
            Ok(codes) => codes,
            Err(e) => {
                warn!(student_id, error = %e, "Mastery lookup failed; assuming nothing mastered");
                HashSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kazanim_common::backends::{
        InMemoryCurriculumIndex, InMemoryMasteryStore, InMemoryPrerequisiteGraph,
        InMemoryQuestionIndex,
    };
    use kazanim_common::embeddings::MockEmbedder;
    use kazanim_common::errors::AppError;
    use kazanim_common::llm::LlmRequest;
    use kazanim_common::models::{CurriculumObjective, Importance};
    use serde_json::json;

    const QUESTION: &str = "Mitoz bölünme evreleri nelerdir?";

    /// Answers rerank and synthesis requests by schema name
    struct CurriculumModel {
        available: bool,
    }

    #[async_trait]
    impl LanguageModel for CurriculumModel {
        async fn invoke(&self, request: &LlmRequest) -> Result<serde_json::Value> {
            if !self.available {
                return Err(AppError::Upstream {
                    service: "language-model".into(),
                    status: Some(503),
                    message: "unavailable".into(),
                });
            }
            match request.schema_name.as_str() {
                "relevance_scores" => Ok(json!({
                    "scores": [
                        {"code": "BIO.10.2.3", "score": 0.95, "reason": "Mitoz evreleri"},
                        {"code": "BIO.10.2.1", "score": 0.4, "reason": "Hücre döngüsü"}
                    ]
                })),
                _ => Ok(json!({
                    "summary": "Mitoz evreleri sorusu.",
                    "matched_objectives": [],
                    "solution_steps": ["Profaz", "Metafaz", "Anafaz", "Telofaz"],
                    "key_concepts": ["kromozom"],
                    "study_suggestions": [],
                    "confidence": 0.8
                })),
            }
        }

        fn model_name(&self) -> &str {
            "curriculum-model"
        }
    }

    fn objective(code: &str, grade: u8, description: &str) -> CurriculumObjective {
        CurriculumObjective {
            code: code.to_string(),
            description: description.to_string(),
            title: String::new(),
            grade,
            subject: "BIO".to_string(),
            semester: 1,
        }
    }

    async fn analyzer(available: bool) -> QuestionAnalyzer {
        let embedder = Arc::new(MockEmbedder::new(32));
        let mitoz = embedder.embed(QUESTION).await.unwrap();
        let cycle = embedder.embed("Hücre döngüsü").await.unwrap();

        let mitosis = objective("BIO.10.2.3", 10, "Mitoz bölünmenin evrelerini açıklar.");
        let cell_cycle = objective("BIO.10.2.1", 10, "Hücre döngüsünü açıklar.");

        let mut curriculum = InMemoryCurriculumIndex::new();
        curriculum.insert(mitosis.clone(), mitoz.clone());
        curriculum.insert(cell_cycle.clone(), cycle.clone());

        let mut questions = InMemoryQuestionIndex::new();
        questions.insert("q1", QUESTION, mitosis, mitoz);
        questions.insert("q2", "Hücre döngüsünün evreleri", cell_cycle, cycle);

        let mut graph = InMemoryPrerequisiteGraph::new();
        graph.add_edge("BIO.10.2.3", "BIO.9.1.1");
        graph.add_edge("BIO.10.2.3", "BIO.8.3.1");
        graph.add_objective(objective("BIO.9.1.1", 9, "Hücrenin yapısını açıklar."));

        let config = AppConfig::default();
        let registry = BreakerRegistry::from_config(&config.resilience);
        QuestionAnalyzer::from_config(
            &config,
            &registry,
            embedder,
            Arc::new(curriculum),
            Arc::new(questions),
            Some(Arc::new(graph)),
            Arc::new(CurriculumModel { available }),
        )
        .unwrap()
    }

    fn request(grade: u8) -> AnalysisRequest {
        AnalysisRequest {
            grade: Some(grade),
            subject: Some("BIO".into()),
            ..AnalysisRequest::new(QUESTION)
        }
    }

    #[tokio::test]
    async fn test_full_analysis() {
        let analyzer = analyzer(true).await;
        let outcome = analyzer.analyze(&request(10)).await.unwrap();

        assert!(!outcome.relaxed_filter);
        assert_eq!(outcome.candidates[0].code(), "BIO.10.2.3");
        assert!(outcome.candidates[0].candidate.is_primary());
        assert!(!outcome.analysis.degraded);
        assert_eq!(outcome.analysis.solution_steps.len(), 4);

        let gaps: Vec<(&str, Importance)> =
            outcome.gaps.iter().map(|g| (g.code.as_str(), g.importance)).collect();
        assert_eq!(
            gaps,
            vec![("BIO.8.3.1", Importance::Critical), ("BIO.9.1.1", Importance::Important)]
        );
    }

    #[tokio::test]
    async fn test_mastered_prerequisites_are_not_gaps() {
        let mut mastery = InMemoryMasteryStore::new();
        mastery.mark_mastered("ogrenci-1", "BIO.8.3.1");
        let analyzer = analyzer(true).await.with_mastery_store(Arc::new(mastery));

        let outcome = analyzer
            .analyze(&AnalysisRequest {
                student_id: Some("ogrenci-1".into()),
                ..request(10)
            })
            .await
            .unwrap();

        let codes: Vec<&str> = outcome.gaps.iter().map(|g| g.code.as_str()).collect();
        assert_eq!(codes, vec!["BIO.9.1.1"]);
    }

    #[tokio::test]
    async fn test_relaxes_grade_filter_when_nothing_matches() {
        let analyzer = analyzer(true).await;
        let outcome = analyzer.analyze(&request(12)).await.unwrap();

        assert!(outcome.relaxed_filter);
        assert!(!outcome.candidates.is_empty());
        assert!(outcome.candidates.iter().all(|c| c.candidate.objective.grade <= 12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_outage_still_answers() {
        let analyzer = analyzer(false).await;
        let outcome = analyzer.analyze(&request(10)).await.unwrap();

        assert!(outcome.analysis.degraded);
        assert_eq!(outcome.analysis.confidence, 0.0);
        assert_eq!(outcome.candidates[0].code(), "BIO.10.2.3");
        assert!(outcome.candidates[0].reasoning.is_none());
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut config = AppConfig::default();
        config.search.kazanim_weight = -0.5;
        let registry = BreakerRegistry::from_config(&config.resilience);

        let result = QuestionAnalyzer::from_config(
            &config,
            &registry,
            Arc::new(MockEmbedder::new(8)),
            Arc::new(InMemoryCurriculumIndex::new()),
            Arc::new(InMemoryQuestionIndex::new()),
            None,
            Arc::new(CurriculumModel { available: true }),
        );
        assert!(matches!(result.err(), Some(AppError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let analyzer = analyzer(true).await;
        let err = analyzer.analyze(&request(0)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let err = analyzer
            .analyze(&AnalysisRequest {
                subject: Some("XYZ".into()),
                ..request(10)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
