//! Response Synthesizer - Composes the final analysis for the student
//!
//! Provides:
//! - Prompt assembly from reranked objectives, gaps and supporting passages
//! - Token budgeting of prompt content
//! - Structured analysis generation through the language-model pipeline
//! - A minimal fallback answer whenever the model is unavailable

use chrono::{DateTime, Utc};
use kazanim_common::config::{AppConfig, TokenConfig};
use kazanim_common::errors::{AppError, Result};
use kazanim_common::llm::{invoke_structured, LanguageModel, LlmRequest};
use kazanim_common::metrics;
use kazanim_common::models::{clip_unit, ContextChunk, PrerequisiteGap, RerankedCandidate};
use kazanim_common::resilience::{deps, BreakerRegistry, Resilience};
use kazanim_common::tokens::{Message, TokenBudgetManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Shown when no analysis could be generated
pub const FALLBACK_SUMMARY: &str =
    "Üzgünüz, sorunuz şu anda analiz edilemedi. Lütfen biraz sonra tekrar deneyin.";

/// Synthesized analysis of a student question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAnalysis {
    /// What the question is about
    pub summary: String,

    /// Why each matched objective applies
    pub matched_objectives: Vec<ObjectiveExplanation>,

    /// Step-by-step solution outline
    pub solution_steps: Vec<String>,

    pub key_concepts: Vec<String>,

    pub study_suggestions: Vec<String>,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    /// True when this is the fallback answer
    pub degraded: bool,

    pub generated_at: DateTime<Utc>,
}

impl QuestionAnalysis {
    /// Minimal valid answer used when the model cannot be reached
    pub fn fallback() -> Self {
        Self {
            summary: FALLBACK_SUMMARY.to_string(),
            matched_objectives: Vec::new(),
            solution_steps: Vec::new(),
            key_concepts: Vec::new(),
            study_suggestions: Vec::new(),
            confidence: 0.0,
            degraded: true,
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveExplanation {
    pub code: String,
    pub explanation: String,
}

/// Shape the model is asked to produce
#[derive(Debug, Deserialize)]
struct AnalysisPayload {
    summary: String,
    #[serde(default)]
    matched_objectives: Vec<ObjectiveExplanation>,
    #[serde(default)]
    solution_steps: Vec<String>,
    #[serde(default)]
    key_concepts: Vec<String>,
    #[serde(default)]
    study_suggestions: Vec<String>,
    confidence: f64,
}

fn analysis_schema() -> serde_json::Value {
    let strings = serde_json::json!({"type": "array", "items": {"type": "string"}});
    serde_json::json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "matched_objectives": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "code": {"type": "string"},
                        "explanation": {"type": "string"}
                    },
                    "required": ["code", "explanation"]
                }
            },
            "solution_steps": strings,
            "key_concepts": strings,
            "study_suggestions": strings,
            "confidence": {"type": "number"}
        },
        "required": [
            "summary", "matched_objectives", "solution_steps",
            "key_concepts", "study_suggestions", "confidence"
        ]
    })
}

const SYSTEM_PROMPT: &str = "You are an experienced Turkish high-school teacher. Using ONLY the \
curriculum objectives and passages provided, explain which objectives the student's question \
covers, outline how to solve it, name the key concepts, and suggest what to study next, \
including any missing prerequisites. Answer in Turkish. Set confidence between 0 and 1 to \
reflect how well the objectives cover the question.";

/// Everything the synthesizer needs for one question
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub question: &'a str,
    pub grade: Option<u8>,
    pub candidates: &'a [RerankedCandidate],
    pub gaps: &'a [PrerequisiteGap],
    pub chunks: &'a [ContextChunk],
}

/// Synthesizer for question analyses
pub struct ResponseSynthesizer {
    model: Arc<dyn LanguageModel>,
    resilience: Resilience,
    budget: TokenBudgetManager,
    tokens: TokenConfig,
    max_tokens: usize,
    temperature: f32,
}

impl ResponseSynthesizer {
    /// Create a new synthesizer
    pub fn new(model: Arc<dyn LanguageModel>, registry: &BreakerRegistry, config: &AppConfig) -> Result<Self> {
        let resilience = registry.resilience(
            deps::LANGUAGE_MODEL,
            config.resilience.retry_policy(),
            config.resilience.llm_timeout(),
        );
        Ok(Self::with_parts(
            model,
            resilience,
            TokenBudgetManager::from_config(&config.tokens)?,
            config.tokens.clone(),
        )
        .with_generation(config.llm.max_tokens, config.llm.temperature))
    }

    pub fn with_parts(
        model: Arc<dyn LanguageModel>,
        resilience: Resilience,
        budget: TokenBudgetManager,
        tokens: TokenConfig,
    ) -> Self {
        Self {
            model,
            resilience,
            budget,
            tokens,
            max_tokens: 2000,
            temperature: 0.2,
        }
    }

    pub fn with_generation(mut self, max_tokens: usize, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Synthesize an analysis.
    ///
    /// Only a blank question is an error; every dependency failure yields
    /// [`QuestionAnalysis::fallback`].
    #[instrument(skip(self, input), fields(candidates = input.candidates.len(), gaps = input.gaps.len()))]
    pub async fn synthesize(&self, input: SynthesisInput<'_>) -> Result<QuestionAnalysis> {
        if input.question.trim().is_empty() {
            return Err(AppError::validation("question", "Question must not be blank"));
        }

        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(self.build_prompt(&input)),
        ];

        let fit = self.budget.check_fit(&messages, 0);
        if let Some(warning) = &fit.warning {
            warn!(total = fit.total, available = fit.available, "{}", warning);
        }

        let request = LlmRequest {
            system_prompt: messages[0].content.clone(),
            user_prompt: messages[1].content.clone(),
            schema_name: "question_analysis".to_string(),
            schema: analysis_schema(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let outcome = self
            .resilience
            .call(|| invoke_structured::<AnalysisPayload>(self.model.as_ref(), &request))
            .await;

        match outcome {
            Ok(payload) => {
                metrics::record_synthesis("success");
                let analysis = QuestionAnalysis {
                    summary: payload.summary,
                    matched_objectives: payload.matched_objectives,
                    solution_steps: payload.solution_steps,
                    key_concepts: payload.key_concepts,
                    study_suggestions: payload.study_suggestions,
                    confidence: clip_unit(payload.confidence),
                    degraded: false,
                    generated_at: Utc::now(),
                };
                info!(confidence = analysis.confidence, "Analysis synthesized");
                Ok(analysis)
            }
            Err(e) => {
                warn!(error = %e, "Synthesis failed; returning fallback analysis");
                metrics::record_synthesis("fallback");
                Ok(QuestionAnalysis::fallback())
            }
        }
    }

    /// Build the user prompt, budgeting objectives and passages
    fn build_prompt(&self, input: &SynthesisInput<'_>) -> String {
        let mut prompt = format!("Student question:\n{}\n", input.question);
        if let Some(grade) = input.grade {
            prompt.push_str(&format!("Student grade: {}\n", grade));
        }

        let merged: Vec<_> = input.candidates.iter().map(|c| c.candidate.clone()).collect();
        let objectives = self.budget.prepare_candidates(&merged, self.tokens.candidate_budget);
        prompt.push_str("\nMatched curriculum objectives:\n");
        if objectives.items.is_empty() {
            prompt.push_str("(none found)\n");
        } else {
            prompt.push_str(&objectives.join("\n"));
            prompt.push('\n');
        }

        if !input.gaps.is_empty() {
            prompt.push_str("\nMissing prerequisites:\n");
            for gap in input.gaps {
                prompt.push_str(&format!(
                    "- [{}] ({}) {}\n",
                    gap.code,
                    gap.importance.as_str(),
                    gap.description
                ));
            }
        }

        if !input.chunks.is_empty() {
            let passages = self.budget.prepare_chunks(input.chunks, self.tokens.chunk_budget);
            prompt.push_str("\nSupporting passages:\n");
            prompt.push_str(&passages.join("\n\n"));
            prompt.push('\n');
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kazanim_common::models::{CurriculumObjective, Importance, MergedCandidate};
    use kazanim_common::resilience::{BreakerConfig, RetryPolicy};
    use kazanim_common::tokens::TokenBudget;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    /// Records prompts and replays a canned answer, or fails when there is none
    struct ScriptedModel {
        response: Option<serde_json::Value>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(response: Option<serde_json::Value>) -> Arc<Self> {
            Arc::new(Self {
                response,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn invoke(&self, request: &LlmRequest) -> Result<serde_json::Value> {
            self.prompts.lock().push(request.user_prompt.clone());
            self.response.clone().ok_or_else(|| AppError::Timeout {
                operation: "language-model".into(),
                timeout_ms: 20_000,
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn synthesizer(model: Arc<ScriptedModel>, registry: &BreakerRegistry) -> ResponseSynthesizer {
        let resilience =
            registry.resilience(deps::LANGUAGE_MODEL, RetryPolicy::no_retry(), Duration::from_secs(5));
        let budget = TokenBudgetManager::new(TokenBudget::default()).unwrap();
        ResponseSynthesizer::with_parts(model, resilience, budget, TokenConfig::default())
    }

    fn reranked(code: &str) -> RerankedCandidate {
        let objective = CurriculumObjective {
            code: code.to_string(),
            description: "Mitoz bölünmenin evrelerini açıklar.".to_string(),
            title: "Mitoz".to_string(),
            grade: 9,
            subject: "BIO".to_string(),
            semester: 1,
        };
        let merged = MergedCandidate::new(objective, Some(1.0), Some(1.0), 1.0).unwrap();
        RerankedCandidate::unscored(merged, 1.0)
    }

    fn answer() -> serde_json::Value {
        json!({
            "summary": "Soru mitoz bölünmenin evreleri ile ilgilidir.",
            "matched_objectives": [{"code": "BIO.9.1.2", "explanation": "Evreleri sorar."}],
            "solution_steps": ["Profaz", "Metafaz", "Anafaz", "Telofaz"],
            "key_concepts": ["kromatit", "iğ iplikleri"],
            "study_suggestions": ["Hücre döngüsünü tekrar edin."],
            "confidence": 1.4
        })
    }

    #[tokio::test]
    async fn test_synthesizes_analysis() {
        let model = ScriptedModel::new(Some(answer()));
        let registry = BreakerRegistry::default();
        let candidates = vec![reranked("BIO.9.1.2")];
        let gaps = vec![PrerequisiteGap {
            code: "BIO.9.1.1".into(),
            description: "Hücre döngüsünü açıklar.".into(),
            importance: Importance::Helpful,
            supports: vec!["BIO.9.1.2".into()],
        }];
        let chunks = vec![ContextChunk {
            source: "Biyoloji 9, s.42".into(),
            content: "Metafazda kromozomlar ekvatoral düzlemde dizilir.".into(),
            score: 0.8,
        }];

        let analysis = synthesizer(model.clone(), &registry)
            .synthesize(SynthesisInput {
                question: "Mitoz bölünme evreleri nelerdir?",
                grade: Some(9),
                candidates: &candidates,
                gaps: &gaps,
                chunks: &chunks,
            })
            .await
            .unwrap();

        assert!(!analysis.degraded);
        assert_eq!(analysis.confidence, 1.0);
        assert_eq!(analysis.solution_steps.len(), 4);
        assert_eq!(analysis.matched_objectives[0].code, "BIO.9.1.2");

        let prompts = model.prompts.lock();
        assert!(prompts[0].contains("BIO.9.1.2"));
        assert!(prompts[0].contains("BIO.9.1.1"));
        assert!(prompts[0].contains("Biyoloji 9, s.42"));
    }

    #[tokio::test]
    async fn test_failure_returns_fallback() {
        let model = ScriptedModel::new(None);
        let registry = BreakerRegistry::default();
        let analysis = synthesizer(model, &registry)
            .synthesize(SynthesisInput {
                question: "Mitoz bölünme evreleri nelerdir?",
                grade: None,
                candidates: &[],
                gaps: &[],
                chunks: &[],
            })
            .await
            .unwrap();

        assert!(analysis.degraded);
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.summary, FALLBACK_SUMMARY);
        assert!(analysis.solution_steps.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_answer_returns_fallback() {
        let model = ScriptedModel::new(Some(json!({"answer": "Profaz, metafaz..."})));
        let registry = BreakerRegistry::default();
        let analysis = synthesizer(model, &registry)
            .synthesize(SynthesisInput {
                question: "Mitoz?",
                grade: Some(9),
                candidates: &[],
                gaps: &[],
                chunks: &[],
            })
            .await
            .unwrap();
        assert!(analysis.degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_returns_fallback_without_calling_model() {
        let model = ScriptedModel::new(Some(answer()));
        let registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::default()
        });
        registry.get(deps::LANGUAGE_MODEL).record_failure();

        let analysis = synthesizer(model.clone(), &registry)
            .synthesize(SynthesisInput {
                question: "Mitoz?",
                grade: None,
                candidates: &[],
                gaps: &[],
                chunks: &[],
            })
            .await
            .unwrap();

        assert!(analysis.degraded);
        assert!(model.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_blank_question_is_rejected() {
        let model = ScriptedModel::new(Some(answer()));
        let registry = BreakerRegistry::default();
        let err = synthesizer(model, &registry)
            .synthesize(SynthesisInput {
                question: "  ",
                grade: None,
                candidates: &[],
                gaps: &[],
                chunks: &[],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
