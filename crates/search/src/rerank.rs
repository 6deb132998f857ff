//! Language-model relevance reranking
//!
//! Scores merged candidates against the question in a single structured
//! call and blends the model's relevance with the retrieval score.
//! Reranking is an enhancement: any failure passes the input through in its
//! retrieval order.

use kazanim_common::config::{AppConfig, RerankConfig};
use kazanim_common::errors::Result;
use kazanim_common::llm::{invoke_structured, LanguageModel, LlmRequest};
use kazanim_common::metrics;
use kazanim_common::models::{clip_unit, MergedCandidate, RerankedCandidate};
use kazanim_common::resilience::{deps, BreakerRegistry, Resilience};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const SYSTEM_PROMPT: &str = "You are an experienced teacher matching student questions to \
curriculum learning objectives. Score how well each objective matches the question using this rubric:\n\
- 0.9-1.0: the objective is exactly what the question asks about\n\
- 0.7-0.9: strongly related, the question clearly falls under the objective\n\
- 0.5-0.7: partially related, shares the topic but not the specific skill\n\
- 0.2-0.5: weakly related, same subject area only\n\
- 0.0-0.2: unrelated\n\
Score every objective. Give a one-sentence reason for each score.";

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<RelevanceScore>,
}

#[derive(Debug, Deserialize)]
struct RelevanceScore {
    code: String,
    score: f64,
    #[serde(default)]
    reason: Option<String>,
}

fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "scores": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "code": {"type": "string"},
                        "score": {"type": "number"},
                        "reason": {"type": "string"}
                    },
                    "required": ["code", "score", "reason"]
                }
            }
        },
        "required": ["scores"]
    })
}

/// LLM reranker for merged candidates
pub struct RelevanceReranker {
    model: Arc<dyn LanguageModel>,
    resilience: Resilience,
    config: RerankConfig,
    max_tokens: usize,
    temperature: f32,
}

impl RelevanceReranker {
    pub fn new(model: Arc<dyn LanguageModel>, registry: &BreakerRegistry, config: &AppConfig) -> Self {
        let resilience = registry.resilience(
            deps::LANGUAGE_MODEL,
            config.resilience.retry_policy(),
            config.resilience.llm_timeout(),
        );
        Self::with_resilience(model, resilience, config.rerank.clone())
            .with_generation(config.llm.max_tokens, 0.0)
    }

    pub fn with_resilience(model: Arc<dyn LanguageModel>, resilience: Resilience, config: RerankConfig) -> Self {
        Self {
            model,
            resilience,
            config,
            max_tokens: 2000,
            temperature: 0.0,
        }
    }

    pub fn with_generation(mut self, max_tokens: usize, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Rerank the first `max_candidates` candidates and return the best `top_k`.
    ///
    /// Candidates past `max_candidates` follow the reranked ones unscored.
    #[instrument(skip(self, question, candidates), fields(candidates = candidates.len()))]
    pub async fn rerank(
        &self,
        question: &str,
        candidates: Vec<MergedCandidate>,
        top_k: usize,
    ) -> Vec<RerankedCandidate> {
        let max_score = candidates
            .iter()
            .map(|c| c.merged_score)
            .fold(0.0_f64, f64::max);
        let normalize = |c: &MergedCandidate| {
            if max_score > 0.0 {
                c.merged_score / max_score
            } else {
                c.merged_score
            }
        };

        let mut head = candidates;
        let tail = if head.len() > self.config.max_candidates {
            head.split_off(self.config.max_candidates)
        } else {
            Vec::new()
        };

        if !self.config.enabled || head.len() <= 1 {
            metrics::record_rerank("skipped");
            return passthrough(head.into_iter().chain(tail), normalize, top_k);
        }

        let scores = match self.score(question, &head).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!(error = %e, "Reranking failed; keeping retrieval order");
                metrics::record_rerank("degraded");
                return passthrough(head.into_iter().chain(tail), normalize, top_k);
            }
        };

        let beta = clip_unit(self.config.llm_weight);
        let scored = scores.len();
        let mut reranked: Vec<RerankedCandidate> = head
            .into_iter()
            .map(|candidate| {
                let normalized = normalize(&candidate);
                match scores.get(candidate.code()) {
                    Some((relevance, reason)) => RerankedCandidate {
                        blended_score: (1.0 - beta) * normalized + beta * relevance,
                        llm_relevance_score: *relevance,
                        reasoning: reason.clone(),
                        candidate,
                    },
                    None => RerankedCandidate::unscored(candidate, normalized),
                }
            })
            .collect();

        reranked.sort_by(|a, b| {
            b.blended_score
                .total_cmp(&a.blended_score)
                .then_with(|| a.code().cmp(b.code()))
        });
        reranked.extend(tail.into_iter().map(|c| {
            let normalized = normalize(&c);
            RerankedCandidate::unscored(c, normalized)
        }));
        reranked.truncate(top_k);

        info!(scored, returned = reranked.len(), "Rerank complete");
        metrics::record_rerank("success");
        reranked
    }

    /// Model scores keyed by code, clamped to [0, 1]; unknown codes dropped
    async fn score(
        &self,
        question: &str,
        candidates: &[MergedCandidate],
    ) -> Result<HashMap<String, (f64, Option<String>)>> {
        let request = LlmRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: build_prompt(question, candidates),
            schema_name: "relevance_scores".to_string(),
            schema: response_schema(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response: RerankResponse = self
            .resilience
            .call(|| invoke_structured(self.model.as_ref(), &request))
            .await?;

        let mut scores = HashMap::new();
        for entry in response.scores {
            if !candidates.iter().any(|c| c.code() == entry.code) {
                debug!(code = %entry.code, "Ignoring score for unknown code");
                continue;
            }
            scores
                .entry(entry.code)
                .or_insert((clip_unit(entry.score), entry.reason));
        }
        Ok(scores)
    }
}

fn build_prompt(question: &str, candidates: &[MergedCandidate]) -> String {
    let mut prompt = format!("Student question:\n{}\n\nCandidate objectives:\n", question);
    for candidate in candidates {
        let objective = &candidate.objective;
        prompt.push_str(&format!(
            "- {} (grade {}, {}): {}\n",
            objective.code, objective.grade, objective.subject, objective.description
        ));
    }
    prompt.push_str("\nReturn {\"scores\": [{\"code\", \"score\", \"reason\"}] covering every code above.");
    prompt
}

/// Unranked fallback: retrieval order, model score = normalized retrieval score
fn passthrough(
    candidates: impl Iterator<Item = MergedCandidate>,
    normalize: impl Fn(&MergedCandidate) -> f64,
    top_k: usize,
) -> Vec<RerankedCandidate> {
    candidates
        .take(top_k)
        .map(|c| {
            let normalized = normalize(&c);
            RerankedCandidate::unscored(c, normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kazanim_common::errors::AppError;
    use kazanim_common::models::CurriculumObjective;
    use kazanim_common::resilience::{BreakerConfig, RetryPolicy};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Language model returning a canned answer, or failing when there is none
    struct ScriptedModel {
        response: Option<serde_json::Value>,
        calls: AtomicU32,
    }

    impl ScriptedModel {
        fn answering(value: serde_json::Value) -> Self {
            Self {
                response: Some(value),
                calls: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn invoke(&self, _request: &LlmRequest) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone().ok_or_else(|| AppError::Upstream {
                service: "language-model".into(),
                status: Some(503),
                message: "overloaded".into(),
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn candidate(code: &str, score: f64) -> MergedCandidate {
        let objective = CurriculumObjective {
            code: code.to_string(),
            description: format!("{} açıklaması", code),
            title: String::new(),
            grade: 9,
            subject: "BIO".to_string(),
            semester: 1,
        };
        MergedCandidate::new(objective, Some(score), None, score).unwrap()
    }

    fn candidates() -> Vec<MergedCandidate> {
        vec![
            candidate("BIO.9.1.1", 0.8),
            candidate("BIO.9.1.2", 0.6),
            candidate("BIO.9.1.3", 0.4),
        ]
    }

    fn reranker(model: Arc<ScriptedModel>, config: RerankConfig) -> RelevanceReranker {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let resilience =
            registry.resilience(deps::LANGUAGE_MODEL, RetryPolicy::no_retry(), Duration::from_secs(5));
        RelevanceReranker::with_resilience(model, resilience, config)
    }

    #[tokio::test]
    async fn test_blends_model_scores() {
        let model = Arc::new(ScriptedModel::answering(json!({
            "scores": [
                {"code": "BIO.9.1.1", "score": 0.1, "reason": "unrelated"},
                {"code": "BIO.9.1.2", "score": 0.95, "reason": "exact"},
                {"code": "BIO.9.9.9", "score": 1.0, "reason": "not a candidate"}
            ]
        })));
        let reranker = reranker(model.clone(), RerankConfig::default());

        let results = reranker.rerank("Mitoz evreleri", candidates(), 3).await;
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        let codes: Vec<&str> = results.iter().map(|r| r.code()).collect();
        // BIO.9.1.2: 0.5*0.75 + 0.5*0.95 = 0.85
        // BIO.9.1.1: 0.5*1.0  + 0.5*0.1  = 0.55
        // BIO.9.1.3: unscored, 0.5
        assert_eq!(codes, vec!["BIO.9.1.2", "BIO.9.1.1", "BIO.9.1.3"]);
        assert!((results[0].blended_score - 0.85).abs() < 1e-9);
        assert_eq!(results[0].reasoning.as_deref(), Some("exact"));

        let unscored = &results[2];
        assert!((unscored.llm_relevance_score - 0.5).abs() < 1e-9);
        assert!(unscored.reasoning.is_none());
    }

    #[tokio::test]
    async fn test_clamps_model_scores() {
        let model = Arc::new(ScriptedModel::answering(json!({
            "scores": [
                {"code": "BIO.9.1.1", "score": 1.7, "reason": ""},
                {"code": "BIO.9.1.2", "score": -0.3, "reason": ""}
            ]
        })));
        let results = reranker(model, RerankConfig::default())
            .rerank("soru", candidates(), 3)
            .await;

        let first = results.iter().find(|r| r.code() == "BIO.9.1.1").unwrap();
        let second = results.iter().find(|r| r.code() == "BIO.9.1.2").unwrap();
        assert_eq!(first.llm_relevance_score, 1.0);
        assert_eq!(second.llm_relevance_score, 0.0);
    }

    #[tokio::test]
    async fn test_failure_passes_input_through() {
        let model = Arc::new(ScriptedModel::failing());
        let results = reranker(model, RerankConfig::default())
            .rerank("soru", candidates(), 2)
            .await;

        let codes: Vec<&str> = results.iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec!["BIO.9.1.1", "BIO.9.1.2"]);
        assert_eq!(results[0].llm_relevance_score, 1.0);
        assert!((results[1].blended_score - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_malformed_output_passes_input_through() {
        let model = Arc::new(ScriptedModel::answering(json!({"ranking": "BIO.9.1.2"})));
        let results = reranker(model, RerankConfig::default())
            .rerank("soru", candidates(), 3)
            .await;
        assert_eq!(results[0].code(), "BIO.9.1.1");
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_single_candidate_skips_model() {
        let model = Arc::new(ScriptedModel::answering(json!({"scores": []})));
        let reranker = reranker(model.clone(), RerankConfig::default());

        let results = reranker.rerank("soru", vec![candidate("BIO.9.1.1", 0.4)], 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_skips_model() {
        let model = Arc::new(ScriptedModel::answering(json!({"scores": []})));
        let config = RerankConfig {
            enabled: false,
            ..RerankConfig::default()
        };
        let results = reranker(model.clone(), config).rerank("soru", candidates(), 3).await;
        assert_eq!(results.len(), 3);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_only_head_is_scored() {
        let model = Arc::new(ScriptedModel::answering(json!({
            "scores": [
                {"code": "BIO.9.1.1", "score": 0.2, "reason": ""},
                {"code": "BIO.9.1.2", "score": 0.9, "reason": ""},
                {"code": "BIO.9.1.3", "score": 1.0, "reason": ""}
            ]
        })));
        let config = RerankConfig {
            max_candidates: 2,
            ..RerankConfig::default()
        };
        let results = reranker(model, config).rerank("soru", candidates(), 3).await;

        let codes: Vec<&str> = results.iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec!["BIO.9.1.2", "BIO.9.1.1", "BIO.9.1.3"]);
        assert!(results[2].reasoning.is_none());
    }
}
