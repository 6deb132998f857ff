//! Language model client
//!
//! A single structured-output call shape shared by the reranker and the
//! synthesizer: system + user prompt in, JSON object out. As with
//! embeddings, retries and breaker accounting live in the resilience
//! pipeline wrapped around [`LanguageModel::invoke`].

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use regex_lite::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const SERVICE: &str = "language-model";

/// One structured request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_prompt: String,

    /// Name reported to the provider alongside the schema
    pub schema_name: String,

    /// JSON schema the answer must follow
    pub schema: serde_json::Value,

    pub max_tokens: usize,
    pub temperature: f32,
}

/// Trait for structured language model calls
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the parsed JSON object the model produced
    async fn invoke(&self, request: &LlmRequest) -> Result<serde_json::Value>;

    fn model_name(&self) -> &str;
}

/// Invoke and deserialize into `T`; shape mismatches become `MalformedResponse`
pub async fn invoke_structured<T: DeserializeOwned>(
    model: &dyn LanguageModel,
    request: &LlmRequest,
) -> Result<T> {
    let value = model.invoke(request).await?;
    serde_json::from_value(value).map_err(|e| AppError::MalformedResponse {
        service: SERVICE.to_string(),
        message: format!("{} does not match the expected shape: {}", request.schema_name, e),
    })
}

/// OpenAI-compatible chat completions client
pub struct OpenAIChatModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    response_format: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "llm.api_key is required for the openai provider".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    async fn invoke(&self, request: &LlmRequest) -> Result<serde_json::Value> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.schema,
                },
            }),
        };

        let response = self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                service: SERVICE.to_string(),
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            AppError::MalformedResponse {
                service: SERVICE.to_string(),
                message: format!("Failed to parse LLM response: {}", e),
            }
        })?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::MalformedResponse {
                service: SERVICE.to_string(),
                message: "Empty response from LLM".to_string(),
            })?;

        parse_json_content(&content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Parse model output as JSON, tolerating a surrounding markdown code fence
pub fn parse_json_content(content: &str) -> Result<serde_json::Value> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").ok());

    let body = fence
        .as_ref()
        .and_then(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| content.trim());

    serde_json::from_str(body).map_err(|e| AppError::MalformedResponse {
        service: SERVICE.to_string(),
        message: format!("LLM output is not valid JSON: {}", e),
    })
}

/// Create a language model client based on configuration
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        other => Err(AppError::Configuration {
            message: format!("Unknown LLM provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CannedModel(serde_json::Value);

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn invoke(&self, _request: &LlmRequest) -> Result<serde_json::Value> {
            Ok(self.0.clone())
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn request() -> LlmRequest {
        LlmRequest {
            system_prompt: "system".into(),
            user_prompt: "user".into(),
            schema_name: "scores".into(),
            schema: json!({"type": "object"}),
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    #[derive(Debug, Deserialize)]
    struct Scores {
        scores: Vec<f64>,
    }

    #[test]
    fn test_parse_fenced_json() {
        let value = parse_json_content("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value, json!({"a": 1}));

        let value = parse_json_content("  {\"a\": 2}  ").unwrap();
        assert_eq!(value, json!({"a": 2}));
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = parse_json_content("Sure! Here are the scores.").unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_invoke_structured() {
        let model = CannedModel(json!({"scores": [0.5, 0.9]}));
        let scores: Scores = invoke_structured(&model, &request()).await.unwrap();
        assert_eq!(scores.scores, vec![0.5, 0.9]);

        let model = CannedModel(json!({"scores": "high"}));
        let err = invoke_structured::<Scores>(&model, &request()).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse { .. }));
    }

    #[test]
    fn test_openai_requires_key() {
        let err = create_language_model(&LlmConfig::default()).err();
        assert!(matches!(err, Some(AppError::Configuration { .. })));
    }
}
