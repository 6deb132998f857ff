use super::counter::TokenCounter;
use crate::config::TokenConfig;
use crate::errors::Result;
use crate::metrics;
use crate::models::{ContextChunk, MergedCandidate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tokens added per chat message on top of role and content
pub const MESSAGE_OVERHEAD: usize = 4;

/// Tokens priming the assistant reply
pub const REPLY_PRIMING: usize = 3;

/// Context window of the target model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub max_context: usize,
    pub reserved_output: usize,

    /// Utilization ratio past which a warning is raised
    pub warn_threshold: f64,
}

impl TokenBudget {
    /// Tokens left for the prompt
    pub fn available(&self) -> usize {
        self.max_context.saturating_sub(self.reserved_output)
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            max_context: 128_000,
            reserved_output: 4_096,
            warn_threshold: 0.8,
        }
    }
}

impl From<&TokenConfig> for TokenBudget {
    fn from(config: &TokenConfig) -> Self {
        Self {
            max_context: config.max_context,
            reserved_output: config.reserved_output,
            warn_threshold: config.warn_threshold,
        }
    }
}

/// A role/content chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Outcome of [`TokenBudgetManager::check_fit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub fits: bool,
    pub total: usize,
    pub available: usize,
    pub utilization: f64,
    pub over_threshold: bool,
    pub warning: Option<String>,
}

/// Items kept by a preparer, highest score first
#[derive(Debug, Clone)]
pub struct Prepared<T> {
    pub items: Vec<T>,

    /// Rendered prompt text of each kept item
    pub rendered: Vec<String>,

    pub total_tokens: usize,
    pub dropped: usize,

    /// The single kept item was cut to fit
    pub truncated: bool,
}

impl<T> Prepared<T> {
    pub fn join(&self, separator: &str) -> String {
        self.rendered.join(separator)
    }
}

/// Counts and trims prompt content against the model window
#[derive(Debug, Clone)]
pub struct TokenBudgetManager {
    counter: TokenCounter,
    budget: TokenBudget,
}

impl TokenBudgetManager {
    pub fn new(budget: TokenBudget) -> Result<Self> {
        Ok(Self {
            counter: TokenCounter::new()?,
            budget,
        })
    }

    pub fn from_config(config: &TokenConfig) -> Result<Self> {
        Self::new(config.into())
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn count(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    pub fn count_messages(&self, messages: &[Message]) -> usize {
        let body: usize = messages
            .iter()
            .map(|m| MESSAGE_OVERHEAD + self.count(&m.role) + self.count(&m.content))
            .sum();
        body + REPLY_PRIMING
    }

    pub fn truncate_to_tokens(&self, text: &str, max_tokens: usize) -> String {
        self.counter.truncate(text, max_tokens)
    }

    /// Check whether `messages` plus `extra` tokens fit the prompt window
    pub fn check_fit(&self, messages: &[Message], extra: usize) -> FitReport {
        let total = self.count_messages(messages) + extra;
        let available = self.budget.available();
        let utilization = if available == 0 {
            f64::INFINITY
        } else {
            total as f64 / available as f64
        };
        let fits = total <= available;
        let over_threshold = utilization > self.budget.warn_threshold;

        let warning = if !fits {
            Some(format!("prompt needs {} tokens but only {} are available", total, available))
        } else if over_threshold {
            Some(format!(
                "prompt uses {:.0}% of the available context",
                utilization * 100.0
            ))
        } else {
            None
        };

        FitReport {
            fits,
            total,
            available,
            utilization,
            over_threshold,
            warning,
        }
    }

    /// Keep the highest-scored candidates whose rendered text fits `budget`
    pub fn prepare_candidates(&self, candidates: &[MergedCandidate], budget: usize) -> Prepared<MergedCandidate> {
        self.fit_to_budget("candidates", candidates, budget, |c| c.merged_score, render_candidate)
    }

    /// Keep the highest-scored chunks whose text fits `budget`
    pub fn prepare_chunks(&self, chunks: &[ContextChunk], budget: usize) -> Prepared<ContextChunk> {
        self.fit_to_budget("chunks", chunks, budget, |c| c.score, render_chunk)
    }

    fn fit_to_budget<T: Clone>(
        &self,
        preparer: &str,
        items: &[T],
        budget: usize,
        score: impl Fn(&T) -> f64,
        render: impl Fn(&T) -> String,
    ) -> Prepared<T> {
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|&a, &b| score(&items[b]).total_cmp(&score(&items[a])));

        let mut prepared = Prepared {
            items: Vec::new(),
            rendered: Vec::new(),
            total_tokens: 0,
            dropped: 0,
            truncated: false,
        };

        for &index in &order {
            let text = render(&items[index]);
            let tokens = self.count(&text);
            if prepared.total_tokens + tokens > budget {
                break;
            }
            prepared.total_tokens += tokens;
            prepared.items.push(items[index].clone());
            prepared.rendered.push(text);
        }

        if prepared.items.is_empty() && budget > 0 {
            if let Some(&best) = order.first() {
                let text = self.truncate_to_tokens(&render(&items[best]), budget);
                prepared.total_tokens = self.count(&text);
                prepared.items.push(items[best].clone());
                prepared.rendered.push(text);
                prepared.truncated = true;
            }
        }

        prepared.dropped = items.len() - prepared.items.len();
        if prepared.dropped > 0 {
            debug!(
                preparer,
                kept = prepared.items.len(),
                dropped = prepared.dropped,
                budget,
                "Dropped items to fit token budget"
            );
        }
        if prepared.truncated {
            warn!(preparer, budget, "Best item exceeds token budget; truncated");
        }
        metrics::record_budget_drop(preparer, prepared.dropped);

        prepared
    }
}

fn render_candidate(candidate: &MergedCandidate) -> String {
    let objective = &candidate.objective;
    format!(
        "- [{}] ({}. sınıf, {}) {}",
        objective.code, objective.grade, objective.subject, objective.description
    )
}

fn render_chunk(chunk: &ContextChunk) -> String {
    format!("[{}]\n{}", chunk.source, chunk.content)
}
