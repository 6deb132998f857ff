//! Token counting and context-window budgeting
//!
//! Exact counts via `tiktoken-rs` (`cl100k_base`). Oversized prompt content
//! degrades by dropping low-scored items or truncating, never by failing.

mod budget;
mod counter;

pub use budget::{
    FitReport, Message, Prepared, TokenBudget, TokenBudgetManager, MESSAGE_OVERHEAD,
    REPLY_PRIMING,
};
pub use counter::{TokenCounter, TRUNCATION_MARKER};
