//! Kazanim Context
//!
//! Everything after retrieval:
//! - Prerequisite gap analysis over the curriculum graph
//! - Token-budgeted answer synthesis with a fallback analysis
//! - The end-to-end question analyzer

pub mod analyzer;
pub mod gaps;
pub mod synthesizer;

pub use analyzer::{AnalysisOutcome, AnalysisRequest, QuestionAnalyzer};
pub use gaps::PrerequisiteGapFinder;
pub use synthesizer::{QuestionAnalysis, ResponseSynthesizer, SynthesisInput};
