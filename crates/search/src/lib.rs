//! Kazanim Search
//!
//! Retrieval half of the engine:
//! - Curriculum direct search and question-similarity discovery search
//! - Weighted score fusion with synergy bonus and primary/alternative tiers
//! - Hybrid merge coordinator with a shared fan-out deadline
//! - Language-model relevance reranking with silent degradation

pub mod rerank;
pub mod retrieval;

pub use rerank::RelevanceReranker;
pub use retrieval::{
    CandidateSource, DirectSearch, DiscoverySearch, HybridMergeCoordinator, MergeRequest,
    ScoreFusion,
};
