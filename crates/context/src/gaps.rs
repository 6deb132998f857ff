//! Prerequisite gap finder
//!
//! Walks one step of the prerequisite relation from each matched objective
//! and reports the foundations the student has neither matched nor mastered.
//! Without a graph store (or when it fails for a code) a code heuristic
//! stands in: topic N > 1 of a unit depends on topic 1 of the same unit.

use futures::future::join_all;
use kazanim_common::backends::PrerequisiteGraphStore;
use kazanim_common::config::GapConfig;
use kazanim_common::models::{CurriculumObjective, Importance, ObjectiveCode, PrerequisiteGap};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A prerequisite edge resolved against the catalog
#[derive(Debug)]
struct Edge {
    code: String,
    objective: Option<CurriculumObjective>,
}

pub struct PrerequisiteGapFinder {
    store: Option<Arc<dyn PrerequisiteGraphStore>>,
    max_gaps: usize,
}

impl PrerequisiteGapFinder {
    pub fn new(store: Option<Arc<dyn PrerequisiteGraphStore>>, config: &GapConfig) -> Self {
        Self {
            store,
            max_gaps: config.max_gaps,
        }
    }

    /// Heuristic-only finder
    pub fn heuristic(config: &GapConfig) -> Self {
        Self::new(None, config)
    }

    /// Missing prerequisites of `matched`, most important first.
    ///
    /// Prerequisites above `grade_ceiling` are not due yet and are skipped.
    /// Importance compares the prerequisite's grade with the ceiling, or with
    /// the matched objective's own grade when no ceiling is given.
    #[instrument(skip(self, matched, mastered), fields(matched = matched.len()))]
    pub async fn find_gaps(
        &self,
        matched: &[String],
        grade_ceiling: Option<u8>,
        mastered: &HashSet<String>,
    ) -> Vec<PrerequisiteGap> {
        let matched_set: HashSet<&str> = matched.iter().map(String::as_str).collect();

        let edges = join_all(matched.iter().map(|code| self.prerequisites_of(code))).await;

        let mut gaps: Vec<PrerequisiteGap> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (source, edges) in matched.iter().zip(edges) {
            let target_grade = grade_ceiling.or_else(|| grade_of(source, None));

            for edge in edges {
                if matched_set.contains(edge.code.as_str()) || mastered.contains(&edge.code) {
                    continue;
                }

                if let Some(&i) = index.get(&edge.code) {
                    if !gaps[i].supports.contains(source) {
                        gaps[i].supports.push(source.clone());
                    }
                    continue;
                }

                let prereq_grade = grade_of(&edge.code, edge.objective.as_ref());
                if let (Some(ceiling), Some(grade)) = (grade_ceiling, prereq_grade) {
                    if grade > ceiling {
                        debug!(code = %edge.code, grade, ceiling, "Prerequisite not due yet");
                        continue;
                    }
                }

                let distance = match (target_grade, prereq_grade) {
                    (Some(target), Some(grade)) => target as i32 - grade as i32,
                    _ => 0,
                };
                let description = edge
                    .objective
                    .as_ref()
                    .map(|o| o.description.clone())
                    .unwrap_or_else(|| format!("Prerequisite objective {}", edge.code));

                index.insert(edge.code.clone(), gaps.len());
                gaps.push(PrerequisiteGap {
                    code: edge.code,
                    description,
                    importance: Importance::from_grade_distance(distance),
                    supports: vec![source.clone()],
                });
            }
        }

        // Stable, so first-seen order holds within a tier.
        gaps.sort_by_key(|g| g.importance);
        gaps.truncate(self.max_gaps);

        debug!(gaps = gaps.len(), "Gap analysis complete");
        gaps
    }

    async fn prerequisites_of(&self, code: &str) -> Vec<Edge> {
        let Some(store) = &self.store else {
            return heuristic_prerequisites(code)
                .into_iter()
                .map(|code| Edge { code, objective: None })
                .collect();
        };

        let codes = match store.get_prerequisites(code).await {
            Ok(codes) => codes,
            Err(e) => {
                warn!(code, error = %e, "Prerequisite lookup failed; using code heuristic");
                heuristic_prerequisites(code)
            }
        };

        let lookups = codes.iter().map(|c| store.get_objective(c));
        let objectives = join_all(lookups).await;

        codes
            .into_iter()
            .zip(objectives)
            .map(|(code, objective)| Edge {
                code,
                objective: objective.unwrap_or_else(|e| {
                    debug!(error = %e, "Catalog lookup failed");
                    None
                }),
            })
            .collect()
    }
}

/// Topic 1 of the same unit, for any later topic
fn heuristic_prerequisites(code: &str) -> Vec<String> {
    match ObjectiveCode::parse(code) {
        Ok(parsed) if parsed.topic > 1 => vec![parsed.unit_opening().to_string()],
        Ok(_) => Vec::new(),
        Err(_) => {
            debug!(code, "Unparseable objective code; no heuristic prerequisite");
            Vec::new()
        }
    }
}

fn grade_of(code: &str, objective: Option<&CurriculumObjective>) -> Option<u8> {
    objective
        .map(|o| o.grade)
        .or_else(|| ObjectiveCode::parse(code).ok().map(|c| c.grade))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kazanim_common::backends::InMemoryPrerequisiteGraph;
    use kazanim_common::errors::{AppError, Result};

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

    fn finder(graph: InMemoryPrerequisiteGraph) -> PrerequisiteGapFinder {
        PrerequisiteGapFinder::new(Some(Arc::new(graph)), &GapConfig::default())
    }

    fn codes(matched: &[&str]) -> Vec<String> {
        matched.iter().map(|c| c.to_string()).collect()
    }

    struct BrokenStore;

    #[async_trait]
    impl PrerequisiteGraphStore for BrokenStore {
        async fn get_prerequisites(&self, _code: &str) -> Result<Vec<String>> {
            Err(AppError::Upstream {
                service: "graph".into(),
                status: None,
                message: "connection refused".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_one_grade_back_is_important() {
        let mut graph = InMemoryPrerequisiteGraph::new();
        graph.add_edge("BIO.10.2.1", "BIO.9.1.1");
        graph.add_objective(objective("BIO.9.1.1", 9, "Hücrenin yapısını açıklar."));

        let gaps = finder(graph)
            .find_gaps(&codes(&["BIO.10.2.1"]), Some(10), &HashSet::new())
            .await;

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].code, "BIO.9.1.1");
        assert_eq!(gaps[0].importance, Importance::Important);
        assert_eq!(gaps[0].importance.as_str(), "important");
        assert_eq!(gaps[0].description, "Hücrenin yapısını açıklar.");
        assert_eq!(gaps[0].supports, vec!["BIO.10.2.1"]);
    }

    #[tokio::test]
    async fn test_excludes_matched_mastered_and_future() {
        let mut graph = InMemoryPrerequisiteGraph::new();
        graph.add_edge("BIO.10.2.1", "BIO.9.1.1");
        graph.add_edge("BIO.10.2.1", "BIO.10.1.1");
        graph.add_edge("BIO.10.2.1", "BIO.8.1.1");
        graph.add_edge("BIO.10.2.1", "BIO.11.1.1");

        let mastered: HashSet<String> = ["BIO.8.1.1".to_string()].into_iter().collect();
        let gaps = finder(graph)
            .find_gaps(&codes(&["BIO.10.2.1", "BIO.10.1.1"]), Some(10), &mastered)
            .await;

        let found: Vec<&str> = gaps.iter().map(|g| g.code.as_str()).collect();
        assert_eq!(found, vec!["BIO.9.1.1"]);
    }

    #[tokio::test]
    async fn test_dedupes_and_orders_by_importance() {
        let mut graph = InMemoryPrerequisiteGraph::new();
        graph.add_edge("BIO.11.2.1", "BIO.11.1.1");
        graph.add_edge("BIO.11.2.1", "BIO.9.1.1");
        graph.add_edge("BIO.11.3.1", "BIO.9.1.1");
        graph.add_edge("BIO.11.3.1", "BIO.10.4.1");

        let gaps = finder(graph)
            .find_gaps(&codes(&["BIO.11.2.1", "BIO.11.3.1"]), None, &HashSet::new())
            .await;

        let found: Vec<(&str, Importance)> = gaps.iter().map(|g| (g.code.as_str(), g.importance)).collect();
        assert_eq!(
            found,
            vec![
                ("BIO.9.1.1", Importance::Critical),
                ("BIO.10.4.1", Importance::Important),
                ("BIO.11.1.1", Importance::Helpful),
            ]
        );
        assert_eq!(gaps[0].supports, vec!["BIO.11.2.1", "BIO.11.3.1"]);
    }

    #[tokio::test]
    async fn test_caps_gap_count() {
        let mut graph = InMemoryPrerequisiteGraph::new();
        for topic in 1..=15 {
            graph.add_edge("BIO.10.2.1", format!("BIO.9.1.{}", topic));
        }

        let finder = PrerequisiteGapFinder::new(Some(Arc::new(graph)), &GapConfig { max_gaps: 4 });
        let gaps = finder.find_gaps(&codes(&["BIO.10.2.1"]), Some(10), &HashSet::new()).await;
        assert_eq!(gaps.len(), 4);
        assert_eq!(gaps[0].code, "BIO.9.1.1");
    }

    #[tokio::test]
    async fn test_heuristic_points_to_unit_opening() {
        let finder = PrerequisiteGapFinder::heuristic(&GapConfig::default());
        let gaps = finder
            .find_gaps(&codes(&["BIO.9.2.3", "BIO.9.3.1", "garbage"]), Some(9), &HashSet::new())
            .await;

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].code, "BIO.9.2.1");
        assert_eq!(gaps[0].importance, Importance::Helpful);
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_to_heuristic() {
        let finder = PrerequisiteGapFinder::new(Some(Arc::new(BrokenStore)), &GapConfig::default());
        let gaps = finder.find_gaps(&codes(&["MAT.10.3.4"]), None, &HashSet::new()).await;

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].code, "MAT.10.3.1");
        assert_eq!(gaps[0].supports, vec!["MAT.10.3.4"]);
    }
}
