//! Pipeline stage identifiers, statuses and error severities

use serde::{Deserialize, Serialize};
use std::fmt;

/// One phase of document ingestion, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ResourceCheck,
    Parsing,
    Enrichment,
    Chunking,
    Embedding,
    GraphExtraction,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 6] = [
        Stage::ResourceCheck,
        Stage::Parsing,
        Stage::Enrichment,
        Stage::Chunking,
        Stage::Embedding,
        Stage::GraphExtraction,
    ];

    /// Share of overall progress, in percent. Sums to 100.
    pub fn weight_percent(&self) -> u32 {
        match self {
            Stage::ResourceCheck => 5,
            Stage::Parsing => 20,
            Stage::Enrichment => 15,
            Stage::Chunking => 15,
            Stage::Embedding => 25,
            Stage::GraphExtraction => 20,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ResourceCheck => "resource_check",
            Stage::Parsing => "parsing",
            Stage::Enrichment => "enrichment",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::GraphExtraction => "graph_extraction",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// `failed -> running` is the re-execution path after a retry; nothing
    /// ever returns to `pending` and `completed` is terminal.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (StageStatus::Pending, StageStatus::Running)
                | (StageStatus::Running, StageStatus::Completed)
                | (StageStatus::Running, StageStatus::Failed)
                | (StageStatus::Failed, StageStatus::Running)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a recorded pipeline error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_100() {
        let total: u32 = Stage::ALL.iter().map(|s| s.weight_percent()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_transitions() {
        use StageStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Running));

        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&Stage::GraphExtraction).unwrap(),
            "\"graph_extraction\""
        );
        assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), "\"warning\"");
    }
}
