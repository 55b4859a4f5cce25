//! Per-document pipeline state machine
//!
//! One `PipelineState` exists per document in flight. It records the status
//! and timing of each stage, an append-only error log and the retry counter.
//! It performs no I/O; the pipeline driver decides when to call it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Severity, Stage, StageStatus};

/// Status and timing of one stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    /// Wall-clock time of the latest run, if it has finished
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// One entry of the error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// State of one document moving through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub document_id: Uuid,
    pub batch_id: Option<Uuid>,
    stages: BTreeMap<Stage, StageRecord>,
    pub retry_count: u32,
    pub max_retries: u32,
    errors: Vec<StageError>,
}

impl PipelineState {
    pub fn new(document_id: Uuid, batch_id: Option<Uuid>, max_retries: u32) -> Self {
        Self {
            document_id,
            batch_id,
            stages: Stage::ALL.iter().map(|s| (*s, StageRecord::default())).collect(),
            retry_count: 0,
            max_retries,
            errors: Vec::new(),
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageRecord {
        // every stage is inserted in `new`
        &self.stages[&stage]
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.stage(stage).status
    }

    pub fn stages(&self) -> impl Iterator<Item = (Stage, &StageRecord)> {
        self.stages.iter().map(|(s, r)| (*s, r))
    }

    pub fn errors(&self) -> &[StageError] {
        &self.errors
    }

    /// `pending|failed -> running`
    pub fn start(&mut self, stage: Stage) -> Result<()> {
        self.transition(stage, StageStatus::Running)?;
        let record = self.record_mut(stage);
        record.started_at = Some(Utc::now());
        record.finished_at = None;
        Ok(())
    }

    /// `running -> completed`
    pub fn complete(&mut self, stage: Stage) -> Result<()> {
        self.transition(stage, StageStatus::Completed)?;
        self.record_mut(stage).finished_at = Some(Utc::now());
        Ok(())
    }

    /// `running -> failed`, appending `message` as an error
    pub fn fail(&mut self, stage: Stage, message: impl Into<String>) -> Result<()> {
        self.transition(stage, StageStatus::Failed)?;
        self.record_mut(stage).finished_at = Some(Utc::now());
        self.record_error(stage, message, Severity::Error);
        Ok(())
    }

    /// Append to the error log. Nothing is ever removed from it.
    pub fn record_error(&mut self, stage: Stage, message: impl Into<String>, severity: Severity) {
        self.errors.push(StageError {
            stage,
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        });
    }

    /// Weighted progress in `[0.0, 1.0]`.
    ///
    /// Completed stages count their full weight; running and failed stages
    /// count half of it.
    pub fn overall_progress(&self) -> f64 {
        let halves: u32 = self
            .stages
            .iter()
            .map(|(stage, record)| match record.status {
                StageStatus::Completed => stage.weight_percent() * 2,
                StageStatus::Running | StageStatus::Failed => stage.weight_percent(),
                StageStatus::Pending => 0,
            })
            .sum();
        halves as f64 / 200.0
    }

    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn record_retry(&mut self) {
        self.retry_count += 1;
    }

    /// First stage that has not completed, in execution order
    pub fn resume_stage(&self) -> Option<Stage> {
        Stage::ALL
            .iter()
            .copied()
            .find(|s| self.status(*s) != StageStatus::Completed)
    }

    /// Document-level status derived from the stages
    pub fn document_status(&self) -> StageStatus {
        let statuses: Vec<StageStatus> = self.stages.values().map(|r| r.status).collect();
        if statuses.contains(&StageStatus::Failed) {
            StageStatus::Failed
        } else if statuses.iter().all(|s| *s == StageStatus::Completed) {
            StageStatus::Completed
        } else if statuses.iter().any(|s| *s != StageStatus::Pending) {
            StageStatus::Running
        } else {
            StageStatus::Pending
        }
    }

    fn transition(&mut self, stage: Stage, next: StageStatus) -> Result<()> {
        let current = self.status(stage);
        if !current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                stage,
                from: current.as_str(),
                to: next.as_str(),
            });
        }
        self.record_mut(stage).status = next;
        Ok(())
    }

    fn record_mut(&mut self, stage: Stage) -> &mut StageRecord {
        self.stages.entry(stage).or_default()
    }
}
