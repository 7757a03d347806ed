//! Session sink boundary.
//!
//! The durable transcript/checkpoint store is an external collaborator; this
//! module defines only the interface the loop writes against. A run touches
//! the sink at exactly two points (before Init, after Done or Aborted) and
//! never reads it back mid-run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ExecutionMode;
use crate::runner::RunStatus;

/// Written before the first provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHeader {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub mode: ExecutionMode,
    pub max_turns: usize,
}

/// Written after the run reaches Done or Aborted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub turns_used: usize,
    pub message_count: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("session sink error: {0}")]
pub struct SinkError(pub String);

/// Append-only record of runs, from the loop's perspective.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn record_start(&self, header: &RunHeader) -> Result<(), SinkError>;
    async fn record_end(&self, summary: &RunSummary) -> Result<(), SinkError>;
}

/// What a sink received, for assertions.
#[derive(Debug, Clone)]
pub enum SinkRecord {
    Start(RunHeader),
    End(RunSummary),
}

/// In-memory sink test double.
pub struct MemorySink {
    records: std::sync::Mutex<Vec<SinkRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            records: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionSink for MemorySink {
    async fn record_start(&self, header: &RunHeader) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap()
            .push(SinkRecord::Start(header.clone()));
        Ok(())
    }

    async fn record_end(&self, summary: &RunSummary) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap()
            .push(SinkRecord::End(summary.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        let run_id = Uuid::new_v4();

        sink.record_start(&RunHeader {
            run_id,
            started_at: Utc::now(),
            provider: "mock".into(),
            model: "test".into(),
            mode: ExecutionMode::LocalOnly,
            max_turns: 10,
        })
        .await
        .unwrap();

        sink.record_end(&RunSummary {
            run_id,
            finished_at: Utc::now(),
            status: RunStatus::Completed,
            turns_used: 1,
            message_count: 3,
        })
        .await
        .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], SinkRecord::Start(_)));
        assert!(matches!(records[1], SinkRecord::End(_)));
    }
}
