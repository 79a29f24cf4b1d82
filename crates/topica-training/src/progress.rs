use crate::job::IterationRecord;
use crate::orchestrator::TerminalState;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted { run_id: String, first_iteration: u32 },
    IterationStarted { iteration: u32, job_name: String },
    IterationFinished { record: IterationRecord },
    AlphaRetained { iteration: u32, reason: String },
    RunFinished { run_id: String, state: TerminalState },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress to the active `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { run_id, first_iteration } => {
                info!(%run_id, first_iteration, "run started");
            }
            ProgressEvent::IterationStarted { iteration, job_name } => {
                info!(iteration, %job_name, "submitting job");
            }
            ProgressEvent::IterationFinished { record } => info!(
                iteration = record.index,
                log_likelihood = record.log_likelihood,
                documents = record.document_count,
                terms = record.term_count,
                avg_config_ms = record.avg_config_time_ms,
                avg_train_ms = record.avg_train_time_ms,
                "iteration finished"
            ),
            ProgressEvent::AlphaRetained { iteration, reason } => {
                warn!(iteration, %reason, "alpha update skipped");
            }
            ProgressEvent::RunFinished { run_id, state } => info!(%run_id, ?state, "run finished"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<IterationRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::IterationFinished { record } => Some(record),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
