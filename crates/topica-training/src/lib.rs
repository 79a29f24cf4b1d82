//! Topica Training
//!
//! Variational EM training for LDA topic models on top of an external compute engine:
//! - Driving training and inference iterations (`TrainingOrchestrator`)
//! - Re-estimating the Dirichlet prior between iterations (`AlphaEstimator`)
//! - Consolidating partitioned job output (`OutputMerger`)
//! - Checkpoint naming, run manifests and snapshot discovery

pub mod alpha;
pub mod artifacts;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod job;
pub mod layout;
pub mod merger;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod special;

pub use alpha::{AlphaVector, SufficientStatistics};
pub use artifacts::{CheckpointArtifact, RunManifest};
pub use config::{ConvergenceSettings, EstimatorKind, NewtonSettings, RunConfiguration, RunMode};
pub use engine::ComputeEngine;
pub use error::{TrainingError, TrainingResult};
pub use estimator::{AlphaEstimator, AlphaUpdate, NumericDomainError, StopReason};
pub use job::{IdentityJobRequest, IterationRecord, JobCounters, JobRequest};
pub use layout::{CheckpointKind, CheckpointLayout, JobOutputs, WorkingDir};
pub use merger::{MergeRequest, OutputMerger, RecordFormat};
pub use orchestrator::{TerminalState, TrainingOrchestrator, TrainingReport};
pub use progress::{ProgressEvent, ProgressSink, RecordingProgressSink, TracingProgressSink};
pub use registry::{discover_snapshots, latest_resumable, SnapshotEntry};
