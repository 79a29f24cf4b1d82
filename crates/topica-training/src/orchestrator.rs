//! The variational EM control loop.
//!
//! Every iteration submits one job to the [`ComputeEngine`], decodes its
//! counters and, when training, turns the job's partitions into the next
//! iteration's alpha, beta and gamma checkpoints. Iterations run strictly one
//! after another; a run can only be resumed at an iteration boundary.

use crate::alpha::{AlphaVector, SufficientStatistics};
use crate::artifacts::{make_artifact, RunManifest};
use crate::config::{RunConfiguration, RunMode};
use crate::engine::ComputeEngine;
use crate::error::{TrainingError, TrainingResult};
use crate::estimator::AlphaEstimator;
use crate::job::{IterationRecord, JobRequest};
use crate::layout::{CheckpointKind, CheckpointLayout, WorkingDir, BETA_KEY_TYPE, BETA_VALUE_TYPE};
use crate::merger::{relocate_partitions, remove_dir_if_exists, MergeRequest, OutputMerger, RecordFormat};
use crate::progress::{ProgressEvent, ProgressSink};
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Converged,
    MaxIterationsReached,
    InferenceDone,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub run_id: String,
    pub state: TerminalState,
    pub iterations: Vec<IterationRecord>,
    /// Iteration index of the newest alpha/beta checkpoint.
    pub checkpoint: u32,
    pub manifest: PathBuf,
}

/// Checkpoints the next job reads.
#[derive(Debug, Clone)]
struct Cursor {
    corpus: PathBuf,
    /// Gamma checkpoint the corpus currently points at, if any.
    gamma: Option<PathBuf>,
    alpha: PathBuf,
    beta: Option<PathBuf>,
    checkpoint: u32,
}

pub struct TrainingOrchestrator {
    config: RunConfiguration,
    engine: Arc<dyn ComputeEngine>,
    merger: OutputMerger,
    estimator: AlphaEstimator,
    layout: CheckpointLayout,
    informed_prior: Option<PathBuf>,
    seed: Option<u64>,
}

impl TrainingOrchestrator {
    pub fn new(config: RunConfiguration, engine: Arc<dyn ComputeEngine>) -> TrainingResult<Self> {
        let config = config.normalize();
        config.validate()?;

        let layout = CheckpointLayout::new(config.output.clone());
        let informed_prior = config.informed_prior.as_ref().map(|_| layout.informed_prior_path());
        Ok(Self {
            estimator: AlphaEstimator::new(config.estimator, config.newton),
            merger: OutputMerger::with_engine(engine.clone()),
            engine,
            layout,
            informed_prior,
            config,
            seed: None,
        })
    }

    /// Seed the random initial alpha.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub async fn run(&self, progress: &dyn ProgressSink) -> TrainingResult<TrainingReport> {
        let run_id = Uuid::new_v4().to_string();
        let first = self.config.mode.first_iteration();
        info!(
            %run_id,
            input = %self.config.input.display(),
            output = %self.config.output.display(),
            topics = self.config.topics,
            terms = self.config.terms,
            mappers = self.config.mappers,
            reducers = self.config.reducers,
            mode = ?self.config.mode,
            random_start_gamma = self.config.random_start_gamma,
            direct_emit = self.config.direct_emit,
            truncate_beta = self.config.truncate_beta,
            estimator = ?self.estimator.kind(),
            "starting run"
        );
        progress.on_event(ProgressEvent::RunStarted { run_id: run_id.clone(), first_iteration: first });

        let mut cursor = self.prepare()?;
        let mut records = Vec::new();
        let mut previous_log_likelihood: Option<f64> = None;
        let mut iteration = first;

        let state = loop {
            let record = self
                .run_iteration(iteration, &mut cursor, progress)
                .instrument(info_span!("iteration", index = iteration))
                .await?;
            records.push(record);
            progress.on_event(ProgressEvent::IterationFinished { record });

            let RunMode::Training { iterations, .. } = self.config.mode else {
                break TerminalState::InferenceDone;
            };

            let change = previous_log_likelihood.and_then(|previous| record.relative_change(previous));
            if change.is_some_and(|c| c <= self.config.convergence.tolerance) {
                info!(iterations = iteration + 1, "model converged");
                break TerminalState::Converged;
            }
            previous_log_likelihood = Some(record.log_likelihood);

            iteration += 1;
            if iteration >= iterations {
                break TerminalState::MaxIterationsReached;
            }
        };

        let manifest = self.write_manifest(&run_id, state, &records, &cursor)?;
        progress.on_event(ProgressEvent::RunFinished { run_id: run_id.clone(), state });

        Ok(TrainingReport { run_id, state, iterations: records, checkpoint: cursor.checkpoint, manifest })
    }

    /// Validate the starting checkpoints and create the initial alpha when needed.
    fn prepare(&self) -> TrainingResult<Cursor> {
        let output = &self.config.output;

        match &self.config.mode {
            RunMode::Training { resume_from: None, .. } => {
                remove_dir_if_exists(output)?;
                std::fs::create_dir_all(output)?;
                self.copy_informed_prior()?;

                let mut rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let alpha_path = self.layout.alpha_path(0);
                AlphaVector::random(self.config.topics as usize, &mut rng).write(&alpha_path)?;
                debug!(path = %alpha_path.display(), "initialized random alpha");

                Ok(Cursor { corpus: self.config.input.clone(), gamma: None, alpha: alpha_path, beta: None, checkpoint: 0 })
            }
            RunMode::Training { resume_from: Some(snapshot), .. } => {
                let snapshot = *snapshot;
                std::fs::create_dir_all(output)?;
                self.copy_informed_prior()?;

                let alpha = require_checkpoint(self.layout.alpha_path(snapshot), "alpha")?;
                let beta = if snapshot > 0 {
                    Some(require_checkpoint(self.layout.beta_path(snapshot), "beta")?)
                } else {
                    None
                };
                info!(snapshot, "resuming from checkpoint");

                // random-start runs never carry posteriors, so they restart from the raw corpus
                if self.config.random_start_gamma {
                    return Ok(Cursor { corpus: self.config.input.clone(), gamma: None, alpha, beta, checkpoint: snapshot });
                }
                let gamma = require_checkpoint(self.layout.gamma_dir(snapshot), "gamma")?;
                Ok(Cursor { corpus: gamma.clone(), gamma: Some(gamma), alpha, beta, checkpoint: snapshot })
            }
            RunMode::Inference { model_dir, snapshot } => {
                std::fs::create_dir_all(output)?;
                let model = CheckpointLayout::new(model_dir.clone());
                let beta = (*snapshot > 0).then(|| model.beta_path(*snapshot));

                Ok(Cursor {
                    corpus: self.config.input.clone(),
                    gamma: None,
                    alpha: model.alpha_path(*snapshot),
                    beta,
                    checkpoint: *snapshot,
                })
            }
        }
    }

    fn copy_informed_prior(&self) -> TrainingResult<()> {
        let (Some(source), Some(copy)) = (&self.config.informed_prior, &self.informed_prior) else {
            return Ok(());
        };
        if !source.is_file() {
            return Err(TrainingError::Precondition(format!(
                "informed prior must be an existing file: {}",
                source.display()
            )));
        }
        std::fs::copy(source, copy)?;
        Ok(())
    }

    fn check_preconditions(&self, iteration: u32, cursor: &Cursor) -> TrainingResult<()> {
        if !cursor.corpus.exists() {
            return Err(TrainingError::Precondition(format!("corpus {}", cursor.corpus.display())));
        }
        if !cursor.alpha.is_file() {
            return Err(TrainingError::Precondition(format!(
                "alpha for iteration {iteration}: {}",
                cursor.alpha.display()
            )));
        }
        if iteration > 0 {
            match &cursor.beta {
                Some(beta) if beta.exists() => {}
                Some(beta) => {
                    return Err(TrainingError::Precondition(format!(
                        "beta for iteration {iteration}: {}",
                        beta.display()
                    )));
                }
                None => {
                    return Err(TrainingError::Precondition(format!("beta for iteration {iteration}")));
                }
            }
        }
        if let Some(prior) = &self.informed_prior {
            if !prior.is_file() {
                return Err(TrainingError::Precondition(format!("informed prior {}", prior.display())));
            }
        }
        Ok(())
    }

    async fn run_iteration(
        &self,
        iteration: u32,
        cursor: &mut Cursor,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<IterationRecord> {
        self.check_preconditions(iteration, cursor)?;

        let work = self.layout.new_working_dir();
        let result = self.iterate_in(&work, iteration, cursor, progress).await;
        let cleanup = work.remove();

        let record = result?;
        cleanup?;
        Ok(record)
    }

    async fn iterate_in(
        &self,
        work: &WorkingDir,
        iteration: u32,
        cursor: &mut Cursor,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<IterationRecord> {
        std::fs::create_dir_all(work.path())?;

        let request = self.job_request(iteration, cursor, work);
        progress.on_event(ProgressEvent::IterationStarted { iteration, job_name: request.name.clone() });

        let started = Instant::now();
        let counters = self.engine.run_variational(&request).await?;
        info!(elapsed_secs = started.elapsed().as_secs_f64(), engine = self.engine.id(), "job finished");

        let record = IterationRecord::decode(
            iteration,
            &counters,
            self.config.topics,
            self.config.convergence.counter_scale,
        );
        if !request.training {
            return Ok(record);
        }

        self.update_alpha(iteration, record.document_count, cursor, work, progress)?;
        self.consolidate_beta(iteration, cursor, work).await?;
        if !self.config.random_start_gamma {
            self.relocate_gamma(iteration, cursor, work)?;
        }
        cursor.checkpoint = iteration + 1;
        Ok(record)
    }

    fn job_request(&self, iteration: u32, cursor: &Cursor, work: &WorkingDir) -> JobRequest {
        let c = &self.config;
        JobRequest {
            name: JobRequest::job_name(c, iteration),
            iteration,
            corpus: cursor.corpus.clone(),
            alpha: cursor.alpha.clone(),
            beta: if iteration > 0 { cursor.beta.clone() } else { None },
            informed_prior: self.informed_prior.clone(),
            topics: c.topics,
            terms: c.terms,
            mappers: c.mappers,
            reducers: c.reducers,
            local_iterations: c.local_iterations,
            training: c.mode.is_training(),
            random_start_gamma: c.random_start_gamma,
            direct_emit: c.direct_emit,
            truncate_beta: c.truncate_beta,
            outputs: work.outputs(),
        }
    }

    fn update_alpha(
        &self,
        iteration: u32,
        documents: u64,
        cursor: &mut Cursor,
        work: &WorkingDir,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<()> {
        let topics = self.config.topics as usize;
        let statistics_path = work.sufficient_statistics_path();
        if !statistics_path.is_file() {
            return Err(TrainingError::JobExecution(format!(
                "job produced no sufficient statistics at {}",
                statistics_path.display()
            )));
        }

        let current = AlphaVector::read(&cursor.alpha, topics)?;
        let statistics = SufficientStatistics::read(&statistics_path, topics)?;

        let next = match self.estimator.estimate(&current, documents, &statistics) {
            Ok(update) => {
                debug!(newton_iterations = update.iterations, stop = ?update.stop, "alpha updated");
                update.alpha
            }
            Err(e) => {
                progress.on_event(ProgressEvent::AlphaRetained { iteration, reason: e.to_string() });
                current
            }
        };

        let next_path = self.layout.alpha_path(iteration + 1);
        next.write(&next_path)?;
        std::fs::remove_file(&statistics_path)?;
        cursor.alpha = next_path;
        Ok(())
    }

    async fn consolidate_beta(&self, iteration: u32, cursor: &mut Cursor, work: &WorkingDir) -> TrainingResult<()> {
        let request = MergeRequest {
            source_glob: work.beta_glob(),
            destination: self.layout.beta_path(iteration + 1),
            format: RecordFormat::key_value(BETA_KEY_TYPE, BETA_VALUE_TYPE),
            parallelism: self.config.merge_parallelism(),
            delete_source: true,
        };
        cursor.beta = Some(self.merger.merge(&request).await?);
        Ok(())
    }

    fn relocate_gamma(&self, iteration: u32, cursor: &mut Cursor, work: &WorkingDir) -> TrainingResult<()> {
        let next = self.layout.gamma_dir(iteration + 1);
        let moved = relocate_partitions(&work.gamma_glob(), &next)?;
        if moved == 0 {
            return Err(TrainingError::JobExecution("job produced no posterior partitions".to_string()));
        }
        debug!(partitions = moved, path = %next.display(), "relocated posteriors");

        if let Some(previous) = cursor.gamma.replace(next.clone()) {
            remove_dir_if_exists(&previous)?;
        }
        cursor.corpus = next;
        Ok(())
    }

    fn write_manifest(
        &self,
        run_id: &str,
        state: TerminalState,
        records: &[IterationRecord],
        cursor: &Cursor,
    ) -> TrainingResult<PathBuf> {
        let mut artifacts = vec![make_artifact(CheckpointKind::Alpha, cursor.checkpoint, cursor.alpha.clone())?];
        if let Some(beta) = &cursor.beta {
            artifacts.push(make_artifact(CheckpointKind::Beta, cursor.checkpoint, beta.clone())?);
        }
        if let Some(gamma) = &cursor.gamma {
            artifacts.push(make_artifact(CheckpointKind::Gamma, cursor.checkpoint, gamma.clone())?);
        }

        let manifest = RunManifest {
            run_id: run_id.to_string(),
            created_at: Utc::now(),
            mode: self.config.mode.clone(),
            topics: self.config.topics,
            terms: self.config.terms,
            state,
            iterations: records.to_vec(),
            artifacts,
        };
        let path = self.layout.manifest_path();
        manifest.write(&path)?;
        Ok(path)
    }
}

fn require_checkpoint(path: PathBuf, what: &str) -> TrainingResult<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(TrainingError::Precondition(format!("{what} checkpoint {}", path.display())))
    }
}
