//! Compute engine backed by an external executable.
//!
//! Each job launches `<command> <args..> <operation>` where operation is
//! `variational` or `identity`. The job request is written to the process's
//! stdin as one JSON document. A variational job prints its counters as JSON
//! on stdout; an identity job prints nothing. A non-zero exit status fails the
//! job, with stderr carried in the error.

use crate::config::EngineConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use topica_training::{ComputeEngine, IdentityJobRequest, JobCounters, JobRequest, TrainingError, TrainingResult};
use tracing::debug;

pub const VARIATIONAL_OPERATION: &str = "variational";
pub const IDENTITY_OPERATION: &str = "identity";

#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args, timeout: None }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build from the `[engine]` table. `None` when no command is configured.
    pub fn from_config(config: &EngineConfig) -> Option<Self> {
        let program = config.command.as_ref()?;
        let engine = Self::new(program.clone(), config.args.clone());
        Some(match config.timeout_secs {
            Some(secs) => engine.with_timeout(Duration::from_secs(secs)),
            None => engine,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn invoke<T: Serialize + Sync>(&self, operation: &str, job_name: &str, request: &T) -> TrainingResult<Vec<u8>> {
        let payload = serde_json::to_vec(request)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(operation)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, operation, job = job_name, "launching engine");
        let mut child = cmd
            .spawn()
            .map_err(|e| TrainingError::JobExecution(format!("failed to launch {}: {}", self.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TrainingError::JobExecution("engine stdin not available".to_string()))?;

        // stdout and stderr must drain while the request is written; an engine blocked on a full pipe never reads stdin
        let exchange = async {
            let (written, output) = tokio::join!(write_request(stdin, &payload), child.wait_with_output());
            // an engine may exit without reading its request; its exit status decides
            if let Err(e) = written {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(TrainingError::from(e));
                }
            }
            Ok(output?)
        };

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                TrainingError::JobExecution(format!("{job_name} timed out after {}s", limit.as_secs()))
            })??,
            None => exchange.await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrainingError::JobExecution(format!(
                "{job_name} failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Write the request and close stdin so the engine sees end of input.
async fn write_request(mut stdin: ChildStdin, payload: &[u8]) -> std::io::Result<()> {
    stdin.write_all(payload).await?;
    stdin.shutdown().await
}

#[async_trait]
impl ComputeEngine for CommandEngine {
    fn id(&self) -> &'static str {
        "command"
    }

    async fn run_variational(&self, request: &JobRequest) -> TrainingResult<JobCounters> {
        let stdout = self.invoke(VARIATIONAL_OPERATION, &request.name, request).await?;
        serde_json::from_slice(&stdout).map_err(|e| {
            TrainingError::JobExecution(format!("{} returned unreadable counters: {}", request.name, e))
        })
    }

    async fn run_identity(&self, request: &IdentityJobRequest) -> TrainingResult<()> {
        self.invoke(IDENTITY_OPERATION, &request.name, request).await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use topica_training::{RecordFormat, RunConfiguration};
    use topica_training::layout::CheckpointLayout;

    fn shell(script: &str) -> CommandEngine {
        CommandEngine::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    fn request(dir: &TempDir) -> JobRequest {
        let config = RunConfiguration::training(dir.path().join("in"), dir.path().join("out"), 3, 10);
        let work = CheckpointLayout::new(dir.path().join("out")).new_working_dir();
        JobRequest {
            name: JobRequest::job_name(&config, 0),
            iteration: 0,
            corpus: config.input.clone(),
            alpha: dir.path().join("out").join("alpha-0"),
            beta: None,
            informed_prior: None,
            topics: config.topics,
            terms: config.terms,
            mappers: config.mappers,
            reducers: config.reducers,
            local_iterations: config.local_iterations,
            training: true,
            random_start_gamma: false,
            direct_emit: false,
            truncate_beta: false,
            outputs: work.outputs(),
        }
    }

    #[tokio::test]
    async fn test_variational_parses_counters() {
        let temp = TempDir::new().unwrap();
        let engine = shell(
            r#"cat > /dev/null; echo '{"TOTAL_DOCS":10,"TOTAL_TERMS":300,"LOG_LIKELIHOOD":150000,"CONFIG_TIME":20,"TRAINING_TIME":90}'"#,
        );

        let counters = engine.run_variational(&request(&temp)).await.unwrap();
        assert_eq!(counters.total_docs, 10);
        assert_eq!(counters.log_likelihood, 150_000);
    }

    #[tokio::test]
    async fn test_request_is_written_to_stdin() {
        let temp = TempDir::new().unwrap();
        let captured = temp.path().join("request.json");
        let script = format!(
            r#"cat > {}; echo "$0" >> {}; echo '{{"TOTAL_DOCS":1,"TOTAL_TERMS":1,"LOG_LIKELIHOOD":0,"CONFIG_TIME":0,"TRAINING_TIME":0}}'"#,
            captured.display(),
            captured.with_extension("op").display()
        );

        let req = request(&temp);
        shell(&script).run_variational(&req).await.unwrap();

        let written: JobRequest = serde_json::from_slice(&std::fs::read(&captured).unwrap()).unwrap();
        assert_eq!(written, req);
        let operation = std::fs::read_to_string(captured.with_extension("op")).unwrap();
        assert_eq!(operation.trim(), VARIATIONAL_OPERATION);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_job_failure() {
        let temp = TempDir::new().unwrap();
        let engine = shell("cat > /dev/null; echo 'mapper crashed' >&2; exit 3");

        let err = engine.run_variational(&request(&temp)).await.unwrap_err();
        match err {
            TrainingError::JobExecution(message) => assert!(message.contains("mapper crashed")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_counters_are_job_failure() {
        let temp = TempDir::new().unwrap();
        let engine = shell("cat > /dev/null; echo 'done'");
        assert!(matches!(
            engine.run_variational(&request(&temp)).await,
            Err(TrainingError::JobExecution(_))
        ));
    }

    #[tokio::test]
    async fn test_large_request_with_chatty_stderr_completes() {
        let temp = TempDir::new().unwrap();
        let mut req = request(&temp);
        req.corpus = PathBuf::from("c".repeat(300_000));
        // fills the stderr pipe before reading any of the request
        let engine = shell(
            r#"head -c 200000 /dev/zero | tr '\0' 'x' >&2; cat > /dev/null; echo '{"TOTAL_DOCS":1,"TOTAL_TERMS":1,"LOG_LIKELIHOOD":0,"CONFIG_TIME":0,"TRAINING_TIME":0}'"#,
        )
        .with_timeout(Duration::from_secs(10));

        let counters = engine.run_variational(&req).await.unwrap();
        assert_eq!(counters.total_docs, 1);
    }

    #[tokio::test]
    async fn test_timeout_kills_job() {
        let temp = TempDir::new().unwrap();
        let engine = shell("sleep 5").with_timeout(Duration::from_millis(100));
        assert!(matches!(
            engine.run_variational(&request(&temp)).await,
            Err(TrainingError::JobExecution(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_job_failure() {
        let engine = CommandEngine::new("/nonexistent/topica-engine", Vec::new());
        let job = IdentityJobRequest {
            name: "OutputMerger".to_string(),
            inputs: vec![PathBuf::from("beta-r-00000")],
            output_dir: PathBuf::from("merge-tmp-dir"),
            parallelism: 1,
            format: RecordFormat::Text,
        };
        assert!(matches!(engine.run_identity(&job).await, Err(TrainingError::JobExecution(_))));
    }

    #[test]
    fn test_from_config() {
        assert!(CommandEngine::from_config(&EngineConfig::default()).is_none());

        let engine = CommandEngine::from_config(&EngineConfig {
            command: Some("lda-engine".to_string()),
            args: vec!["--local".to_string()],
            timeout_secs: Some(30),
        })
        .unwrap();
        assert_eq!(engine.program(), "lda-engine");
        assert_eq!(engine.timeout, Some(Duration::from_secs(30)));
    }
}
