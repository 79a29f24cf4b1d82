//! Consolidation of partitioned job output into single files.
//!
//! Two strategies share one contract: the local strategy streams every
//! matched partition through this process, the distributed strategy submits
//! an identity job with a single output partition to the compute engine.
//! The strategy is chosen by the sign of the requested parallelism.

use crate::engine::ComputeEngine;
use crate::error::{TrainingError, TrainingResult};
use crate::job::IdentityJobRequest;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const MERGE_DIR: &str = "merge-tmp-dir";
pub const SINGLE_PARTITION: &str = "part-00000";

/// Shape of the records inside a partition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordFormat {
    /// One record per line.
    Text,
    /// JSON Lines: a `{"key_type", "value_type"}` header, then `{"key", "value"}` records.
    KeyValue { key_type: String, value_type: String },
}

impl RecordFormat {
    #[must_use]
    pub fn key_value(key_type: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self::KeyValue { key_type: key_type.into(), value_type: value_type.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RecordHeader {
    key_type: String,
    value_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyValueRecord {
    key: serde_json::Value,
    value: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub source_glob: String,
    pub destination: PathBuf,
    pub format: RecordFormat,
    /// `<= 0` merges locally, `> 0` is the read parallelism of the distributed job.
    pub parallelism: i32,
    pub delete_source: bool,
}

/// Stateless merger; the engine is only needed for the distributed strategy.
#[derive(Clone, Default)]
pub struct OutputMerger {
    engine: Option<Arc<dyn ComputeEngine>>,
}

impl OutputMerger {
    #[must_use]
    pub fn local() -> Self {
        Self { engine: None }
    }

    #[must_use]
    pub fn with_engine(engine: Arc<dyn ComputeEngine>) -> Self {
        Self { engine: Some(engine) }
    }

    /// Merge every partition matched by `request.source_glob` into `request.destination`.
    pub async fn merge(&self, request: &MergeRequest) -> TrainingResult<PathBuf> {
        if request.destination.exists() {
            return Err(TrainingError::MergeCollision(request.destination.clone()));
        }

        let sources = matched_files(&request.source_glob)?;
        if sources.is_empty() {
            return Err(TrainingError::Precondition(format!(
                "no partitions match {}",
                request.source_glob
            )));
        }
        if request.parallelism <= 0 {
            merge_local(&sources, request)?;
        } else {
            self.merge_distributed(&sources, request).await?;
        }

        if request.delete_source {
            for source in &sources {
                std::fs::remove_file(source)?;
            }
        }
        info!(
            sources = sources.len(),
            destination = %request.destination.display(),
            "merged {}",
            request.source_glob
        );
        Ok(request.destination.clone())
    }

    async fn merge_distributed(&self, sources: &[PathBuf], request: &MergeRequest) -> TrainingResult<()> {
        let engine = self.engine.as_ref().ok_or_else(|| {
            TrainingError::Configuration("distributed merge requires a compute engine".to_string())
        })?;

        // beside the partitions; the glob itself may carry escapes or wildcards in its directory part
        let merge_dir = sources
            .first()
            .and_then(|source| source.parent())
            .unwrap_or_else(|| Path::new("."))
            .join(MERGE_DIR);
        if merge_dir.exists() {
            return Err(TrainingError::MergeCollision(merge_dir));
        }
        create_parent_dir(&request.destination)?;

        let job = IdentityJobRequest {
            name: "OutputMerger".to_string(),
            inputs: sources.to_vec(),
            output_dir: merge_dir.clone(),
            parallelism: request.parallelism.unsigned_abs(),
            format: request.format.clone(),
        };

        let started = Instant::now();
        let result = async {
            engine.run_identity(&job).await?;
            debug!(elapsed_secs = started.elapsed().as_secs_f64(), "merge job finished");

            let partition = merge_dir.join(SINGLE_PARTITION);
            if !partition.is_file() {
                return Err(TrainingError::JobExecution(format!(
                    "merge job produced no {}",
                    partition.display()
                )));
            }
            std::fs::rename(&partition, &request.destination)?;
            Ok(())
        }
        .await;

        remove_dir_if_exists(&merge_dir)?;
        result
    }
}

fn merge_local(sources: &[PathBuf], request: &MergeRequest) -> TrainingResult<()> {
    create_parent_dir(&request.destination)?;
    let result = write_merged(sources, request);
    if result.is_err() {
        // never leave a half-written destination behind
        let _ = std::fs::remove_file(&request.destination);
    }
    result
}

fn create_parent_dir(path: &Path) -> TrainingResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(std::fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

fn write_merged(sources: &[PathBuf], request: &MergeRequest) -> TrainingResult<()> {
    let mut out = BufWriter::new(std::fs::File::create_new(&request.destination)?);

    if let RecordFormat::KeyValue { key_type, value_type } = &request.format {
        let header = RecordHeader { key_type: key_type.clone(), value_type: value_type.clone() };
        serde_json::to_writer(&mut out, &header)?;
        out.write_all(b"\n")?;
    }

    for source in sources {
        let mut lines = BufReader::new(std::fs::File::open(source)?).lines();

        if let RecordFormat::KeyValue { key_type, value_type } = &request.format {
            let header = match lines.next() {
                Some(line) => serde_json::from_str::<RecordHeader>(&line?).map_err(|e| {
                    TrainingError::invalid_checkpoint(source, format!("bad record header: {e}"))
                })?,
                None => {
                    return Err(TrainingError::invalid_checkpoint(source, "missing record header"));
                }
            };
            if &header.key_type != key_type || &header.value_type != value_type {
                return Err(TrainingError::invalid_checkpoint(
                    source,
                    format!(
                        "records are {}/{}, expected {}/{}",
                        header.key_type, header.value_type, key_type, value_type
                    ),
                ));
            }
        }

        for (idx, line) in lines.enumerate() {
            let line = line?;
            if matches!(request.format, RecordFormat::KeyValue { .. }) {
                if line.trim().is_empty() {
                    continue;
                }
                serde_json::from_str::<KeyValueRecord>(&line).map_err(|e| {
                    TrainingError::invalid_checkpoint(source, format!("record {}: {e}", idx + 1))
                })?;
            }
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
    }

    out.flush()?;
    Ok(())
}

/// Files matched by `pattern`, in filename-sorted order.
pub fn matched_files(pattern: &str) -> TrainingResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = glob::glob(pattern)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Move matched partitions, unchanged, into `destination_dir`. Returns how many were moved.
pub fn relocate_partitions(pattern: &str, destination_dir: &Path) -> TrainingResult<usize> {
    std::fs::create_dir_all(destination_dir)?;
    let files = matched_files(pattern)?;
    for file in &files {
        let Some(name) = file.file_name() else { continue };
        std::fs::rename(file, destination_dir.join(name))?;
    }
    Ok(files.len())
}

/// Record format of a partition file, judged by its first line.
pub fn inspect_record_format(path: &Path) -> TrainingResult<RecordFormat> {
    let mut first = String::new();
    BufReader::new(std::fs::File::open(path)?).read_line(&mut first)?;
    Ok(match serde_json::from_str::<RecordHeader>(first.trim()) {
        Ok(header) => RecordFormat::KeyValue { key_type: header.key_type, value_type: header.value_type },
        Err(_) => RecordFormat::Text,
    })
}

/// Write a key-value partition with its header.
pub fn write_key_value_partition<I>(path: &Path, key_type: &str, value_type: &str, records: I) -> TrainingResult<()>
where
    I: IntoIterator<Item = (serde_json::Value, serde_json::Value)>,
{
    let mut out = BufWriter::new(std::fs::File::create(path)?);
    let header = RecordHeader { key_type: key_type.to_string(), value_type: value_type.to_string() };
    serde_json::to_writer(&mut out, &header)?;
    out.write_all(b"\n")?;
    for (key, value) in records {
        serde_json::to_writer(&mut out, &KeyValueRecord { key, value })?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub(crate) fn remove_dir_if_exists(path: &Path) -> TrainingResult<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobCounters, JobRequest};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Identity engine that concatenates its inputs, or fails to produce output on request.
    #[derive(Default)]
    struct ConcatEngine {
        produce_output: bool,
        calls: Mutex<Vec<IdentityJobRequest>>,
    }

    #[async_trait]
    impl ComputeEngine for ConcatEngine {
        fn id(&self) -> &'static str {
            "concat"
        }

        async fn run_variational(&self, _request: &JobRequest) -> TrainingResult<JobCounters> {
            Err(TrainingError::JobExecution("not supported".to_string()))
        }

        async fn run_identity(&self, request: &IdentityJobRequest) -> TrainingResult<()> {
            self.calls.lock().unwrap().push(request.clone());
            std::fs::create_dir_all(&request.output_dir)?;
            if self.produce_output {
                let mut merged = String::new();
                for input in &request.inputs {
                    merged.push_str(&std::fs::read_to_string(input)?);
                }
                std::fs::write(request.output_dir.join(SINGLE_PARTITION), merged)?;
            }
            Ok(())
        }
    }

    fn text_request(dir: &Path, parallelism: i32, delete_source: bool) -> MergeRequest {
        MergeRequest {
            source_glob: dir.join("part-*").to_string_lossy().into_owned(),
            destination: dir.join("merged"),
            format: RecordFormat::Text,
            parallelism,
            delete_source,
        }
    }

    #[tokio::test]
    async fn test_local_text_merge_keeps_sorted_order() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("part-00002"), "e\n").unwrap();
        std::fs::write(temp.path().join("part-00000"), "a\nb\n").unwrap();
        // no trailing newline on the last record
        std::fs::write(temp.path().join("part-00001"), "c\nd").unwrap();

        let request = text_request(temp.path(), 0, false);
        let out = OutputMerger::local().merge(&request).await.unwrap();

        assert_eq!(std::fs::read_to_string(out).unwrap(), "a\nb\nc\nd\ne\n");
        assert!(temp.path().join("part-00000").exists());
    }

    #[tokio::test]
    async fn test_local_merge_deletes_sources_on_request() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("part-00000"), "a\n").unwrap();
        std::fs::write(temp.path().join("part-00001"), "b\n").unwrap();

        OutputMerger::local().merge(&text_request(temp.path(), -1, true)).await.unwrap();
        assert!(matched_files(&temp.path().join("part-*").to_string_lossy()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_key_value_merge_counts_records() {
        let temp = TempDir::new().unwrap();
        for (name, n) in [("beta-r-00000", 3), ("beta-r-00001", 0), ("beta-r-00002", 4)] {
            let records = (0..n).map(|i| (json!([1, i]), json!({ "7": 0.5 })));
            write_key_value_partition(&temp.path().join(name), "topic_term", "term_weights", records).unwrap();
        }

        let request = MergeRequest {
            source_glob: temp.path().join("beta-*").to_string_lossy().into_owned(),
            destination: temp.path().join("beta-1"),
            format: RecordFormat::key_value("topic_term", "term_weights"),
            parallelism: 0,
            delete_source: false,
        };
        let out = OutputMerger::local().merge(&request).await.unwrap();

        let contents = std::fs::read_to_string(&out).unwrap();
        assert_eq!(contents.lines().count(), 1 + 7);
        assert_eq!(inspect_record_format(&out).unwrap(), request.format);
    }

    #[tokio::test]
    async fn test_local_key_value_merge_rejects_mismatched_types() {
        let temp = TempDir::new().unwrap();
        write_key_value_partition(&temp.path().join("beta-r-00000"), "a", "b", Vec::new()).unwrap();

        let request = MergeRequest {
            source_glob: temp.path().join("beta-*").to_string_lossy().into_owned(),
            destination: temp.path().join("beta-1"),
            format: RecordFormat::key_value("topic_term", "term_weights"),
            parallelism: 0,
            delete_source: true,
        };
        let err = OutputMerger::local().merge(&request).await.unwrap_err();
        assert!(matches!(err, TrainingError::InvalidCheckpoint { .. }));
        assert!(!request.destination.exists());
        assert!(temp.path().join("beta-r-00000").exists());
    }

    #[tokio::test]
    async fn test_existing_destination_is_a_collision_under_both_strategies() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("part-00000"), "a\n").unwrap();
        std::fs::write(temp.path().join("merged"), "old\n").unwrap();

        let engine = Arc::new(ConcatEngine { produce_output: true, ..Default::default() });
        let merger = OutputMerger::with_engine(engine.clone());

        for parallelism in [0, 4] {
            let err = merger.merge(&text_request(temp.path(), parallelism, true)).await.unwrap_err();
            assert!(matches!(err, TrainingError::MergeCollision(_)));
        }
        assert_eq!(std::fs::read_to_string(temp.path().join("merged")).unwrap(), "old\n");
        assert!(temp.path().join("part-00000").exists());
        assert!(!temp.path().join(MERGE_DIR).exists());
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_dir_collision_leaves_destination_parent_uncreated() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("part-00000"), "a\n").unwrap();
        std::fs::create_dir_all(temp.path().join(MERGE_DIR)).unwrap();

        let engine = Arc::new(ConcatEngine { produce_output: true, ..Default::default() });
        let request = MergeRequest {
            destination: temp.path().join("nested").join("merged"),
            ..text_request(temp.path(), 2, true)
        };
        let err = OutputMerger::with_engine(engine.clone()).merge(&request).await.unwrap_err();

        assert!(matches!(err, TrainingError::MergeCollision(ref dir) if dir.ends_with(MERGE_DIR)));
        assert!(!temp.path().join("nested").exists());
        assert!(temp.path().join("part-00000").exists());
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_creates_missing_destination_parent() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("part-00000"), "a\n").unwrap();

        let merger = OutputMerger::with_engine(Arc::new(ConcatEngine { produce_output: true, ..Default::default() }));
        for (parallelism, dir) in [(0, "local"), (2, "distributed")] {
            let request = MergeRequest {
                destination: temp.path().join(dir).join("merged"),
                ..text_request(temp.path(), parallelism, false)
            };
            let out = merger.merge(&request).await.unwrap();
            assert_eq!(std::fs::read_to_string(out).unwrap(), "a\n");
        }
    }

    #[tokio::test]
    async fn test_distributed_merge_dir_sits_beside_partitions_in_bracketed_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("model[1]");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("part-00000"), "a\n").unwrap();

        let engine = Arc::new(ConcatEngine { produce_output: true, ..Default::default() });
        let request = MergeRequest {
            source_glob: format!("{}/part-*", glob::Pattern::escape(&dir.to_string_lossy())),
            destination: dir.join("merged"),
            format: RecordFormat::Text,
            parallelism: 2,
            delete_source: false,
        };
        OutputMerger::with_engine(engine.clone()).merge(&request).await.unwrap();

        assert_eq!(engine.calls.lock().unwrap()[0].output_dir, dir.join(MERGE_DIR));
        assert_eq!(std::fs::read_to_string(dir.join("merged")).unwrap(), "a\n");
    }

    #[tokio::test]
    async fn test_empty_glob_fails() {
        let temp = TempDir::new().unwrap();
        let err = OutputMerger::local().merge(&text_request(temp.path(), 0, false)).await.unwrap_err();
        assert!(matches!(err, TrainingError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_distributed_merge_renames_single_partition() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("part-00000"), "a\n").unwrap();
        std::fs::write(temp.path().join("part-00001"), "b\n").unwrap();

        let engine = Arc::new(ConcatEngine { produce_output: true, ..Default::default() });
        let merger = OutputMerger::with_engine(engine.clone());
        let out = merger.merge(&text_request(temp.path(), 3, true)).await.unwrap();

        assert_eq!(std::fs::read_to_string(out).unwrap(), "a\nb\n");
        assert!(!temp.path().join(MERGE_DIR).exists());
        assert!(!temp.path().join("part-00000").exists());

        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].parallelism, 3);
        assert_eq!(calls[0].inputs.len(), 2);
    }

    #[tokio::test]
    async fn test_distributed_merge_fails_without_output_partition() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("part-00000"), "a\n").unwrap();

        let merger = OutputMerger::with_engine(Arc::new(ConcatEngine::default()));
        let err = merger.merge(&text_request(temp.path(), 2, true)).await.unwrap_err();

        assert!(matches!(err, TrainingError::JobExecution(_)));
        assert!(!temp.path().join(MERGE_DIR).exists());
        assert!(temp.path().join("part-00000").exists());
    }

    #[tokio::test]
    async fn test_distributed_merge_without_engine_is_a_configuration_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("part-00000"), "a\n").unwrap();
        let err = OutputMerger::local().merge(&text_request(temp.path(), 2, false)).await.unwrap_err();
        assert!(matches!(err, TrainingError::Configuration(_)));
    }

    #[test]
    fn test_relocate_moves_files_verbatim() {
        let temp = TempDir::new().unwrap();
        let work = temp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("gamma-m-00000"), "doc 1").unwrap();
        std::fs::write(work.join("gamma-m-00001"), "doc 2").unwrap();
        std::fs::write(work.join("beta-r-00000"), "beta").unwrap();

        let dest = temp.path().join("gamma-1");
        let moved = relocate_partitions(&work.join("gamma-*").to_string_lossy(), &dest).unwrap();

        assert_eq!(moved, 2);
        assert_eq!(std::fs::read_to_string(dest.join("gamma-m-00001")).unwrap(), "doc 2");
        assert!(work.join("beta-r-00000").exists());
        assert!(!work.join("gamma-m-00000").exists());
    }

    #[test]
    fn test_inspect_plain_text() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("part-00000");
        std::fs::write(&path, "hello world\n").unwrap();
        assert_eq!(inspect_record_format(&path).unwrap(), RecordFormat::Text);
    }
}
