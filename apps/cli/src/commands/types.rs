//! Command type definitions shared between main.rs and the command modules.

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;
use topica_training::EstimatorKind;

/// Which snapshot to start from: an iteration index or the newest usable one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotArg {
    Latest,
    Index(u32),
}

impl FromStr for SnapshotArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        s.parse::<u32>()
            .map(Self::Index)
            .map_err(|_| format!("expected an iteration index or `latest`, got `{s}`"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EstimatorArg {
    /// One concentration per topic
    Vector,
    /// Single concentration shared by all topics
    Scalar,
}

impl From<EstimatorArg> for EstimatorKind {
    fn from(arg: EstimatorArg) -> Self {
        match arg {
            EstimatorArg::Vector => Self::Vector,
            EstimatorArg::Scalar => Self::Scalar,
        }
    }
}

/// Options shared by `train` and `infer`.
#[derive(Args, Debug, Clone)]
pub struct CorpusArgs {
    /// Corpus directory
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory for checkpoints
    #[arg(short, long)]
    pub output: PathBuf,

    /// Number of topics
    #[arg(short = 'k', long)]
    pub topics: u32,

    /// Vocabulary size
    #[arg(short = 'V', long)]
    pub terms: u32,

    /// Number of map tasks per job
    #[arg(long)]
    pub mappers: Option<u32>,

    /// Per-document variational iteration cap
    #[arg(long)]
    pub local_iterations: Option<u32>,

    /// Let mappers emit beta directly instead of through a combiner
    #[arg(long)]
    pub direct_emit: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TrainCommand {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Maximum number of EM iterations
    #[arg(long)]
    pub iterations: Option<u32>,

    /// Number of reduce tasks per job
    #[arg(long)]
    pub reducers: Option<u32>,

    /// Resume from a snapshot in the output directory (index or `latest`)
    #[arg(long)]
    pub resume: Option<SnapshotArg>,

    /// Re-draw document posteriors every iteration instead of carrying them over
    #[arg(long)]
    pub random_start_gamma: bool,

    /// Drop negligible beta entries before emitting
    #[arg(long)]
    pub truncate_beta: bool,

    /// Merge beta partitions on this machine instead of through the engine
    #[arg(long)]
    pub local_merge: bool,

    /// Informed prior over topic-term weights
    #[arg(long)]
    pub informed_prior: Option<PathBuf>,

    /// Alpha update strategy
    #[arg(long, value_enum)]
    pub estimator: Option<EstimatorArg>,

    /// Relative log-likelihood change at which training stops
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Seed for the initial alpha
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct InferCommand {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Output directory of the training run
    #[arg(short, long)]
    pub model: PathBuf,

    /// Model snapshot to score against (index or `latest`)
    #[arg(long, default_value = "latest")]
    pub snapshot: SnapshotArg,
}

#[derive(Args, Debug, Clone)]
pub struct MergeCommand {
    /// Glob matching the partitions to merge
    #[arg(short, long)]
    pub input: String,

    /// Merged output file (must not exist)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Parallelism of the merge job; zero or less merges locally
    #[arg(long, allow_negative_numbers = true)]
    pub mappers: Option<i32>,

    /// Treat partitions as plain text lines
    #[arg(long)]
    pub text: bool,

    /// Delete the partitions after merging
    #[arg(long)]
    pub delete_source: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SnapshotsCommand {
    /// Output directory of a training run
    pub dir: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
