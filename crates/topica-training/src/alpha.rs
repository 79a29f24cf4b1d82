//! Alpha checkpoints and sufficient statistics.
//!
//! Both are stored as JSON Lines of `{"topic": k, "value": v}` with 1-based
//! topic indices. Order of lines is not significant.

use crate::error::{TrainingError, TrainingResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TopicValue {
    topic: u32,
    value: f64,
}

/// Dirichlet concentration per topic. Every component is strictly positive.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaVector(pub(crate) Vec<f64>);

impl AlphaVector {
    pub fn new(values: Vec<f64>) -> TrainingResult<Self> {
        if values.is_empty() {
            return Err(TrainingError::Configuration("alpha vector must not be empty".to_string()));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite() || *v <= 0.0) {
            return Err(TrainingError::Configuration(format!(
                "alpha[{}] must be positive and finite, got {}",
                i + 1,
                values[i]
            )));
        }
        Ok(Self(values))
    }

    /// Independent draws in (0, 1), one per topic.
    #[must_use]
    pub fn random<R: Rng + ?Sized>(topics: usize, rng: &mut R) -> Self {
        let values = (0..topics)
            .map(|_| loop {
                let v: f64 = rng.r#gen();
                if v > 0.0 {
                    break v;
                }
            })
            .collect();
        Self(values)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        write_topic_values(path, &self.0)
    }

    pub fn read(path: &Path, topics: usize) -> TrainingResult<Self> {
        let values = read_topic_values(path, topics)?;
        if let Some(i) = values.iter().position(|v| *v <= 0.0) {
            return Err(TrainingError::invalid_checkpoint(
                path,
                format!("alpha for topic {} is not positive: {}", i + 1, values[i]),
            ));
        }
        Ok(Self(values))
    }
}

/// Per-topic expected log-proportions summed over the corpus, one value per topic.
#[derive(Debug, Clone, PartialEq)]
pub struct SufficientStatistics(Vec<f64>);

impl SufficientStatistics {
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        write_topic_values(path, &self.0)
    }

    pub fn read(path: &Path, topics: usize) -> TrainingResult<Self> {
        read_topic_values(path, topics).map(Self)
    }
}

fn write_topic_values(path: &Path, values: &[f64]) -> TrainingResult<()> {
    let mut out = BufWriter::new(std::fs::File::create(path)?);
    for (i, value) in values.iter().enumerate() {
        let topic = u32::try_from(i + 1).map_err(|e| anyhow::anyhow!(e))?;
        serde_json::to_writer(&mut out, &TopicValue { topic, value: *value })?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn read_topic_values(path: &Path, topics: usize) -> TrainingResult<Vec<f64>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut values: Vec<Option<f64>> = vec![None; topics];

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: TopicValue = serde_json::from_str(line).map_err(|e| {
            TrainingError::invalid_checkpoint(path, format!("line {}: {}", idx + 1, e))
        })?;
        let topic = entry.topic as usize;
        if topic == 0 || topic > topics {
            return Err(TrainingError::invalid_checkpoint(
                path,
                format!("topic index {} outside (0, {}]", entry.topic, topics),
            ));
        }
        if !entry.value.is_finite() {
            return Err(TrainingError::invalid_checkpoint(
                path,
                format!("value for topic {} is not finite", entry.topic),
            ));
        }
        if values[topic - 1].replace(entry.value).is_some() {
            return Err(TrainingError::invalid_checkpoint(path, format!("duplicate topic {}", entry.topic)));
        }
    }

    let found = values.iter().filter(|v| v.is_some()).count();
    if found != topics {
        return Err(TrainingError::invalid_checkpoint(
            path,
            format!("expected {topics} topics, found {found}"),
        ));
    }
    Ok(values.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::TempDir;

    #[test]
    fn test_random_alpha_is_positive_and_below_one() {
        let mut rng = StdRng::seed_from_u64(7);
        let alpha = AlphaVector::random(50, &mut rng);
        assert_eq!(alpha.len(), 50);
        assert!(alpha.as_slice().iter().all(|v| *v > 0.0 && *v < 1.0));
    }

    #[test]
    fn test_read_accepts_any_line_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("alpha-0");
        std::fs::write(&path, "{\"topic\":2,\"value\":0.25}\n{\"topic\":1,\"value\":0.75}\n").unwrap();

        let alpha = AlphaVector::read(&path, 2).unwrap();
        assert_eq!(alpha.as_slice(), &[0.75, 0.25]);
    }

    #[test]
    fn test_written_file_has_one_line_per_topic() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("alpha-1");
        AlphaVector::new(vec![0.1, 0.2, 0.3]).unwrap().write(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.starts_with("{\"topic\":1,"));
    }

    #[test]
    fn test_read_rejects_wrong_topic_count() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("alpha-0");
        std::fs::write(&path, "{\"topic\":1,\"value\":0.5}\n").unwrap();
        assert!(matches!(
            AlphaVector::read(&path, 2),
            Err(TrainingError::InvalidCheckpoint { .. })
        ));
    }

    #[test]
    fn test_read_rejects_out_of_range_and_duplicate_topics() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("alpha-0");

        std::fs::write(&path, "{\"topic\":0,\"value\":0.5}\n{\"topic\":1,\"value\":0.5}\n").unwrap();
        assert!(AlphaVector::read(&path, 2).is_err());

        std::fs::write(&path, "{\"topic\":1,\"value\":0.5}\n{\"topic\":1,\"value\":0.5}\n").unwrap();
        assert!(AlphaVector::read(&path, 2).is_err());
    }

    #[test]
    fn test_statistics_may_be_negative_but_alpha_may_not() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("part-00000");
        SufficientStatistics::new(vec![10.0, -5.0]).write(&path).unwrap();

        let stats = SufficientStatistics::read(&path, 2).unwrap();
        assert_eq!(stats.as_slice(), &[10.0, -5.0]);
        assert!(AlphaVector::read(&path, 2).is_err());
        assert!(AlphaVector::new(vec![1.0, 0.0]).is_err());
    }
}
