use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;

use crate::domain::error::TrainError;
use crate::domain::sample::QaSample;

/// All samples of one split, validated and dimension-checked.
pub struct MovieQaDataset {
    name:        String,
    samples:     Vec<QaSample>,
    text_dim:    usize,
    feature_dim: usize,
}

impl MovieQaDataset {
    /// Validate every sample and check that widths agree across the split.
    pub fn new(name: impl Into<String>, samples: Vec<QaSample>) -> Result<Self> {
        let name = name.into();
        let mut text_dim    = 0;
        let mut feature_dim = 0;

        for (i, s) in samples.iter().enumerate() {
            s.validate(&name, i)?;

            let mismatch = |what: &str, want: usize, got: usize| TrainError::InvalidSample {
                source_name: name.clone(),
                index:       i,
                reason:      format!("{what} width {got}, earlier samples have {want}"),
            };
            if text_dim == 0 {
                text_dim = s.text_dim();
            } else if s.text_dim() != text_dim {
                return Err(mismatch("text", text_dim, s.text_dim()).into());
            }
            if s.feature_dim() > 0 {
                if feature_dim == 0 {
                    feature_dim = s.feature_dim();
                } else if s.feature_dim() != feature_dim {
                    return Err(mismatch("feature", feature_dim, s.feature_dim()).into());
                }
            }
        }

        Ok(Self { name, samples, text_dim, feature_dim })
    }

    /// Parse `{dir}/{split}.jsonl`. Blank lines are skipped.
    pub fn from_jsonl(dir: &Path, split: &str) -> Result<Self> {
        let path = dir.join(format!("{split}.jsonl"));
        let file = File::open(&path)
            .with_context(|| format!("Cannot open split '{}'", path.display()))?;

        let mut samples = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Cannot read '{}'", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let sample: QaSample = serde_json::from_str(&line).with_context(|| {
                format!("{}:{}: not a valid sample", path.display(), line_no + 1)
            })?;
            samples.push(sample);
        }

        tracing::info!("Loaded {} samples from '{}'", samples.len(), path.display());
        Self::new(split, samples)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text_dim(&self) -> usize {
        self.text_dim
    }

    /// 0 when no sample carries visual features
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}

impl Dataset<QaSample> for MovieQaDataset {
    fn get(&self, index: usize) -> Option<QaSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::fixtures::sample;
    use std::io::Write;

    #[test]
    fn test_load_jsonl_split() {
        let tmp = tempfile::tempdir().unwrap();
        let mut f = File::create(tmp.path().join("train.jsonl")).unwrap();
        for label in [0, 3] {
            writeln!(f, "{}", serde_json::to_string(&sample(label, 2)).unwrap()).unwrap();
        }
        writeln!(f).unwrap();

        let ds = MovieQaDataset::from_jsonl(tmp.path(), "train").unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.text_dim(), 4);
        assert_eq!(ds.feature_dim(), 3);
        assert_eq!(ds.get(1).unwrap().label, 3);
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn test_missing_split_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(MovieQaDataset::from_jsonl(tmp.path(), "val").is_err());
    }

    #[test]
    fn test_inconsistent_widths_rejected() {
        let mut odd = sample(0, 1);
        odd.question.push(0.0);
        for a in &mut odd.answers {
            a.push(0.0);
        }
        for s in &mut odd.subtitles {
            s.push(0.0);
        }
        assert!(MovieQaDataset::new("train", vec![sample(0, 1), odd]).is_err());
    }
}
