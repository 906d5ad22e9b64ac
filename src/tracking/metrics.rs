/// Per-epoch metric history for train and validation
use serde::{Deserialize, Serialize};

use crate::{MonolabError, Result};

/// History of one named metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSeries {
    pub name: String,
    /// (epoch, value) pairs from the training pass
    pub train: Vec<(usize, f64)>,
    /// (epoch, value) pairs from the validation pass
    pub val: Vec<(usize, f64)>,
}

impl MetricSeries {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            train: Vec::new(),
            val: Vec::new(),
        }
    }

    /// Epoch of the latest record, if any
    pub fn last_epoch(&self) -> Option<usize> {
        self.train.last().map(|(epoch, _)| *epoch)
    }
}

/// Ordered store of all metric series of a run
///
/// The set of names is fixed on construction. Epochs are strictly increasing
/// inside each series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricStore {
    series: Vec<MetricSeries>,
}

impl MetricStore {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Err(MonolabError::Config(
                "at least one metric name is required".to_string(),
            ));
        }

        let mut series: Vec<MetricSeries> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if series.iter().any(|s| s.name == name) {
                return Err(MonolabError::Config(format!(
                    "duplicate metric name: {}",
                    name
                )));
            }
            series.push(MetricSeries::new(name));
        }

        Ok(Self { series })
    }

    /// Append one train/validation pair for `epoch`
    pub fn record(&mut self, name: &str, epoch: usize, train: f64, val: f64) -> Result<()> {
        let series = self
            .series
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| MonolabError::Training(format!("unknown metric: {}", name)))?;

        if let Some(last) = series.last_epoch() {
            if epoch <= last {
                return Err(MonolabError::Training(format!(
                    "metric {} already has epoch {}, got {}",
                    name, last, epoch
                )));
            }
        }

        series.train.push((epoch, train));
        series.val.push((epoch, val));
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&MetricSeries> {
        self.series.iter().find(|s| s.name == name)
    }

    /// Series in registration order
    pub fn series(&self) -> &[MetricSeries] {
        &self.series
    }

    /// Total number of (epoch, train, val) records across all metrics
    pub fn total_records(&self) -> usize {
        self.series.iter().map(|s| s.train.len()).sum()
    }

    /// Length of the longest metric name, used to align log lines
    pub fn max_name_len(&self) -> usize {
        self.series.iter().map(|s| s.name.len()).max().unwrap_or(0)
    }
}
