//! VPA analysis
//!
//! Rolling percentile ranks -> anomaly classification -> trade signal,
//! one [`ClassifiedBar`] per input bar. Shared by the backtest and the
//! live scanner.

pub mod classifier;
pub mod rolling;
pub mod signal;

pub use classifier::{AnomalyClassifier, AnomalyLabel};
pub use rolling::{percentile_rank, BarPercentiles, RollingStats, RollingWindow};
pub use signal::Signal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bar::{BarSeries, Direction};
use crate::config::ClassifierConfig;
use crate::error::Result;

/// A bar after analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedBar {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub volume: f64,
    pub direction: Direction,
    /// `None` while the window warms up or when the bar was rejected
    pub percentiles: Option<BarPercentiles>,
    pub label: AnomalyLabel,
    pub signal: Signal,
}

/// Rolling statistics plus classifier, built from validated config
#[derive(Debug, Clone, Copy)]
pub struct VpaPipeline {
    rolling: RollingStats,
    classifier: AnomalyClassifier,
}

impl VpaPipeline {
    pub fn new(window: usize, classifier: ClassifierConfig) -> Result<Self> {
        Ok(Self {
            rolling: RollingStats::new(window)?,
            classifier: AnomalyClassifier::new(classifier)?,
        })
    }

    pub fn window(&self) -> usize {
        self.rolling.window()
    }

    pub fn analyze(&self, series: &BarSeries) -> Vec<ClassifiedBar> {
        let bars = series.bars();
        let percentiles = self.rolling.compute(bars);

        bars.iter()
            .zip(percentiles)
            .enumerate()
            .map(|(index, (bar, percentiles))| {
                let direction = bar.direction();
                let label = self.classifier.classify_bar(direction, percentiles);
                ClassifiedBar {
                    index,
                    timestamp: bar.timestamp,
                    close: bar.close,
                    volume: bar.volume,
                    direction,
                    percentiles,
                    label,
                    signal: Signal::from_label(label),
                }
            })
            .collect()
    }
}

/// Bars detected per anomaly label (labels with zero hits are omitted)
pub fn anomaly_counts(classified: &[ClassifiedBar]) -> BTreeMap<AnomalyLabel, usize> {
    let mut counts = BTreeMap::new();
    for bar in classified.iter().filter(|b| b.label.is_anomaly()) {
        *counts.entry(bar.label).or_insert(0) += 1;
    }
    counts
}
