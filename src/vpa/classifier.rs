//! Anomaly Classifier
//!
//! Maps a bar's direction plus its spread and volume percentile ranks to a
//! VPA anomaly label:
//!
//! | direction | spread | volume | label       |
//! |-----------|--------|--------|-------------|
//! | up        | high   | low    | FakeUp      |
//! | down      | high   | low    | FakeDown    |
//! | up        | low    | high   | AbsorbUp    |
//! | down      | low    | high   | AbsorbDown  |
//! | up        | high   | high   | ConfirmUp   |
//! | down      | high   | high   | ConfirmDown |
//!
//! Everything else, and every flat bar, is `None`.

use serde::{Deserialize, Serialize};

use crate::bar::Direction;
use crate::config::{Boundary, ClassifierConfig, Thresholds};
use crate::error::Result;

use super::rolling::BarPercentiles;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnomalyLabel {
    /// Wide spread up on low volume, expected to reverse down
    FakeUp,
    /// Wide spread down on low volume, expected to reverse up
    FakeDown,
    /// Narrow spread up on high volume, supply absorbing the push
    AbsorbUp,
    /// Narrow spread down on high volume, demand absorbing the push
    AbsorbDown,
    ConfirmUp,
    ConfirmDown,
    None,
}

impl AnomalyLabel {
    pub const ALL: [AnomalyLabel; 7] = [
        AnomalyLabel::FakeUp,
        AnomalyLabel::FakeDown,
        AnomalyLabel::AbsorbUp,
        AnomalyLabel::AbsorbDown,
        AnomalyLabel::ConfirmUp,
        AnomalyLabel::ConfirmDown,
        AnomalyLabel::None,
    ];

    pub fn is_anomaly(&self) -> bool {
        *self != AnomalyLabel::None
    }

    /// Label as written to exports
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyLabel::FakeUp => "FakeUp",
            AnomalyLabel::FakeDown => "FakeDown",
            AnomalyLabel::AbsorbUp => "AbsorbUp",
            AnomalyLabel::AbsorbDown => "AbsorbDown",
            AnomalyLabel::ConfirmUp => "ConfirmUp",
            AnomalyLabel::ConfirmDown => "ConfirmDown",
            AnomalyLabel::None => "None",
        }
    }

    /// Human-readable reading for the scanner
    pub fn description(&self) -> &'static str {
        match self {
            AnomalyLabel::FakeUp => "FAKE UP (bearish reversal)",
            AnomalyLabel::FakeDown => "FAKE DOWN (bullish reversal)",
            AnomalyLabel::AbsorbUp => "ABSORB UP (bearish absorption)",
            AnomalyLabel::AbsorbDown => "ABSORB DOWN (bullish absorption)",
            AnomalyLabel::ConfirmUp => "CONFIRM UP (trend continuation)",
            AnomalyLabel::ConfirmDown => "CONFIRM DOWN (trend continuation)",
            AnomalyLabel::None => "-- no anomaly",
        }
    }
}

impl std::fmt::Display for AnomalyLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for AnomalyLabel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AnomalyLabel::ALL
            .iter()
            .find(|label| label.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown anomaly label: {}", s))
    }
}

/// Where a percentile sits relative to the LOW/HIGH band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Low,
    Mid,
    High,
}

fn band(pct: f64, thresholds: &Thresholds, boundary: Boundary) -> Band {
    let (is_high, is_low) = match boundary {
        Boundary::Inclusive => (pct >= thresholds.high, pct <= thresholds.low),
        Boundary::Exclusive => (pct > thresholds.high, pct < thresholds.low),
    };
    if is_high {
        Band::High
    } else if is_low {
        Band::Low
    } else {
        Band::Mid
    }
}

/// Stateless classifier; construction validates the thresholds.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyClassifier {
    config: ClassifierConfig,
}

impl AnomalyClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn classify(&self, direction: Direction, spread_pct: f64, volume_pct: f64) -> AnomalyLabel {
        let spread = band(spread_pct, &self.config.spread, self.config.boundary);
        let volume = band(volume_pct, &self.config.volume, self.config.boundary);

        match (direction, spread, volume) {
            (Direction::Up, Band::High, Band::Low) => AnomalyLabel::FakeUp,
            (Direction::Down, Band::High, Band::Low) => AnomalyLabel::FakeDown,
            (Direction::Up, Band::Low, Band::High) => AnomalyLabel::AbsorbUp,
            (Direction::Down, Band::Low, Band::High) => AnomalyLabel::AbsorbDown,
            (Direction::Up, Band::High, Band::High) => AnomalyLabel::ConfirmUp,
            (Direction::Down, Band::High, Band::High) => AnomalyLabel::ConfirmDown,
            _ => AnomalyLabel::None,
        }
    }

    /// `None` percentiles (warm-up or malformed bar) classify to `None`
    pub fn classify_bar(&self, direction: Direction, percentiles: Option<BarPercentiles>) -> AnomalyLabel {
        match percentiles {
            Some(p) => self.classify(direction, p.spread_pct, p.volume_pct),
            None => AnomalyLabel::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VpaError;

    fn classifier() -> AnomalyClassifier {
        AnomalyClassifier::new(ClassifierConfig::default()).unwrap()
    }

    #[test]
    fn test_classification_table() {
        let c = classifier();
        assert_eq!(c.classify(Direction::Up, 0.9, 0.1), AnomalyLabel::FakeUp);
        assert_eq!(c.classify(Direction::Down, 0.9, 0.1), AnomalyLabel::FakeDown);
        assert_eq!(c.classify(Direction::Up, 0.1, 0.9), AnomalyLabel::AbsorbUp);
        assert_eq!(c.classify(Direction::Down, 0.1, 0.9), AnomalyLabel::AbsorbDown);
        assert_eq!(c.classify(Direction::Up, 0.9, 0.9), AnomalyLabel::ConfirmUp);
        assert_eq!(c.classify(Direction::Down, 0.9, 0.9), AnomalyLabel::ConfirmDown);
        assert_eq!(c.classify(Direction::Up, 0.5, 0.5), AnomalyLabel::None);
        assert_eq!(c.classify(Direction::Down, 0.1, 0.1), AnomalyLabel::None);
        assert_eq!(c.classify(Direction::Up, 0.9, 0.5), AnomalyLabel::None);
    }

    #[test]
    fn test_flat_bar_is_never_an_anomaly() {
        let c = classifier();
        for (s, v) in [(0.9, 0.1), (0.1, 0.9), (0.9, 0.9), (1.0, 1.0)] {
            assert_eq!(c.classify(Direction::Flat, s, v), AnomalyLabel::None);
        }
    }

    #[test]
    fn test_boundaries_inclusive_by_default() {
        let c = classifier();
        assert_eq!(c.classify(Direction::Up, 0.7, 0.3), AnomalyLabel::FakeUp);

        let exclusive = AnomalyClassifier::new(ClassifierConfig {
            boundary: Boundary::Exclusive,
            ..ClassifierConfig::default()
        })
        .unwrap();
        assert_eq!(exclusive.classify(Direction::Up, 0.7, 0.3), AnomalyLabel::None);
        assert_eq!(exclusive.classify(Direction::Up, 0.71, 0.29), AnomalyLabel::FakeUp);
    }

    #[test]
    fn test_independent_volume_thresholds() {
        let config = ClassifierConfig {
            volume: Thresholds { low: 0.4, high: 0.9 },
            ..ClassifierConfig::default()
        };
        let c = AnomalyClassifier::new(config).unwrap();
        assert_eq!(c.classify(Direction::Down, 0.8, 0.35), AnomalyLabel::FakeDown);
        assert_eq!(c.classify(Direction::Down, 0.8, 0.8), AnomalyLabel::None);
    }

    #[test]
    fn test_inverted_thresholds_fail_construction() {
        let err = AnomalyClassifier::new(ClassifierConfig::shared(Thresholds { low: 0.7, high: 0.3 }))
            .unwrap_err();
        assert!(matches!(err, VpaError::InvalidConfiguration { field: "spread_thresholds", .. }));
    }

    #[test]
    fn test_missing_percentiles_yield_none() {
        assert_eq!(classifier().classify_bar(Direction::Up, None), AnomalyLabel::None);
    }

    #[test]
    fn test_deterministic() {
        let c = classifier();
        let first = c.classify(Direction::Down, 0.15, 0.85);
        for _ in 0..10 {
            assert_eq!(c.classify(Direction::Down, 0.15, 0.85), first);
        }
    }

    #[test]
    fn test_label_string_round_trip() {
        for label in AnomalyLabel::ALL {
            assert_eq!(label.as_str().parse::<AnomalyLabel>().unwrap(), label);
        }
    }
}
