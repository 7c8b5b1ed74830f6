//! Anomaly label to trade direction
//!
//! Fakes and absorptions are faded, confirmations are followed.

use serde::{Deserialize, Serialize};

use super::classifier::AnomalyLabel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    Long,
    Short,
    Flat,
}

impl Signal {
    pub fn from_label(label: AnomalyLabel) -> Self {
        match label {
            AnomalyLabel::FakeUp => Signal::Short,
            AnomalyLabel::FakeDown => Signal::Long,
            AnomalyLabel::AbsorbUp => Signal::Short,
            AnomalyLabel::AbsorbDown => Signal::Long,
            AnomalyLabel::ConfirmUp => Signal::Long,
            AnomalyLabel::ConfirmDown => Signal::Short,
            AnomalyLabel::None => Signal::Flat,
        }
    }

    /// +1 long, -1 short, 0 flat
    pub fn sign(&self) -> f64 {
        match self {
            Signal::Long => 1.0,
            Signal::Short => -1.0,
            Signal::Flat => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Long => "long",
            Signal::Short => "short",
            Signal::Flat => "flat",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Signal::Long => "LONG",
            Signal::Short => "SHORT",
            Signal::Flat => "FLAT",
        })
    }
}

impl std::str::FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Signal::Long),
            "short" => Ok(Signal::Short),
            "flat" => Ok(Signal::Flat),
            other => Err(format!("unknown signal: {}", other)),
        }
    }
}
