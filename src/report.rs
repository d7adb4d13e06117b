//! Parsing of the simulator's human-readable stdout report.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MEAN_RTT_MARKER: &str = "Mean RTT [ps]:";
pub const MEAN_SIGNAL_STRENGTH_MARKER: &str = "Mean Signal Strength [dBm]:";
pub const NUM_MEASUREMENTS_MARKER: &str = "Number of Measurements:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Rtt,
    SignalStrength,
    NumMeasurements,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Rtt, Metric::SignalStrength, Metric::NumMeasurements];

    pub fn marker(self) -> &'static str {
        match self {
            Metric::Rtt => MEAN_RTT_MARKER,
            Metric::SignalStrength => MEAN_SIGNAL_STRENGTH_MARKER,
            Metric::NumMeasurements => NUM_MEASUREMENTS_MARKER,
        }
    }

    /// Axis label used on charts.
    pub fn label(self) -> &'static str {
        match self {
            Metric::Rtt => "Mean RTT [ps]",
            Metric::SignalStrength => "Mean Signal Strength [dBm]",
            Metric::NumMeasurements => "Number of Measurements",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Values extracted from a single trial. `None` means the marker never appeared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialObservation {
    pub mean_rtt: Option<f64>,
    pub mean_signal_strength: Option<f64>,
    pub num_measurements: Option<i64>,
}

impl TrialObservation {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Rtt => self.mean_rtt,
            Metric::SignalStrength => self.mean_signal_strength,
            Metric::NumMeasurements => self.num_measurements.map(|n| n as f64),
        }
    }

    pub fn missing(&self) -> Vec<Metric> {
        Metric::ALL
            .into_iter()
            .filter(|&metric| self.value(metric).is_none())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.missing().len() == Metric::ALL.len()
    }
}

/// A marker line whose value could not be read as a number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: malformed value '{value}' for {metric}")]
pub struct ParseError {
    pub metric: Metric,
    pub line: usize,
    pub value: String,
}

/// Scans `text` line by line for the three metric markers.
///
/// A repeated marker overwrites the earlier value.
pub fn parse_report(text: &str) -> Result<TrialObservation, ParseError> {
    let mut observation = TrialObservation::default();

    for (idx, line) in text.lines().enumerate() {
        let Some((metric, raw)) = match_marker(line) else {
            continue;
        };
        let raw = raw.trim();
        let malformed = || ParseError {
            metric,
            line: idx + 1,
            value: raw.to_string(),
        };

        match metric {
            Metric::Rtt => {
                observation.mean_rtt = Some(parse_float(raw).ok_or_else(malformed)?);
            }
            Metric::SignalStrength => {
                observation.mean_signal_strength = Some(parse_float(raw).ok_or_else(malformed)?);
            }
            Metric::NumMeasurements => {
                observation.num_measurements = Some(raw.parse().map_err(|_| malformed())?);
            }
        }
    }

    Ok(observation)
}

fn match_marker(line: &str) -> Option<(Metric, &str)> {
    Metric::ALL.into_iter().find_map(|metric| {
        line.find(metric.marker())
            .map(|pos| (metric, &line[pos + metric.marker().len()..]))
    })
}

fn parse_float(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}
