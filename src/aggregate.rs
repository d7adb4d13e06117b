use serde::{Deserialize, Serialize};

use crate::report::{Metric, TrialObservation};

/// Radio propagation speed in metres per picosecond.
pub const PROPAGATION_SPEED_M_PER_PS: f64 = 0.0003;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub samples: usize,
}

impl MetricSummary {
    /// Two-pass mean and population standard deviation. No samples gives zeros.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            mean,
            std: variance.sqrt(),
            samples: values.len(),
        }
    }

    /// `false` when no trial reported this metric; mean and std are then placeholders.
    pub fn has_samples(&self) -> bool {
        self.samples > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub rtt: MetricSummary,
    pub signal_strength: MetricSummary,
    pub num_measurements: MetricSummary,
}

impl Aggregate {
    pub fn metric(&self, metric: Metric) -> &MetricSummary {
        match metric {
            Metric::Rtt => &self.rtt,
            Metric::SignalStrength => &self.signal_strength,
            Metric::NumMeasurements => &self.num_measurements,
        }
    }

    /// No usable RTT estimate came out of any trial.
    pub fn is_degenerate(&self) -> bool {
        self.rtt.mean == 0.0
    }
}

pub fn aggregate(observations: &[TrialObservation]) -> Aggregate {
    let summarize = |metric: Metric| {
        let values: Vec<f64> = observations
            .iter()
            .filter_map(|obs| obs.value(metric))
            .collect();
        MetricSummary::from_values(&values)
    };

    Aggregate {
        rtt: summarize(Metric::Rtt),
        signal_strength: summarize(Metric::SignalStrength),
        num_measurements: summarize(Metric::NumMeasurements),
    }
}

/// Half-round-trip distance estimate minus ground truth, rounded to 2 decimals.
///
/// A zero RTT mean yields `distance` itself.
pub fn measurement_error(rtt_mean: f64, distance: f64) -> f64 {
    if rtt_mean == 0.0 {
        return distance;
    }

    round_to(
        (rtt_mean * PROPAGATION_SPEED_M_PER_PS / 2.0 - distance).abs(),
        2,
    )
}

/// RTT in picoseconds of a round trip over `distance` metres.
pub fn theoretical_rtt(distance: f64) -> f64 {
    distance * 2.0 / PROPAGATION_SPEED_M_PER_PS
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10_f64.powi(decimals);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    use super::*;

    fn rtt(value: f64) -> TrialObservation {
        TrialObservation {
            mean_rtt: Some(value),
            ..TrialObservation::default()
        }
    }

    #[test]
    fn identical_trials_have_zero_spread() {
        let agg = aggregate(&[rtt(33333.0), rtt(33333.0), rtt(33333.0)]);
        assert_eq!(agg.rtt.mean, 33333.0);
        assert_eq!(agg.rtt.std, 0.0);
        assert_eq!(agg.rtt.samples, 3);
        assert_eq!(
            measurement_error(agg.rtt.mean, 5.0),
            round_to((33333.0 * 0.0003 / 2.0 - 5.0_f64).abs(), 2)
        );
    }

    #[test]
    fn uses_population_standard_deviation() {
        let agg = aggregate(&[rtt(2.0), rtt(4.0), rtt(4.0), rtt(4.0), rtt(5.0), rtt(5.0), rtt(7.0), rtt(9.0)]);
        assert_relative_eq!(agg.rtt.mean, 5.0);
        assert_relative_eq!(agg.rtt.std, 2.0);
    }

    #[test]
    fn metrics_aggregate_over_present_values_only() {
        let observations = [
            TrialObservation {
                mean_rtt: Some(100.0),
                mean_signal_strength: Some(-40.0),
                num_measurements: Some(10),
            },
            TrialObservation {
                mean_rtt: Some(300.0),
                mean_signal_strength: None,
                num_measurements: Some(20),
            },
            TrialObservation::default(),
        ];
        let agg = aggregate(&observations);
        assert_relative_eq!(agg.rtt.mean, 200.0);
        assert_relative_eq!(agg.rtt.std, 100.0);
        assert_relative_eq!(agg.signal_strength.mean, -40.0);
        assert_eq!(agg.signal_strength.samples, 1);
        assert_relative_eq!(agg.num_measurements.mean, 15.0);
    }

    #[test]
    fn metric_without_reports_has_no_samples() {
        let agg = aggregate(&[rtt(6667.0), rtt(6667.0), rtt(6667.0)]);
        assert!(agg.rtt.has_samples());
        assert!(!agg.signal_strength.has_samples());
        assert!(!agg.num_measurements.has_samples());
        assert!(!agg.is_degenerate());
    }

    #[test]
    fn no_samples_is_degenerate() {
        let agg = aggregate(&[TrialObservation::default(), TrialObservation::default()]);
        assert_eq!(agg.rtt, MetricSummary::default());
        assert!(agg.is_degenerate());
        assert!(aggregate(&[]).is_degenerate());
    }

    #[test]
    fn zero_rtt_error_falls_back_to_distance() {
        assert_eq!(measurement_error(0.0, 15.0), 15.0);
    }

    #[test]
    fn error_is_rounded_to_centimetres() {
        // 40000 ps -> 6 m estimate.
        assert_eq!(measurement_error(40_000.0, 5.0), 1.0);
        assert_eq!(measurement_error(34_567.0, 5.0), 0.19);
    }

    #[test]
    fn reference_rtt_for_one_metre() {
        assert_relative_eq!(theoretical_rtt(1.0), 6666.666666666667, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn aggregation_is_idempotent(values in prop::collection::vec(prop::option::of(-1.0e6f64..1.0e6), 0..12)) {
            let observations: Vec<TrialObservation> = values
                .iter()
                .map(|v| TrialObservation { mean_rtt: *v, ..TrialObservation::default() })
                .collect();
            prop_assert_eq!(aggregate(&observations), aggregate(&observations));

            let present: Vec<f64> = values.iter().flatten().copied().collect();
            let agg = aggregate(&observations);
            prop_assert_eq!(agg.rtt.samples, present.len());
            if present.is_empty() {
                prop_assert_eq!(agg.rtt.mean, 0.0);
            } else {
                let mean = present.iter().sum::<f64>() / present.len() as f64;
                prop_assert!((agg.rtt.mean - mean).abs() <= 1e-6 * mean.abs().max(1.0));
                prop_assert!(agg.rtt.std >= 0.0);
            }
        }
    }
}
