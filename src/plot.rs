//! Chart-ready series for the external plotting step.
//!
//! Rendering happens elsewhere; this module only shapes the aggregated
//! results into one series per metric and serializes them.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregate::theoretical_rtt;
use crate::report::Metric;
use crate::space::CombinationKey;
use crate::sweep::CombinationResult;
use crate::SweepError;

pub const PLOT_DATA_FILE: &str = "plot_data.json";
pub const DEFAULT_X_PARAMETER: &str = "numberOfStations";
pub const DEFAULT_REFERENCE_DISTANCE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotPoint {
    pub label: String,
    pub key: CombinationKey,
    /// Value of the x-axis parameter, when the combination sweeps it.
    pub x: Option<f64>,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLine {
    pub y: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricChart {
    pub metric: Metric,
    pub ylabel: String,
    pub points: Vec<PlotPoint>,
    pub reference_line: Option<ReferenceLine>,
}

impl MetricChart {
    /// File name the renderer should use, e.g. `Mean_RTT_[ps]_line_graph_with_std.png`.
    pub fn image_file_name(&self) -> String {
        format!("{}_line_graph_with_std.png", self.ylabel.replace(' ', "_"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotData {
    pub x_parameter: Option<String>,
    pub xlabel: String,
    pub charts: Vec<MetricChart>,
}

impl PlotData {
    pub fn from_results(
        results: &[CombinationResult],
        x_parameter: Option<&str>,
        reference_distance: Option<f64>,
    ) -> Self {
        let charts = Metric::ALL
            .into_iter()
            .map(|metric| MetricChart {
                metric,
                ylabel: metric.label().to_string(),
                points: results
                    .iter()
                    .filter(|result| result.aggregate.metric(metric).has_samples())
                    .map(|result| {
                        let summary = result.aggregate.metric(metric);
                        PlotPoint {
                            label: result.label(),
                            key: result.key(),
                            x: x_parameter
                                .and_then(|name| result.combination.get(name))
                                .map(|value| value.as_f64()),
                            mean: summary.mean,
                            std: summary.std,
                        }
                    })
                    .collect(),
                reference_line: match (metric, reference_distance) {
                    (Metric::Rtt, Some(distance)) => Some(ReferenceLine {
                        y: theoretical_rtt(distance),
                        label: format!("RTT of the Real distance {distance} [m]"),
                    }),
                    _ => None,
                },
            })
            .collect();

        Self {
            x_parameter: x_parameter.map(str::to_string),
            xlabel: x_parameter.map(axis_label).unwrap_or_default(),
            charts,
        }
    }

    pub fn chart(&self, metric: Metric) -> Option<&MetricChart> {
        self.charts.iter().find(|chart| chart.metric == metric)
    }
}

/// `numberOfStations` -> `Number Of Stations`
fn axis_label(parameter: &str) -> String {
    let mut label = String::with_capacity(parameter.len() + 4);
    for (idx, ch) in parameter.chars().enumerate() {
        if idx == 0 {
            label.extend(ch.to_uppercase());
        } else if ch.is_uppercase() {
            label.push(' ');
            label.push(ch);
        } else {
            label.push(ch);
        }
    }
    label
}

pub fn write_plot_data(path: &Path, data: &PlotData) -> Result<(), SweepError> {
    fs::write(path, serde_json::to_string_pretty(data)?)?;
    Ok(())
}
