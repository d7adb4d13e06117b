use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::filter::{CombinationFilter, SkipRule};
use crate::plot::{DEFAULT_REFERENCE_DISTANCE, DEFAULT_X_PARAMETER};
use crate::simulator::{
    CommandTemplate, ProcessSimulator, DEFAULT_OUTPUT_PATH_FLAG, DEFAULT_SEED_FLAG,
};
use crate::space::{check_parameter_name, ParamValue, Parameter, ParameterSpace};
use crate::SweepError;

pub const DEFAULT_TRIALS: usize = 3;
/// Upper bound on the values a single range may expand to.
pub const MAX_RANGE_VALUES: usize = 10_000;

/// Candidate values of one parameter.
///
/// Ranges are half-open like `start..end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    List(Vec<ParamValue>),
    Range {
        start: i64,
        end: i64,
        #[serde(default = "default_step")]
        step: i64,
    },
    PowersOfTwo {
        exponent_start: u32,
        exponent_end: u32,
    },
}

fn default_step() -> i64 {
    1
}

impl ValueSpec {
    /// Materialises the sequence so it can be iterated any number of times.
    pub fn expand(&self) -> Result<Vec<ParamValue>, SweepError> {
        match *self {
            ValueSpec::List(ref values) => Ok(values.clone()),
            ValueSpec::Range { start, end, step } => {
                if step <= 0 {
                    return Err(SweepError::InvalidConfig(format!(
                        "range step must be positive, got {step}"
                    )));
                }
                let span = (i128::from(end) - i128::from(start)).max(0);
                let count = (span + i128::from(step) - 1) / i128::from(step);
                if count > MAX_RANGE_VALUES as i128 {
                    return Err(SweepError::InvalidConfig(format!(
                        "range {start}..{end} step {step} expands to {count} values, more than {MAX_RANGE_VALUES}"
                    )));
                }
                // Every value lies in start..end, so the narrowing is lossless.
                Ok((0..count)
                    .map(|idx| ParamValue::Int((i128::from(start) + idx * i128::from(step)) as i64))
                    .collect())
            }
            ValueSpec::PowersOfTwo {
                exponent_start,
                exponent_end,
            } => {
                if exponent_end > 62 {
                    return Err(SweepError::InvalidConfig(format!(
                        "power-of-two exponent {exponent_end} is too large"
                    )));
                }
                Ok((exponent_start..exponent_end)
                    .map(|exp| ParamValue::Int(1_i64 << exp))
                    .collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub name: String,
    pub values: ValueSpec,
}

/// `when` maps parameter names to the values that trigger the rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRuleConfig {
    pub name: String,
    pub when: BTreeMap<String, Vec<ParamValue>>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    #[serde(flatten)]
    pub command: CommandTemplate,
    #[serde_as(as = "DefaultOnNull")]
    pub output_path_flag: String,
    #[serde_as(as = "DefaultOnNull")]
    pub seed_flag: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            command: CommandTemplate::default(),
            output_path_flag: DEFAULT_OUTPUT_PATH_FLAG.to_string(),
            seed_flag: DEFAULT_SEED_FLAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub x_parameter: Option<String>,
    pub reference_distance: Option<f64>,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            x_parameter: Some(DEFAULT_X_PARAMETER.to_string()),
            reference_distance: Some(DEFAULT_REFERENCE_DISTANCE),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    #[serde_as(as = "DefaultOnNull")]
    pub trials: usize,
    pub random_seed: Option<u64>,
    pub timeout_secs: Option<u64>,
    /// Keep the built-in skip rules in addition to `skip_rules`.
    pub builtin_skip_rules: bool,
    pub simulator: SimulatorConfig,
    pub parameters: Vec<ParameterConfig>,
    pub skip_rules: Vec<SkipRuleConfig>,
    pub plot: PlotConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            random_seed: None,
            timeout_secs: None,
            builtin_skip_rules: true,
            simulator: SimulatorConfig::default(),
            parameters: vec![ParameterConfig {
                name: "numberOfStations".to_string(),
                values: ValueSpec::PowersOfTwo {
                    exponent_start: 0,
                    exponent_end: 1,
                },
            }],
            skip_rules: Vec::new(),
            plot: PlotConfig::default(),
        }
    }
}

impl SweepConfig {
    /// Reads TOML for `.toml` files and JSON otherwise.
    pub fn load(path: &Path) -> Result<Self, SweepError> {
        let raw = fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let config: SweepConfig = if is_toml {
            toml::from_str(&raw)?
        } else {
            serde_json::from_str(&raw)?
        };
        Ok(config)
    }

    /// `path` if given, else `ftm-sweep.toml` in the working directory, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SweepError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let cwd_config = PathBuf::from("ftm-sweep.toml");
        if cwd_config.exists() {
            return Self::load(&cwd_config);
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        if self.trials == 0 {
            return Err(SweepError::InvalidConfig(
                "trials must be greater than zero".to_string(),
            ));
        }

        if self.simulator.command.program.trim().is_empty() {
            return Err(SweepError::InvalidConfig(
                "simulator program must not be empty".to_string(),
            ));
        }

        if self.timeout_secs == Some(0) {
            return Err(SweepError::InvalidConfig(
                "timeout_secs must be greater than zero when set".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for parameter in &self.parameters {
            check_parameter_name(&parameter.name)?;
            if !seen.insert(parameter.name.as_str()) {
                return Err(SweepError::InvalidConfig(format!(
                    "parameter '{}' is declared more than once",
                    parameter.name
                )));
            }
        }
        self.parameter_space()?;

        for rule in &self.skip_rules {
            if rule.when.is_empty() {
                return Err(SweepError::InvalidConfig(format!(
                    "skip rule '{}' has no conditions",
                    rule.name
                )));
            }
        }

        if let Some(distance) = self.plot.reference_distance {
            if !distance.is_finite() || distance < 0.0 {
                return Err(SweepError::InvalidConfig(
                    "plot.reference_distance must be a finite, non-negative number".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn parameter_space(&self) -> Result<ParameterSpace, SweepError> {
        let parameters = self
            .parameters
            .iter()
            .map(|p| Ok(Parameter::new(p.name.clone(), p.values.expand()?)))
            .collect::<Result<Vec<_>, SweepError>>()?;
        ParameterSpace::new(parameters)
    }

    pub fn combination_filter(&self) -> CombinationFilter {
        let mut filter = if self.builtin_skip_rules {
            CombinationFilter::default()
        } else {
            CombinationFilter::empty()
        };

        for rule in &self.skip_rules {
            filter = filter.with_rule(SkipRule::all_of(rule.name.clone(), rule.when.clone()));
        }
        filter
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn process_simulator(&self) -> ProcessSimulator {
        ProcessSimulator::new(self.simulator.command.clone())
            .with_flags(&self.simulator.output_path_flag, &self.simulator.seed_flag)
            .with_timeout(self.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_single_station_sweep() {
        let config = SweepConfig::default();
        config.validate().unwrap();
        let space = config.parameter_space().unwrap();
        assert_eq!(space.len(), 1);
        assert_eq!(config.trials, 3);
    }

    #[test]
    fn value_specs_expand_eagerly() {
        let range = ValueSpec::Range { start: 5, end: 26, step: 5 };
        assert_eq!(
            range.expand().unwrap(),
            [5, 10, 15, 20, 25].map(ParamValue::Int).to_vec()
        );

        let powers = ValueSpec::PowersOfTwo { exponent_start: 0, exponent_end: 4 };
        assert_eq!(powers.expand().unwrap(), [1, 2, 4, 8].map(ParamValue::Int).to_vec());
        assert_eq!(powers.expand().unwrap(), powers.expand().unwrap());
    }

    #[test]
    fn empty_range_is_a_configuration_error() {
        let mut config = SweepConfig::default();
        config.parameters.push(ParameterConfig {
            name: "burstDuration".to_string(),
            values: ValueSpec::Range { start: 6, end: 6, step: 1 },
        });
        assert!(matches!(
            config.validate(),
            Err(SweepError::EmptyParameter { ref name }) if name == "burstDuration"
        ));
    }

    #[test]
    fn range_near_i64_max_does_not_overflow() {
        let range = ValueSpec::Range { start: i64::MAX - 3, end: i64::MAX, step: 2 };
        assert_eq!(
            range.expand().unwrap(),
            vec![ParamValue::Int(i64::MAX - 3), ParamValue::Int(i64::MAX - 1)]
        );

        let reversed = ValueSpec::Range { start: 10, end: i64::MIN, step: 1 };
        assert!(reversed.expand().unwrap().is_empty());
    }

    #[test]
    fn oversized_range_is_rejected() {
        let mut config = SweepConfig::default();
        config.parameters.push(ParameterConfig {
            name: "distance".to_string(),
            values: ValueSpec::Range { start: 0, end: i64::MAX, step: 1 },
        });
        assert!(matches!(config.validate(), Err(SweepError::InvalidConfig(_))));
    }

    #[test]
    fn path_like_parameter_name_is_rejected() {
        let mut config = SweepConfig::default();
        config.parameters.push(ParameterConfig {
            name: "../../tmp/x".to_string(),
            values: ValueSpec::List(vec![ParamValue::Int(1)]),
        });
        assert!(matches!(config.validate(), Err(SweepError::InvalidConfig(_))));
    }

    #[test]
    fn duplicate_parameter_is_rejected() {
        let mut config = SweepConfig::default();
        config.parameters.push(config.parameters[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_sweep() {
        let raw = r#"
            trials = 5
            random_seed = 11
            timeout_secs = 600

            [simulator]
            program = "./ns3"
            args = ["run", "ftm-example {params}"]
            seed_flag = "RngRun"

            [[parameters]]
            name = "numberOfStations"
            values = { exponent_start = 0, exponent_end = 3 }

            [[parameters]]
            name = "channelBandwidth"
            values = [20, 40, 80, 160]

            [[parameters]]
            name = "distance"
            values = { start = 5, end = 26, step = 5 }

            [[skip_rules]]
            name = "narrow-channel-far"
            when = { channelBandwidth = [20], distance = [25] }
        "#;
        let config: SweepConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();

        assert_eq!(config.trials, 5);
        assert_eq!(config.simulator.command.program, "./ns3");
        assert_eq!(config.simulator.output_path_flag, DEFAULT_OUTPUT_PATH_FLAG);
        assert_eq!(config.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.parameter_space().unwrap().len(), 3 * 4 * 5);
        assert_eq!(config.combination_filter().rules().len(), 2);
        assert_eq!(config.plot, PlotConfig::default());
    }

    #[test]
    fn parses_json_with_nulls() {
        let raw = r#"{
            "trials": null,
            "parameters": [{ "name": "distance", "values": [1.5, 2.5] }]
        }"#;
        let config: SweepConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.trials, 0);
        assert!(config.validate().is_err());

        let values = config.parameters[0].values.expand().unwrap();
        assert_eq!(values, vec![ParamValue::Float(1.5), ParamValue::Float(2.5)]);
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("sweep.toml");
        fs::write(&toml_path, "trials = 2\n").unwrap();
        assert_eq!(SweepConfig::load(&toml_path).unwrap().trials, 2);

        let json_path = dir.path().join("sweep.json");
        fs::write(&json_path, r#"{"trials": 4}"#).unwrap();
        assert_eq!(SweepConfig::load(&json_path).unwrap().trials, 4);
    }
}
