use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SweepError;

/// Label used for the combination of an empty parameter set.
pub const BASELINE_LABEL: &str = "baseline";

/// A single candidate value for a swept parameter.
///
/// Booleans are passed to the simulator and written to tables as `1`/`0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            ParamValue::Int(v) => v as f64,
            ParamValue::Float(v) => v,
            ParamValue::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ParamValue::Int(_) => 0,
            ParamValue::Float(_) => 1,
            ParamValue::Bool(_) => 2,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{}", u8::from(*v)),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

// Floats use the IEEE total order so values can key ordered collections.
impl Ord for ParamValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ParamValue::Int(a), ParamValue::Int(b)) => a.cmp(b),
            (ParamValue::Float(a), ParamValue::Float(b)) => a.total_cmp(b),
            (ParamValue::Bool(a), ParamValue::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for ParamValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ParamValue {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub values: Vec<ParamValue>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, values: Vec<ParamValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Canonical identity of a combination: its `(name, value)` pairs in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CombinationKey(Vec<(String, ParamValueKey)>);

/// Hashable mirror of [`ParamValue`] used inside [`CombinationKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ParamValueKey {
    Int(i64),
    Float(u64),
    Bool(bool),
}

impl From<ParamValue> for ParamValueKey {
    fn from(value: ParamValue) -> Self {
        match value {
            ParamValue::Int(v) => ParamValueKey::Int(v),
            ParamValue::Float(v) => ParamValueKey::Float(v.to_bits()),
            ParamValue::Bool(v) => ParamValueKey::Bool(v),
        }
    }
}

impl CombinationKey {
    pub fn pairs(&self) -> &[(String, ParamValueKey)] {
        &self.0
    }
}

/// One assignment of a value to every swept parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Combination {
    entries: Vec<(String, ParamValue)>,
}

impl Combination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Value of `name`, or `None` when the parameter is not part of this sweep.
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| *value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn entries(&self) -> &[(String, ParamValue)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key(&self) -> CombinationKey {
        CombinationKey(
            self.entries
                .iter()
                .map(|(name, value)| (name.clone(), ParamValueKey::from(*value)))
                .collect(),
        )
    }

    /// Path- and legend-friendly label, e.g. `numberOfStations=4_distance=10`.
    pub fn label(&self) -> String {
        if self.entries.is_empty() {
            return BASELINE_LABEL.to_string();
        }

        self.entries
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// `--name=value` flags in declaration order.
    pub fn flags(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(name, value)| format!("--{name}={value}"))
            .collect()
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSpace {
    parameters: Vec<Parameter>,
}

/// Rejects names that cannot be used as a segment of a trial directory label.
pub fn check_parameter_name(name: &str) -> Result<(), SweepError> {
    if name.trim().is_empty() {
        return Err(SweepError::InvalidConfig(
            "parameter names must not be empty".to_string(),
        ));
    }
    if name.contains(&['/', '\\', '\0'][..]) || name.contains("..") {
        return Err(SweepError::InvalidConfig(format!(
            "parameter name '{name}' must not contain path separators or '..'"
        )));
    }
    Ok(())
}

impl ParameterSpace {
    /// Every parameter needs a usable name and at least one value, and no two
    /// of its values may render to the same label.
    pub fn new(parameters: Vec<Parameter>) -> Result<Self, SweepError> {
        for parameter in &parameters {
            check_parameter_name(&parameter.name)?;
            if parameter.values.is_empty() {
                return Err(SweepError::EmptyParameter {
                    name: parameter.name.clone(),
                });
            }

            let mut labels = BTreeSet::new();
            for value in &parameter.values {
                let label = value.to_string();
                if !labels.insert(label.clone()) {
                    return Err(SweepError::InvalidConfig(format!(
                        "parameter '{}' lists the value {label} more than once",
                        parameter.name
                    )));
                }
            }
        }

        Ok(Self { parameters })
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Number of combinations, i.e. the product of the value counts.
    pub fn len(&self) -> usize {
        self.parameters.iter().map(|p| p.values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full Cartesian product.
    ///
    /// Parameters are folded in declaration order: each new parameter's values
    /// form the outer loop over the partial combinations built so far, so the
    /// first declared parameter varies fastest in the result.
    pub fn combinations(&self) -> Vec<Combination> {
        let mut combinations = vec![Combination::new()];

        for parameter in &self.parameters {
            let mut extended = Vec::with_capacity(combinations.len() * parameter.values.len());
            for value in &parameter.values {
                for partial in &combinations {
                    extended.push(partial.clone().with(parameter.name.clone(), *value));
                }
            }
            combinations = extended;
        }

        combinations
    }
}
