//! Skip rules for physically inconsistent parameter combinations.

use std::collections::BTreeMap;
use std::fmt;

use crate::space::{Combination, ParamValue};

/// Name of the built-in burst/min-delta incompatibility rule.
pub const BURST_SHORTER_THAN_MIN_DELTA: &str = "burst-shorter-than-min-delta";

#[derive(Clone)]
pub enum RuleKind {
    /// Matches when every listed parameter is present with one of the listed values.
    AllOf(BTreeMap<String, Vec<ParamValue>>),
    /// Arbitrary pure predicate over the combination.
    Predicate(fn(&Combination) -> bool),
}

impl fmt::Debug for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::AllOf(conditions) => f.debug_tuple("AllOf").field(conditions).finish(),
            RuleKind::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkipRule {
    pub name: String,
    pub kind: RuleKind,
}

impl SkipRule {
    pub fn all_of<I, N>(name: impl Into<String>, conditions: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<ParamValue>)>,
        N: Into<String>,
    {
        Self {
            name: name.into(),
            kind: RuleKind::AllOf(
                conditions
                    .into_iter()
                    .map(|(param, values)| (param.into(), values))
                    .collect(),
            ),
        }
    }

    pub fn predicate(name: impl Into<String>, predicate: fn(&Combination) -> bool) -> Self {
        Self {
            name: name.into(),
            kind: RuleKind::Predicate(predicate),
        }
    }

    pub fn matches(&self, combination: &Combination) -> bool {
        match &self.kind {
            RuleKind::AllOf(conditions) => {
                !conditions.is_empty()
                    && conditions.iter().all(|(param, allowed)| {
                        combination
                            .get(param)
                            .map(|value| allowed.contains(&value))
                            .unwrap_or(false)
                    })
            }
            RuleKind::Predicate(predicate) => predicate(combination),
        }
    }
}

/// A burst of duration index 5 cannot hold the 320/640 min-delta spacings.
pub fn burst_shorter_than_min_delta() -> SkipRule {
    SkipRule::all_of(
        BURST_SHORTER_THAN_MIN_DELTA,
        [
            ("burstDuration", vec![ParamValue::Int(5)]),
            ("minDeltaFtm", vec![ParamValue::Int(320), ParamValue::Int(640)]),
        ],
    )
}

#[derive(Debug, Clone)]
pub struct CombinationFilter {
    rules: Vec<SkipRule>,
}

impl Default for CombinationFilter {
    fn default() -> Self {
        Self {
            rules: vec![burst_shorter_than_min_delta()],
        }
    }
}

impl CombinationFilter {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn new(rules: Vec<SkipRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: SkipRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[SkipRule] {
        &self.rules
    }

    /// First rule that asks for `combination` to be skipped.
    pub fn matching_rule(&self, combination: &Combination) -> Option<&SkipRule> {
        self.rules.iter().find(|rule| rule.matches(combination))
    }

    pub fn should_skip(&self, combination: &Combination) -> bool {
        self.matching_rule(combination).is_some()
    }

    pub fn is_valid(&self, combination: &Combination) -> bool {
        !self.should_skip(combination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo(burst: i64, min_delta: i64) -> Combination {
        Combination::new()
            .with("burstDuration", burst)
            .with("minDeltaFtm", min_delta)
    }

    #[test]
    fn builtin_rule_skips_short_bursts() {
        let filter = CombinationFilter::default();
        assert!(filter.should_skip(&combo(5, 320)));
        assert!(filter.should_skip(&combo(5, 640)));
        assert!(filter.is_valid(&combo(5, 10)));
        assert!(filter.is_valid(&combo(6, 320)));
    }

    #[test]
    fn absent_parameter_never_matches() {
        let filter = CombinationFilter::default();
        let only_burst = Combination::new().with("burstDuration", 5_i64);
        assert!(filter.is_valid(&only_burst));
        assert!(filter.is_valid(&Combination::new()));
    }

    #[test]
    fn verdict_is_repeatable() {
        let filter = CombinationFilter::default();
        let skipped = combo(5, 320);
        let kept = combo(7, 320);
        for _ in 0..5 {
            assert!(filter.should_skip(&skipped));
            assert!(filter.is_valid(&kept));
        }
    }

    #[test]
    fn rules_combine_with_or() {
        fn many_stations(c: &Combination) -> bool {
            c.get("numberOfStations").map(|v| v.as_f64() > 64.0).unwrap_or(false)
        }

        let filter = CombinationFilter::default()
            .with_rule(SkipRule::predicate("too-many-stations", many_stations));
        let crowded = Combination::new().with("numberOfStations", 128_i64);
        assert_eq!(
            filter.matching_rule(&crowded).map(|r| r.name.as_str()),
            Some("too-many-stations")
        );
        assert_eq!(
            filter.matching_rule(&combo(5, 640)).map(|r| r.name.as_str()),
            Some(BURST_SHORTER_THAN_MIN_DELTA)
        );
    }

    #[test]
    fn empty_condition_set_matches_nothing() {
        let rule = SkipRule::all_of("noop", Vec::<(String, Vec<ParamValue>)>::new());
        assert!(!rule.matches(&combo(5, 320)));
    }
}
