//! Gating rules: named preconditions evaluated against the latest observation.
//!
//! Rules are configured as `{op, ...params}` mappings:
//!
//! | op             | params                 | passes when                         |
//! |----------------|------------------------|-------------------------------------|
//! | `var_gte`      | `var`, `value`         | variable is numeric and `>= value`  |
//! | `arg_in_range` | `var`, `min`, `max`    | variable is numeric and in `[min, max]` |
//! | `flag_true`    | `var`                  | variable is truthy                  |
//! | `time_since`   | `tag`, `at_least`      | the tag was seen at least `at_least` seconds before the latest observation |
//!
//! Evaluation never fails: configuration problems and missing data both come
//! back as a failing [`RuleResult`] whose reason names the rule or variable.
//!
//! ```rust
//! use serde_json::json;
//! use simtutor::Observation;
//! use simtutor::gating::GatingEngine;
//!
//! let engine = GatingEngine::from_config(&json!([{"op": "var_gte", "var": "rpm", "value": 0.2}]));
//! let observation = Observation::new(chrono::Utc::now(), "mock", json!({"vars": {"rpm": 0.15}}));
//!
//! let result = engine.evaluate(&[observation]);
//! assert!(!result.allowed);
//! assert_eq!(result.reason.as_deref(), Some("payload.vars.rpm<0.2"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::types::Observation;
use crate::{Result, RuleConfigError, TutorError};

/// Outcome of a gating evaluation. `reason` is set only on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RuleResult {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()) }
    }
}

/// A validated gating rule.
#[derive(Debug, Clone, PartialEq)]
pub enum GatingRule {
    VarGte { var: String, value: f64 },
    ArgInRange { var: String, min: f64, max: f64 },
    FlagTrue { var: String },
    TimeSince { tag: String, at_least: f64 },
    /// Kept by lenient loading so that evaluation fails with the config reason
    Misconfigured { reason: String },
}

impl GatingRule {
    /// Validate one `{op, ...}` mapping.
    pub fn from_config(config: &JsonValue) -> std::result::Result<Self, RuleConfigError> {
        let empty = Map::new();
        let params = config.as_object().unwrap_or(&empty);
        let op = params.get("op").and_then(JsonValue::as_str).ok_or(RuleConfigError::MissingOp)?;

        match op {
            "var_gte" => Ok(GatingRule::VarGte {
                var: text_param(params, "var_gte", "var")?,
                value: number_param(params, "var_gte", "value")?,
            }),
            "arg_in_range" => Ok(GatingRule::ArgInRange {
                var: text_param(params, "arg_in_range", "var")?,
                min: number_param(params, "arg_in_range", "min")?,
                max: number_param(params, "arg_in_range", "max")?,
            }),
            "flag_true" => Ok(GatingRule::FlagTrue { var: text_param(params, "flag_true", "var")? }),
            "time_since" => Ok(GatingRule::TimeSince {
                tag: text_param(params, "time_since", "tag")?,
                at_least: number_param(params, "time_since", "at_least")?,
            }),
            other => Err(RuleConfigError::UnknownOp { op: other.to_string() }),
        }
    }

    /// Evaluate against `history`, whose last element is the current observation.
    fn check(&self, history: &[Observation]) -> std::result::Result<(), String> {
        let Some(latest) = history.last() else {
            return Err("no observations".to_string());
        };

        match self {
            GatingRule::VarGte { var, value } => {
                let (path, found) = resolve_var(latest, var)?;
                match numeric(&found) {
                    Some(actual) if actual >= *value => Ok(()),
                    _ => Err(format!("{}<{}", path, value)),
                }
            }
            GatingRule::ArgInRange { var, min, max } => {
                let (path, found) = resolve_var(latest, var)?;
                match numeric(&found) {
                    Some(actual) if actual >= *min && actual <= *max => Ok(()),
                    _ => Err(format!("{} not in [{},{}]", path, min, max)),
                }
            }
            GatingRule::FlagTrue { var } => match resolve_var(latest, var) {
                Ok((_, found)) if truthy(&found) => Ok(()),
                Ok((path, _)) => Err(format!("{} not true", path)),
                Err(_) => Err(format!("{} not true", var)),
            },
            GatingRule::TimeSince { tag, at_least } => {
                let earlier = &history[..history.len() - 1];
                let seen = earlier
                    .iter()
                    .rev()
                    .find(|observation| observation.has_tag(tag))
                    .ok_or_else(|| format!("tag {} never seen", tag))?;
                let elapsed = (latest.timestamp - seen.timestamp).num_milliseconds() as f64 / 1000.0;
                if elapsed < *at_least {
                    return Err(format!("time_since {} {:.1}s<{}", tag, elapsed, at_least));
                }
                Ok(())
            }
            GatingRule::Misconfigured { reason } => Err(reason.clone()),
        }
    }
}

fn text_param(
    params: &Map<String, JsonValue>,
    op: &'static str,
    param: &'static str,
) -> std::result::Result<String, RuleConfigError> {
    match params.get(param) {
        None | Some(JsonValue::Null) => Err(RuleConfigError::MissingParam { op, param }),
        Some(JsonValue::String(text)) => Ok(text.clone()),
        Some(other) => Ok(other.to_string()),
    }
}

fn number_param(
    params: &Map<String, JsonValue>,
    op: &'static str,
    param: &'static str,
) -> std::result::Result<f64, RuleConfigError> {
    match params.get(param) {
        None | Some(JsonValue::Null) => Err(RuleConfigError::MissingParam { op, param }),
        Some(value) => value.as_f64().ok_or(RuleConfigError::NotNumeric { op, param }),
    }
}

/// Candidate paths for a rule variable, in lookup order.
///
/// A bare name checks `payload.vars` then top-level `vars` then the name as a
/// raw path. A `vars.` prefix checks `payload.vars` then top-level `vars`
/// only. Anything else is a raw path.
pub fn candidate_paths(var: &str) -> Vec<String> {
    if !var.contains('.') {
        vec![format!("payload.vars.{}", var), format!("vars.{}", var), var.to_string()]
    } else if let Some(rest) = var.strip_prefix("vars.") {
        vec![format!("payload.vars.{}", rest), var.to_string()]
    } else {
        vec![var.to_string()]
    }
}

/// Resolve `var` on `observation`, returning the path that matched and its
/// value. Null counts as absent. The error reason lists every path checked.
fn resolve_var(observation: &Observation, var: &str) -> std::result::Result<(String, JsonValue), String> {
    let candidates = candidate_paths(var);
    for path in &candidates {
        if let Some(value) = observation.lookup(path).filter(|value| !value.is_null()) {
            return Ok((path.clone(), value));
        }
    }
    Err(format!("{} missing (checked {})", var, candidates.join(", ")))
}

/// Numbers, and booleans as 0/1.
fn numeric(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_f64(),
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

/// Ordered rule list evaluated with first-failure short-circuit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatingEngine {
    rules: Vec<GatingRule>,
}

impl GatingEngine {
    pub fn new(rules: Vec<GatingRule>) -> Self {
        Self { rules }
    }

    /// Lenient load: a rule that fails validation is kept and reports its
    /// configuration problem every time it is evaluated.
    pub fn from_config(config: &JsonValue) -> Self {
        let rules = rule_configs(config)
            .iter()
            .map(|entry| {
                GatingRule::from_config(entry).unwrap_or_else(|err| {
                    debug!(rule = %entry, error = %err, "Keeping misconfigured gating rule");
                    GatingRule::Misconfigured { reason: err.to_string() }
                })
            })
            .collect();
        Self { rules }
    }

    /// Strict load: the first invalid rule is an error.
    pub fn try_from_config(config: &JsonValue) -> std::result::Result<Self, RuleConfigError> {
        let rules = rule_configs(config)
            .iter()
            .map(GatingRule::from_config)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Lenient load from a YAML list of rule mappings.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: JsonValue = serde_yaml_ng::from_str(text)
            .map_err(|e| TutorError::parse_error("gating rules", e.to_string()))?;
        Ok(Self::from_config(&config))
    }

    pub fn rules(&self) -> &[GatingRule] {
        &self.rules
    }

    /// Evaluate every rule against the last observation of `history`.
    pub fn evaluate(&self, history: &[Observation]) -> RuleResult {
        if history.is_empty() {
            return RuleResult::deny("no observations");
        }
        for rule in &self.rules {
            if let Err(reason) = rule.check(history) {
                debug!(?rule, %reason, "Gating rule failed");
                return RuleResult::deny(reason);
            }
        }
        RuleResult::allow()
    }
}

fn rule_configs(config: &JsonValue) -> Vec<JsonValue> {
    match config {
        JsonValue::Array(entries) => entries.clone(),
        JsonValue::Null => Vec::new(),
        single => vec![single.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::observation_at;
    use proptest::prelude::*;
    use serde_json::json;

    fn engine(rules: JsonValue) -> GatingEngine {
        GatingEngine::from_config(&rules)
    }

    #[test]
    fn var_gte_allows_when_met() {
        let result = engine(json!([{"op": "var_gte", "var": "payload.rpm", "value": 0.2}]))
            .evaluate(&[observation_at(0, json!({"rpm": 0.25}), &[])]);
        assert_eq!(result, RuleResult::allow());
    }

    #[test]
    fn var_gte_blocks_when_low() {
        let result = engine(json!([{"op": "var_gte", "var": "payload.rpm", "value": 0.2}]))
            .evaluate(&[observation_at(0, json!({"rpm": 0.15}), &[])]);
        assert_eq!(result, RuleResult::deny("payload.rpm<0.2"));
    }

    #[test]
    fn bare_name_prefers_payload_vars() {
        let observation = observation_at(0, json!({"vars": {"rpm": 0.15}}), &[]).with_var("rpm", 0.9);
        let result = engine(json!([{"op": "var_gte", "var": "rpm", "value": 0.2}])).evaluate(&[observation]);
        assert!(!result.allowed);
        assert!(result.reason.unwrap_or_default().contains("payload.vars.rpm"));
    }

    #[test]
    fn bare_name_falls_back_to_top_level_vars_then_raw_path() {
        let rules = engine(json!([{"op": "flag_true", "var": "apu_ready"}]));

        let top_level = observation_at(0, json!({}), &[]).with_var("apu_ready", true);
        assert!(rules.evaluate(&[top_level]).allowed);

        let missing = observation_at(0, json!({}), &[]);
        assert_eq!(rules.evaluate(&[missing]), RuleResult::deny("apu_ready not true"));

        // `source` is a root field of every observation
        let raw_path = engine(json!([{"op": "flag_true", "var": "source"}]));
        assert!(raw_path.evaluate(&[observation_at(0, json!({}), &[])]).allowed);
    }

    #[test]
    fn vars_prefix_never_falls_back_to_raw_path() {
        assert_eq!(candidate_paths("vars.rpm"), ["payload.vars.rpm", "vars.rpm"]);
        assert_eq!(candidate_paths("rpm"), ["payload.vars.rpm", "vars.rpm", "rpm"]);
        assert_eq!(candidate_paths("payload.rpm"), ["payload.rpm"]);

        let observation = observation_at(0, json!({}), &[]).with_var("rpm", 0.5);
        let result = engine(json!([{"op": "var_gte", "var": "vars.rpm", "value": 0.2}])).evaluate(&[observation]);
        assert!(result.allowed);
    }

    #[test]
    fn arg_in_range_checks_both_bounds() {
        let rules = engine(json!([{"op": "arg_in_range", "var": "payload.temp", "min": 190, "max": 590}]));
        assert!(rules.evaluate(&[observation_at(0, json!({"temp": 400}), &[])]).allowed);
        assert_eq!(
            rules.evaluate(&[observation_at(0, json!({"temp": 650}), &[])]),
            RuleResult::deny("payload.temp not in [190,590]")
        );
    }

    #[test]
    fn flag_true_blocks_for_false_null_or_missing() {
        let rules = engine(json!([{"op": "flag_true", "var": "payload.apu_ready"}]));
        assert!(rules.evaluate(&[observation_at(0, json!({"apu_ready": true}), &[])]).allowed);
        for payload in [json!({"apu_ready": false}), json!({"apu_ready": null}), json!({})] {
            assert!(!rules.evaluate(&[observation_at(0, payload, &[])]).allowed);
        }
    }

    #[test]
    fn time_since_requires_elapsed_seconds() {
        let history = [observation_at(0, json!({}), &["apu_ready"]), observation_at(6, json!({}), &[])];
        assert!(engine(json!([{"op": "time_since", "tag": "apu_ready", "at_least": 5}])).evaluate(&history).allowed);

        let tight = engine(json!([{"op": "time_since", "tag": "apu_ready", "at_least": 10}])).evaluate(&history);
        assert_eq!(tight, RuleResult::deny("time_since apu_ready 6.0s<10"));
    }

    #[test]
    fn time_since_ignores_latest_observation() {
        let history = [observation_at(0, json!({}), &["apu_ready"])];
        let result = engine(json!([{"op": "time_since", "tag": "apu_ready", "at_least": 1}])).evaluate(&history);
        assert_eq!(result, RuleResult::deny("tag apu_ready never seen"));
    }

    #[test]
    fn no_observations_is_denied() {
        assert_eq!(engine(json!([])).evaluate(&[]), RuleResult::deny("no observations"));
    }

    #[test]
    fn empty_rules_allow() {
        assert!(engine(json!([])).evaluate(&[observation_at(0, json!({"rpm": 0.25}), &[])]).allowed);
    }

    #[test]
    fn first_failing_rule_wins() {
        let rules = engine(json!([
            {"op": "var_gte", "var": "payload.rpm", "value": 0.2},
            {"op": "arg_in_range", "var": "payload.temp", "min": 190, "max": 590},
        ]));
        let result = rules.evaluate(&[observation_at(0, json!({"rpm": 0.15, "temp": 650}), &[])]);
        assert_eq!(result, RuleResult::deny("payload.rpm<0.2"));
    }

    #[test]
    fn misconfigured_rules_fail_with_reason() {
        let observation = [observation_at(0, json!({"rpm": 0.25}), &[])];
        let cases = [
            (json!({"op": "mystery_op", "var": "payload.rpm"}), "unknown op mystery_op"),
            (json!({"op": "var_gte", "var": "payload.rpm"}), "var_gte missing 'value'"),
            (json!({"op": "var_gte", "var": "payload.rpm", "value": "high"}), "var_gte 'value' is not numeric"),
            (json!({"var": "payload.rpm"}), "rule has no 'op'"),
        ];
        for (rule, reason) in cases {
            assert_eq!(engine(json!([rule])).evaluate(&observation), RuleResult::deny(reason));
        }
    }

    #[test]
    fn strict_loading_reports_first_error() {
        let err = GatingEngine::try_from_config(&json!([
            {"op": "flag_true", "var": "x"},
            {"op": "arg_in_range", "var": "x", "min": 1},
        ]))
        .unwrap_err();
        assert_eq!(err, RuleConfigError::MissingParam { op: "arg_in_range", param: "max" });
    }

    #[test]
    fn missing_variable_lists_checked_paths() {
        let result = engine(json!([{"op": "var_gte", "var": "payload.nonexistent_field", "value": 0.2}]))
            .evaluate(&[observation_at(0, json!({"rpm": 0.25}), &[])]);
        let reason = result.reason.unwrap_or_default();
        assert!(reason.contains("missing"));
        assert!(reason.contains("payload.nonexistent_field"));
    }

    #[test]
    fn loads_yaml_rules() {
        let rules = GatingEngine::from_yaml_str("- op: flag_true\n  var: battery_on\n- op: time_since\n  tag: apu_ready\n  at_least: 5\n")
            .unwrap();
        assert_eq!(
            rules.rules(),
            [
                GatingRule::FlagTrue { var: "battery_on".into() },
                GatingRule::TimeSince { tag: "apu_ready".into(), at_least: 5.0 },
            ]
        );
    }

    proptest! {
        #[test]
        fn var_gte_boundary(bound in -1000i32..1000, offset in -5i32..5) {
            let actual = bound + offset;
            let rules = engine(json!([{"op": "var_gte", "var": "rpm", "value": bound}]));
            let result = rules.evaluate(&[observation_at(0, json!({"vars": {"rpm": actual}}), &[])]);
            prop_assert_eq!(result.allowed, actual >= bound);
        }

        #[test]
        fn arg_in_range_boundary(min in -100i32..100, width in 0i32..50, actual in -200i32..200) {
            let max = min + width;
            let rules = engine(json!([{"op": "arg_in_range", "var": "temp", "min": min, "max": max}]));
            let result = rules.evaluate(&[observation_at(0, json!({"vars": {"temp": actual}}), &[])]);
            prop_assert_eq!(result.allowed, min <= actual && actual <= max);
        }

        #[test]
        fn flag_true_matches_truthiness(flag in any::<bool>(), number in -3i64..3) {
            let rules = engine(json!([{"op": "flag_true", "var": "flag"}, {"op": "flag_true", "var": "number"}]));
            let result = rules.evaluate(&[observation_at(0, json!({"vars": {"flag": flag, "number": number}}), &[])]);
            prop_assert_eq!(result.allowed, flag && number != 0);
        }

        #[test]
        fn time_since_boundary(at_least in 0i64..20, elapsed in 0i64..20) {
            let history = [
                observation_at(0, json!({}), &["tag"]),
                observation_at(elapsed, json!({}), &[]),
            ];
            let rules = engine(json!([{"op": "time_since", "tag": "tag", "at_least": at_least}]));
            prop_assert_eq!(rules.evaluate(&history).allowed, elapsed >= at_least);
        }
    }
}
