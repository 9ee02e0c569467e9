//! Stable variables derived from raw telemetry.
//!
//! A rule set maps each variable name to either a literal or an expression
//! in a small, closed language over four namespaces:
//!
//! | Namespace      | Source                                   |
//! |----------------|------------------------------------------|
//! | `bios`         | decoded DCS-BIOS controls                |
//! | `lo`           | Lua export values                        |
//! | `cockpit_args` | raw cockpit arguments                    |
//! | `vars`         | variables already resolved in this pass  |
//!
//! Rules are evaluated in declaration order, so a rule may read any variable
//! declared above it but never one declared below.
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use simtutor::{ControlValue, TelemetryFrame, Value};
//! use simtutor::vars::VarResolver;
//!
//! let resolver = VarResolver::from_yaml_str(
//!     "vars:\n  battery_on: bios.BATTERY_POWER == 1\n  power_available: derived(vars.battery_on)\n",
//! )?;
//!
//! let frame = TelemetryFrame::new(1, 0.0, "dcs_bios")
//!     .with_bios(BTreeMap::from([("BATTERY_POWER".to_string(), ControlValue::Integer(1))]));
//! let vars = resolver.resolve(&frame)?;
//! assert_eq!(vars["power_available"], Value::Bool(true));
//! # Ok::<(), simtutor::TutorError>(())
//! ```

mod expr;
mod lexer;
mod parser;

use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::types::{TelemetryFrame, Value};
use crate::{Result, ResolverError, TutorError};

pub use expr::{BinOp, BoolOp, CompareOp, Expr, Namespace, Scope, UnaryOp};

/// One entry of a rule set.
#[derive(Debug, Clone, PartialEq)]
pub enum VarRule {
    Literal(Value),
    Expression { source: String, tree: Expr },
}

impl VarRule {
    /// Parse `source` as an expression rule.
    pub fn expression(source: &str) -> std::result::Result<Self, ResolverError> {
        let tree = parser::parse(source.trim())?;
        Ok(VarRule::Expression { source: source.to_string(), tree })
    }
}

/// Ordered `name → rule` mapping, parsed once at load time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableRuleSet {
    rules: IndexMap<String, VarRule>,
}

impl VariableRuleSet {
    /// Build from already-typed entries; text values are parsed as expressions.
    pub fn from_entries<I, K>(entries: I) -> std::result::Result<Self, ResolverError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut rules = IndexMap::new();
        for (name, value) in entries {
            let rule = match value {
                Value::Text(source) => VarRule::expression(&source)?,
                other => VarRule::Literal(other),
            };
            rules.insert(name.into(), rule);
        }
        Ok(Self { rules })
    }

    /// Parse a `telemetry_map.yaml` document with a top-level `vars` mapping.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let document: serde_yaml_ng::Value = serde_yaml_ng::from_str(text)
            .map_err(|e| TutorError::parse_error("telemetry_map", e.to_string()))?;
        let vars = match document.get("vars") {
            Some(vars) if vars.is_mapping() => vars.clone(),
            _ => return Err(ResolverError::MissingVars.into()),
        };
        let entries: IndexMap<String, Value> = serde_yaml_ng::from_value(vars)
            .map_err(|e| TutorError::parse_error("telemetry_map vars", e.to_string()))?;
        Ok(Self::from_entries(entries)?)
    }

    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| TutorError::file_error(path, e))?;
        let rules = Self::from_yaml_str(&text)?;
        info!(path = %path.display(), rules = rules.len(), "Loaded variable rules");
        Ok(rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&VarRule> {
        self.rules.get(name)
    }
}

/// Evaluates a [`VariableRuleSet`] against telemetry frames.
#[derive(Debug, Clone, Default)]
pub struct VarResolver {
    rules: VariableRuleSet,
}

/// Namespaces visible to an expression while a frame is resolved.
struct FrameScope<'a> {
    frame: &'a TelemetryFrame,
    resolved: &'a BTreeMap<String, Value>,
}

impl Scope for FrameScope<'_> {
    fn lookup(&self, namespace: Namespace, key: &str) -> Value {
        match namespace {
            Namespace::Bios => self.frame.bios.get(key).map(Value::from).unwrap_or_default(),
            Namespace::Lo => self.frame.lo.get(key).cloned().unwrap_or_default(),
            Namespace::CockpitArgs => self.frame.cockpit_args.get(key).cloned().unwrap_or_default(),
            Namespace::Vars => self.resolved.get(key).cloned().unwrap_or_default(),
        }
    }
}

impl VarResolver {
    pub fn new(rules: VariableRuleSet) -> Self {
        Self { rules }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        VariableRuleSet::from_yaml_str(text).map(Self::new)
    }

    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self> {
        VariableRuleSet::from_yaml_path(path).map(Self::new)
    }

    pub fn rules(&self) -> &VariableRuleSet {
        &self.rules
    }

    /// Resolve every rule against `frame`.
    ///
    /// Starts from the variables already on the frame; each rule sees the ones
    /// resolved before it and overrides any prior value of the same name.
    pub fn resolve(&self, frame: &TelemetryFrame) -> std::result::Result<BTreeMap<String, Value>, ResolverError> {
        let mut resolved = frame.vars.clone();
        for (name, rule) in &self.rules.rules {
            let value = match rule {
                VarRule::Literal(value) => value.clone(),
                VarRule::Expression { tree, .. } => {
                    let scope = FrameScope { frame, resolved: &resolved };
                    tree.evaluate(&scope)
                        .map_err(|details| ResolverError::Evaluation { var: name.clone(), details })?
                }
            };
            resolved.insert(name.clone(), value);
        }
        debug!(seq = frame.seq, vars = resolved.len(), "Resolved variables");
        Ok(resolved)
    }

    /// Resolve and store the result on the frame.
    pub fn apply(&self, mut frame: TelemetryFrame) -> std::result::Result<TelemetryFrame, ResolverError> {
        frame.vars = self.resolve(&frame)?;
        Ok(frame)
    }
}
