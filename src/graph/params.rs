//! Parameter schemas for node operations.
//!
//! Values are plain `serde_json::Value`s so that configuration documents and
//! context metadata can feed parameters without conversion.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Parameter values keyed by parameter name.
pub type Parameters = BTreeMap<String, Value>;

/// The JSON shape a parameter value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Any,
    Bool,
    Integer,
    /// Any JSON number, integral or not.
    Number,
    Text,
    Array,
    Object,
}

impl ParamKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::Any => true,
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Text => value.is_string(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }

    fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(n) if n.is_f64() => "number",
            Value::Number(_) => "integer",
            Value::String(_) => "text",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// Declaration of a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    /// Inclusive numeric bounds, only checked for numeric values.
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ParamSpec {
    /// A required parameter of the given kind.
    pub fn new(kind: ParamKind) -> Self {
        Self { kind, required: true, default: None, min: None, max: None }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Supplies a fallback value; a parameter with a default is never missing.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self.required = false;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    fn check(&self, name: &str, value: &Value) -> Result<(), ParameterSchemaError> {
        if !self.kind.accepts(value) {
            return Err(ParameterSchemaError::Mistyped {
                name: name.to_string(),
                expected: self.kind,
                actual: ParamKind::describe(value).to_string(),
            });
        }
        if let Some(v) = value.as_f64() {
            let below = self.min.is_some_and(|min| v < min);
            let above = self.max.is_some_and(|max| v > max);
            if below || above {
                return Err(ParameterSchemaError::OutOfRange {
                    name: name.to_string(),
                    value: v,
                    min: self.min,
                    max: self.max,
                });
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterSchemaError {
    #[error("Missing required parameter '{name}'")]
    Missing { name: String },
    #[error("Parameter '{name}' expects {expected:?}, got {actual}")]
    Mistyped { name: String, expected: ParamKind, actual: String },
    #[error("Parameter '{name}' = {value} is outside [{}, {}]", fmt_bound(.min), fmt_bound(.max))]
    OutOfRange { name: String, value: f64, min: Option<f64>, max: Option<f64> },
    #[error("Unknown parameter '{name}'")]
    Unknown { name: String },
}

fn fmt_bound(bound: &Option<f64>) -> String {
    bound.map_or_else(|| "..".to_string(), |b| b.to_string())
}

/// Parameter name -> declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    specs: BTreeMap<String, ParamSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self { Self::default() }
    pub fn insert(&mut self, name: impl Into<String>, spec: ParamSpec) { self.specs.insert(name.into(), spec); }
    pub fn get(&self, name: &str) -> Option<&ParamSpec> { self.specs.get(name) }
    pub fn names(&self) -> impl Iterator<Item = &str> { self.specs.keys().map(String::as_str) }
    pub fn len(&self) -> usize { self.specs.len() }
    pub fn is_empty(&self) -> bool { self.specs.is_empty() }

    /// Strict check: every required parameter present, every value well-typed
    /// and within bounds, no undeclared names.
    pub fn validate(&self, values: &Parameters) -> Result<(), ParameterSchemaError> {
        self.validate_configured(values)?;
        for (name, spec) in &self.specs {
            if spec.required && !values.contains_key(name) {
                return Err(ParameterSchemaError::Missing { name: name.clone() });
            }
        }
        Ok(())
    }

    /// Assembly-time check of configured values only. Missing parameters are
    /// tolerated because they may still be resolved from the input context.
    pub fn validate_configured(&self, values: &Parameters) -> Result<(), ParameterSchemaError> {
        for (name, value) in values {
            match self.specs.get(name) {
                Some(spec) => spec.check(name, value)?,
                None => return Err(ParameterSchemaError::Unknown { name: name.clone() }),
            }
        }
        Ok(())
    }

    /// Resolves the effective parameter set for one invocation.
    ///
    /// Precedence: configured value, then the context metadata entry with the
    /// parameter's name, then the declared default. Configured names outside
    /// the schema are carried along so that `validate` reports them.
    pub fn resolve(&self, configured: &Parameters, context: Option<&BTreeMap<String, Value>>) -> Parameters {
        let mut resolved = configured.clone();
        for (name, spec) in &self.specs {
            if resolved.contains_key(name) {
                continue;
            }
            let from_context = context.and_then(|meta| meta.get(name));
            if let Some(value) = from_context.or(spec.default.as_ref()) {
                resolved.insert(name.clone(), value.clone());
            }
        }
        resolved
    }
}
