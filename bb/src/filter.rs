//! Field filters evaluated against feed payloads

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::MatchFault;

/// Comparison applied by a [`Filter`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// `value` is a bool: whether the field must be present
    Exists,
    /// `value` is a regex the string field must match
    Matches,
}

/// Operand of a filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// A predicate on one payload field, addressed by a dot-separated path
///
/// A `matches` pattern is compiled once, when the filter is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawFilter", into = "RawFilter")]
pub struct Filter {
    field: String,
    op: FilterOp,
    value: FieldValue,
    pattern: Option<Result<Regex, String>>,
}

/// Wire form of a [`Filter`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawFilter {
    field: String,
    op: FilterOp,
    value: FieldValue,
}

impl From<RawFilter> for Filter {
    fn from(raw: RawFilter) -> Self {
        Self::new(raw.field, raw.op, raw.value)
    }
}

impl From<Filter> for RawFilter {
    fn from(filter: Filter) -> Self {
        Self {
            field: filter.field,
            op: filter.op,
            value: filter.value,
        }
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.op == other.op && self.value == other.value
    }
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<FieldValue>) -> Self {
        let value = value.into();
        let pattern = match (op, &value) {
            (FilterOp::Matches, FieldValue::String(pattern)) => {
                Some(Regex::new(pattern).map_err(|e| format!("invalid pattern: {}", e)))
            }
            _ => None,
        };
        Self {
            field: field.into(),
            op,
            value,
            pattern,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn op(&self) -> FilterOp {
        self.op
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Exists, true)
    }

    pub fn matches(field: impl Into<String>, pattern: &str) -> Self {
        Self::new(field, FilterOp::Matches, pattern)
    }

    /// Evaluate the filter against a payload
    ///
    /// A missing field is a non-match. Structural or type problems that make the
    /// question unanswerable are reported as a [`MatchFault`].
    pub fn evaluate(&self, payload: &Value) -> Result<bool, MatchFault> {
        let found = lookup(payload, &self.field)?;
        debug!(field = %self.field, op = ?self.op, found = found.is_some(), "Filter::evaluate");

        match self.op {
            FilterOp::Exists => match &self.value {
                FieldValue::Bool(expected) => Ok(found.is_some() == *expected),
                _ => Err(self.fault("exists expects a boolean operand")),
            },
            FilterOp::Eq => Ok(found.is_some_and(|v| self.equals(v))),
            FilterOp::Ne => Ok(found.is_some_and(|v| !self.equals(v))),
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                let Some(actual) = found else {
                    return Ok(false);
                };
                let ordering = self.compare(actual)?;
                Ok(match self.op {
                    FilterOp::Gt => ordering.is_gt(),
                    FilterOp::Gte => ordering.is_ge(),
                    FilterOp::Lt => ordering.is_lt(),
                    _ => ordering.is_le(),
                })
            }
            FilterOp::Matches => {
                let re = match &self.pattern {
                    Some(Ok(re)) => re,
                    Some(Err(reason)) => return Err(self.fault(reason.as_str())),
                    None => return Err(self.fault("matches expects a string pattern")),
                };
                match found {
                    None => Ok(false),
                    Some(Value::String(s)) => Ok(re.is_match(s)),
                    Some(other) => Err(self.fault(format!("matches on non-string {}", kind(other)))),
                }
            }
        }
    }

    fn equals(&self, actual: &Value) -> bool {
        match (&self.value, actual) {
            (FieldValue::Null, Value::Null) => true,
            (FieldValue::Bool(a), Value::Bool(b)) => a == b,
            (FieldValue::Number(a), Value::Number(b)) => b.as_f64() == Some(*a),
            (FieldValue::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }

    fn compare(&self, actual: &Value) -> Result<std::cmp::Ordering, MatchFault> {
        match (actual, &self.value) {
            (Value::Number(a), FieldValue::Number(b)) => {
                let a = a.as_f64().ok_or_else(|| self.fault("number out of range"))?;
                a.partial_cmp(b).ok_or_else(|| self.fault("incomparable numbers"))
            }
            (Value::Number(_), _) => Err(self.fault("ordering needs a numeric operand")),
            (other, _) => Err(self.fault(format!("cannot order {}", kind(other)))),
        }
    }

    fn fault(&self, reason: impl Into<String>) -> MatchFault {
        MatchFault::new(&self.field, reason)
    }
}

/// Walk a dot-separated path; `Ok(None)` when any segment is absent
fn lookup<'a>(payload: &'a Value, path: &str) -> Result<Option<&'a Value>, MatchFault> {
    let mut current = payload;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => next,
                None => return Ok(None),
            },
            Value::Array(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| MatchFault::new(path, format!("non-numeric index '{}' into array", segment)))?;
                match items.get(index) {
                    Some(next) => next,
                    None => return Ok(None),
                }
            }
            Value::Null => return Ok(None),
            other => {
                return Err(MatchFault::new(
                    path,
                    format!("cannot traverse '{}' into {}", segment, kind(other)),
                ));
            }
        };
    }
    Ok(Some(current))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
