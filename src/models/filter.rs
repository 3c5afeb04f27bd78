//! Payload filters.
//!
//! Filters are pushed down to the vector store when a query runs, and evaluated
//! locally against returned payloads when applied after fusion. The JSON shape
//! follows the store's own filter syntax:
//!
//! ```json
//! {"must": [{"key": "lang", "match": {"value": "en"}}],
//!  "must_not": [{"key": "year", "range": {"lt": 1990}}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Boolean combination of field conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Condition>,
}

/// A condition on a single payload key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Payload key, dotted for nested objects (`meta.lang`).
    pub key: String,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<Match>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub value: MatchValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchValue {
    Bool(bool),
    Integer(i64),
    Keyword(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
}

impl Range {
    fn contains(&self, x: f64) -> bool {
        self.lt.is_none_or(|b| x < b)
            && self.gt.is_none_or(|b| x > b)
            && self.gte.is_none_or(|b| x >= b)
            && self.lte.is_none_or(|b| x <= b)
    }
}

impl Filter {
    pub fn must(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self {
            must: conditions.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn should(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self {
            should: conditions.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    /// Evaluate the filter against a payload.
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.must.iter().all(|c| c.matches(payload))
            && (self.should.is_empty() || self.should.iter().any(|c| c.matches(payload)))
            && !self.must_not.iter().any(|c| c.matches(payload))
    }
}

impl Condition {
    pub fn keyword(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_match(key, MatchValue::Keyword(value.into()))
    }

    pub fn integer(key: impl Into<String>, value: i64) -> Self {
        Self::with_match(key, MatchValue::Integer(value))
    }

    pub fn boolean(key: impl Into<String>, value: bool) -> Self {
        Self::with_match(key, MatchValue::Bool(value))
    }

    pub fn range(key: impl Into<String>, range: Range) -> Self {
        Self {
            key: key.into(),
            matches: None,
            range: Some(range),
        }
    }

    fn with_match(key: impl Into<String>, value: MatchValue) -> Self {
        Self {
            key: key.into(),
            matches: Some(Match { value }),
            range: None,
        }
    }

    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        let Some(value) = lookup(payload, &self.key) else {
            return false;
        };
        let match_ok = self
            .matches
            .as_ref()
            .is_none_or(|m| any_element(value, |v| match_value(&m.value, v)));
        let range_ok = self.range.as_ref().is_none_or(|r| {
            any_element(value, |v| v.as_f64().is_some_and(|x| r.contains(x)))
        });
        match_ok && range_ok
    }
}

fn lookup<'a>(payload: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = payload.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

// Array payload values match when any element matches.
fn any_element(value: &Value, pred: impl Fn(&Value) -> bool) -> bool {
    match value {
        Value::Array(items) => items.iter().any(pred),
        other => pred(other),
    }
}

fn match_value(expected: &MatchValue, actual: &Value) -> bool {
    match (expected, actual) {
        (MatchValue::Keyword(s), Value::String(a)) => s == a,
        (MatchValue::Integer(i), Value::Number(n)) => n.as_i64() == Some(*i),
        (MatchValue::Bool(b), Value::Bool(a)) => b == a,
        _ => false,
    }
}
