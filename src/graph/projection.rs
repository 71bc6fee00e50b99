//! Typed edge projections.
//!
//! A projection is a set of named sub-traversals rooted at one edge,
//! answered by the graph in a single round-trip. Rules describe what they
//! need as a small step program; the websocket client compiles it to a
//! Gremlin script, the test double interprets it directly.

use serde_json::Value;
use std::collections::HashMap;

use super::protocol::{unwrap_graphson, value_to_id};

/// One traversal step. The vocabulary covers exactly what the fraud
/// rules traverse; anything new gets a new variant, not a raw script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Source vertex of the projected edge.
    OutV,
    /// Destination vertex of the projected edge.
    InV,
    /// Both endpoints of the projected edge.
    BothV,
    /// Upstream neighbours over the labelled edge.
    In(&'static str),
    /// Downstream neighbours over the labelled edge.
    Out(&'static str),
    /// Neighbours in either direction over the labelled edge.
    Both(&'static str),
    /// Keep elements whose boolean property matches.
    HasBool(&'static str, bool),
    /// Map elements to their ids.
    Id,
    Dedup,
    /// Fold into a list; a folded bucket always yields a (possibly
    /// empty) id set rather than a single optional id.
    Fold,
}

impl Step {
    fn to_gremlin(self) -> String {
        match self {
            Step::OutV => "outV()".to_string(),
            Step::InV => "inV()".to_string(),
            Step::BothV => "bothV()".to_string(),
            Step::In(label) => format!("in('{label}')"),
            Step::Out(label) => format!("out('{label}')"),
            Step::Both(label) => format!("both('{label}')"),
            Step::HasBool(key, value) => format!("has('{key}', {value})"),
            Step::Id => "id()".to_string(),
            Step::Dedup => "dedup()".to_string(),
            Step::Fold => "fold()".to_string(),
        }
    }
}

/// A named sub-traversal within a projection.
#[derive(Debug, Clone)]
pub struct ProjectionBucket {
    pub name: &'static str,
    pub steps: Vec<Step>,
}

impl ProjectionBucket {
    pub fn new(name: &'static str, steps: Vec<Step>) -> Self {
        Self { name, steps }
    }

    pub fn is_folded(&self) -> bool {
        self.steps.last() == Some(&Step::Fold)
    }
}

/// A complete projection over one edge.
#[derive(Debug, Clone)]
pub struct Projection {
    pub buckets: Vec<ProjectionBucket>,
}

impl Projection {
    pub fn new(buckets: Vec<ProjectionBucket>) -> Self {
        Self { buckets }
    }

    /// Compile to the `.project(..).by(..)` tail of a Gremlin script.
    /// The caller supplies the rooted head (`g.E(edgeId)`).
    pub fn to_gremlin_tail(&self) -> String {
        let names = self
            .buckets
            .iter()
            .map(|b| format!("'{}'", b.name))
            .collect::<Vec<_>>()
            .join(", ");

        let mut script = format!(".project({names})");
        for bucket in &self.buckets {
            let body = bucket
                .steps
                .iter()
                .map(|s| s.to_gremlin())
                .collect::<Vec<_>>()
                .join(".");
            script.push_str(&format!(".by(__.{body})"));
        }
        script
    }

    pub fn bucket(&self, name: &str) -> Option<&ProjectionBucket> {
        self.buckets.iter().find(|b| b.name == name)
    }
}

/// Result of one bucket. A missing or null bucket is `Absent`, never an
/// error; a folded bucket is always `Many` (possibly empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionValue {
    Absent,
    One(String),
    Many(Vec<String>),
}

impl ProjectionValue {
    /// Flatten to an id list regardless of arity.
    pub fn ids(&self) -> Vec<String> {
        match self {
            Self::Absent => Vec::new(),
            Self::One(id) => vec![id.clone()],
            Self::Many(ids) => ids.clone(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Absent => None,
            Self::One(id) => Some(id),
            Self::Many(ids) => ids.first().map(String::as_str),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Absent) || matches!(self, Self::Many(v) if v.is_empty())
    }
}

/// Parsed projection reply, keyed by bucket name.
#[derive(Debug, Clone, Default)]
pub struct ProjectionResult {
    values: HashMap<String, ProjectionValue>,
}

impl ProjectionResult {
    pub fn insert(&mut self, name: &str, value: ProjectionValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> ProjectionValue {
        self.values.get(name).cloned().unwrap_or(ProjectionValue::Absent)
    }

    /// Parse the single row a projected edge traversal returns.
    pub fn from_row(projection: &Projection, row: Value) -> Self {
        let row = unwrap_graphson(row);
        let mut result = Self::default();

        let map = match row {
            Value::Object(map) => map,
            _ => return result,
        };

        for bucket in &projection.buckets {
            let value = match map.get(bucket.name) {
                None | Some(Value::Null) => {
                    if bucket.is_folded() {
                        ProjectionValue::Many(Vec::new())
                    } else {
                        ProjectionValue::Absent
                    }
                }
                Some(Value::Array(items)) => ProjectionValue::Many(
                    items.iter().filter_map(value_to_id).collect(),
                ),
                Some(scalar) => match value_to_id(scalar) {
                    Some(id) => ProjectionValue::One(id),
                    None => ProjectionValue::Absent,
                },
            };
            result.insert(bucket.name, value);
        }

        result
    }
}
