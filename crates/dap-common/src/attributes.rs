//! Attribute values from DAS and DMR documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attribute mapping of a dataset or variable.
pub type Attributes = BTreeMap<String, AttrValue>;

/// A single attribute value. Containers nest arbitrarily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<AttrValue>),
    Map(Attributes),
}

impl AttrValue {
    pub fn as_map(&self) -> Option<&Attributes> {
        match self {
            AttrValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Collapse a one-element list into its element.
    pub fn collapse(values: Vec<AttrValue>) -> AttrValue {
        if values.len() == 1 {
            values.into_iter().next().unwrap_or(AttrValue::List(Vec::new()))
        } else {
            AttrValue::List(values)
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        AttrValue::Float(f)
    }
}

impl From<Attributes> for AttrValue {
    fn from(m: Attributes) -> Self {
        AttrValue::Map(m)
    }
}

/// Merge `from` into `into`, overwriting existing keys.
pub fn merge(into: &mut Attributes, from: Attributes) {
    into.extend(from);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_single_value() {
        assert_eq!(AttrValue::collapse(vec![AttrValue::Int(3)]), AttrValue::Int(3));
        assert_eq!(
            AttrValue::collapse(vec![AttrValue::Int(1), AttrValue::Int(2)]),
            AttrValue::List(vec![AttrValue::Int(1), AttrValue::Int(2)])
        );
    }

    #[test]
    fn test_serializes_untagged() {
        let mut attrs = Attributes::new();
        attrs.insert("units".into(), "degC".into());
        attrs.insert(
            "valid_range".into(),
            AttrValue::List(vec![(-1.0_f64).into(), 40.0_f64.into()]),
        );
        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"units":"degC","valid_range":[-1.0,40.0]}"#);
    }
}
