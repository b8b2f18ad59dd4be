//! coercion.rs
//! Maps a property code to a parsing rule and turns raw driver payloads into typed values.
//! A code with no configured rule falls back to `Raw`; only a parse failure rejects a value.

use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use crate::acquisition::reading::{PropertyCode, RawValue};
use crate::error::CoercionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoercionRule {
    #[serde(alias = "int")]
    Integer,
    Float,
    #[serde(alias = "identity")]
    Raw,
}

impl fmt::Display for CoercionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CoercionRule::Integer => "integer",
            CoercionRule::Float => "float",
            CoercionRule::Raw => "raw",
        })
    }
}

/// Typed value after coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Integer(i64),
    Float(f64),
    Raw(String),
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Integer(v) => write!(f, "{}", v),
            TypedValue::Float(v) => write!(f, "{}", v),
            TypedValue::Raw(s) => f.write_str(s),
        }
    }
}

/// A reading's property code together with its typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercedValue {
    pub property_code: PropertyCode,
    pub value: TypedValue,
}

/// Rules for the standard low-voltage smart meter properties.
pub fn default_rules() -> BTreeMap<PropertyCode, CoercionRule> {
    [
        ("D3", CoercionRule::Integer),
        ("D7", CoercionRule::Integer),
        ("E1", CoercionRule::Integer),
        ("E7", CoercionRule::Integer),
        ("E0", CoercionRule::Float),
        ("E3", CoercionRule::Float),
    ]
    .into_iter()
    .map(|(code, rule)| (PropertyCode::new(code), rule))
    .collect()
}

#[derive(Debug, Clone, Default)]
pub struct CoercionTable {
    rules: HashMap<PropertyCode, CoercionRule>,
}

impl CoercionTable {
    pub fn new<I>(rules: I) -> Self
    where
        I: IntoIterator<Item = (PropertyCode, CoercionRule)>,
    {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// Rule for `code`; lookup miss means `Raw`.
    pub fn rule_for(&self, code: &PropertyCode) -> CoercionRule {
        self.rules.get(code).copied().unwrap_or(CoercionRule::Raw)
    }

    pub fn coerce(&self, code: &PropertyCode, raw: &RawValue) -> Result<CoercedValue, CoercionError> {
        let rule = self.rule_for(code);
        let value = apply(rule, raw).map_err(|reason| CoercionError {
            property_code: code.clone(),
            raw: raw.to_string(),
            rule,
            reason,
        })?;
        Ok(CoercedValue {
            property_code: code.clone(),
            value,
        })
    }
}

fn apply(rule: CoercionRule, raw: &RawValue) -> Result<TypedValue, String> {
    match (rule, raw) {
        (CoercionRule::Raw, _) => Ok(TypedValue::Raw(raw.to_string())),

        (CoercionRule::Integer, RawValue::Integer(v)) => Ok(TypedValue::Integer(*v)),
        (CoercionRule::Integer, RawValue::Float(v)) => {
            if v.is_finite() && v.fract() == 0.0 && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                Ok(TypedValue::Integer(*v as i64))
            } else {
                Err(format!("{} is not integral", v))
            }
        }
        (CoercionRule::Integer, RawValue::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(TypedValue::Integer)
            .map_err(|e| e.to_string()),

        (CoercionRule::Float, RawValue::Integer(v)) => Ok(TypedValue::Float(*v as f64)),
        (CoercionRule::Float, RawValue::Float(v)) => finite(*v),
        (CoercionRule::Float, RawValue::Text(s)) => {
            let v = s.trim().parse::<f64>().map_err(|e| e.to_string())?;
            finite(v)
        }
    }
}

fn finite(v: f64) -> Result<TypedValue, String> {
    if v.is_finite() {
        Ok(TypedValue::Float(v))
    } else {
        Err(format!("{} is not a finite number", v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CoercionTable {
        CoercionTable::new(default_rules())
    }

    #[test]
    fn test_integer_rule_parses_text() {
        let v = table().coerce(&"E7".into(), &"1234".into()).unwrap();
        assert_eq!(v.value, TypedValue::Integer(1234));
        assert_eq!(v.property_code.as_str(), "E7");
    }

    #[test]
    fn test_float_rule_parses_text() {
        let v = table().coerce(&"E0".into(), &"5678.9".into()).unwrap();
        assert_eq!(v.value, TypedValue::Float(5678.9));
        assert_eq!(v.value.to_string(), "5678.9");
    }

    #[test]
    fn test_integer_rule_accepts_integral_float() {
        let v = table().coerce(&"D3".into(), &RawValue::Float(10.0)).unwrap();
        assert_eq!(v.value, TypedValue::Integer(10));
        assert!(table().coerce(&"D3".into(), &RawValue::Float(10.5)).is_err());
    }

    #[test]
    fn test_float_rule_widens_integer() {
        let v = table().coerce(&"E3".into(), &RawValue::Integer(7)).unwrap();
        assert_eq!(v.value, TypedValue::Float(7.0));
    }

    #[test]
    fn test_lookup_miss_falls_back_to_raw() {
        let t = table();
        assert_eq!(t.rule_for(&"EA".into()), CoercionRule::Raw);
        let v = t.coerce(&"EA".into(), &"2026/10/18 12:00:00".into()).unwrap();
        assert_eq!(v.value, TypedValue::Raw("2026/10/18 12:00:00".into()));
    }

    #[test]
    fn test_non_numeric_payload_is_error() {
        let err = table().coerce(&"E7".into(), &"FFFFFFFE?".into()).unwrap_err();
        assert_eq!(err.property_code.as_str(), "E7");
        assert_eq!(err.rule, CoercionRule::Integer);
        assert_eq!(err.raw, "FFFFFFFE?");
    }

    #[test]
    fn test_nan_rejected_for_float() {
        assert!(table().coerce(&"E0".into(), &"NaN".into()).is_err());
        assert!(table().coerce(&"E0".into(), &"inf".into()).is_err());
    }

    #[test]
    fn test_whitespace_trimmed() {
        let v = table().coerce(&"E7".into(), &" 42\n".into()).unwrap();
        assert_eq!(v.value, TypedValue::Integer(42));
    }

    #[test]
    fn test_rule_deserialises_aliases() {
        let rules: BTreeMap<PropertyCode, CoercionRule> =
            serde_yaml::from_str("{E7: int, E0: float, EA: identity, D3: integer}").unwrap();
        assert_eq!(rules[&PropertyCode::new("E7")], CoercionRule::Integer);
        assert_eq!(rules[&PropertyCode::new("EA")], CoercionRule::Raw);
        assert_eq!(rules[&PropertyCode::new("D3")], CoercionRule::Integer);
    }
}
