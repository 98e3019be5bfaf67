//! SNS filter-policy evaluation.
//!
//! A policy is a JSON object mapping attribute names to arrays of rules; a
//! message matches when every policy key has at least one matching rule.
//! Policies are compiled once at subscribe time so publishes only walk the
//! parsed rule tree.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl NumOp {
    fn parse(op: &str) -> Option<NumOp> {
        match op {
            "=" => Some(NumOp::Eq),
            "<" => Some(NumOp::Lt),
            "<=" => Some(NumOp::Le),
            ">" => Some(NumOp::Gt),
            ">=" => Some(NumOp::Ge),
            _ => None,
        }
    }

    fn eval(self, value: f64, bound: f64) -> bool {
        match self {
            NumOp::Eq => value == bound,
            NumOp::Lt => value < bound,
            NumOp::Le => value <= bound,
            NumOp::Gt => value > bound,
            NumOp::Ge => value >= bound,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cidr {
    V4 { net: u32, prefix: u8 },
    V6 { net: u128, prefix: u8 },
}

impl Cidr {
    fn parse(s: &str) -> Option<Cidr> {
        let (addr, prefix) = s.split_once('/')?;
        let prefix: u8 = prefix.parse().ok()?;
        if let Ok(v4) = addr.parse::<Ipv4Addr>() {
            if prefix > 32 {
                return None;
            }
            Some(Cidr::V4 {
                net: u32::from(v4),
                prefix,
            })
        } else if let Ok(v6) = addr.parse::<Ipv6Addr>() {
            if prefix > 128 {
                return None;
            }
            Some(Cidr::V6 {
                net: u128::from(v6),
                prefix,
            })
        } else {
            None
        }
    }

    fn contains(&self, value: &str) -> bool {
        match self {
            Cidr::V4 { net, prefix } => {
                let Ok(addr) = value.parse::<Ipv4Addr>() else {
                    return false;
                };
                let mask = if *prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - prefix)
                };
                (u32::from(addr) & mask) == (net & mask)
            }
            Cidr::V6 { net, prefix } => {
                let Ok(addr) = value.parse::<Ipv6Addr>() else {
                    return false;
                };
                let mask = if *prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - prefix)
                };
                (u128::from(addr) & mask) == (net & mask)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    ExactString(String),
    ExactNumber(f64),
    Exists(bool),
    Prefix(String),
    Suffix(String),
    EqualsIgnoreCase(String),
    AnythingBut(Vec<Primitive>),
    Numeric(Vec<(NumOp, f64)>),
    Cidr(Cidr),
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("filter policy is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("filter policy must be a JSON object")]
    NotAnObject,
    #[error("rules for \"{0}\" must be an array")]
    RulesNotArray(String),
    #[error("unsupported rule for \"{0}\": {1}")]
    BadRule(String, String),
}

/// A compiled policy: each key must be satisfied by at least one of its rules.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterPolicy {
    keys: Vec<(String, Vec<Rule>)>,
}

impl FilterPolicy {
    pub fn parse(source: &str) -> Result<FilterPolicy, FilterError> {
        let value: Value = serde_json::from_str(source)?;
        let Value::Object(map) = value else {
            return Err(FilterError::NotAnObject);
        };

        let mut keys = Vec::with_capacity(map.len());
        for (name, rules_value) in map {
            let Value::Array(raw_rules) = rules_value else {
                return Err(FilterError::RulesNotArray(name));
            };
            let mut rules = Vec::with_capacity(raw_rules.len());
            for raw in raw_rules {
                rules.push(compile_rule(&name, &raw)?);
            }
            keys.push((name, rules));
        }
        Ok(FilterPolicy { keys })
    }

    /// Every policy key must have at least one rule matching the message's
    /// value for that key; `exists: false` matches absence.
    pub fn matches(&self, source: &AttributeSource) -> bool {
        self.keys.iter().all(|(name, rules)| {
            let value = source.get(name);
            rules.iter().any(|rule| rule_matches(rule, value))
        })
    }
}

fn compile_rule(key: &str, raw: &Value) -> Result<Rule, FilterError> {
    match raw {
        Value::String(s) => Ok(Rule::ExactString(s.clone())),
        Value::Number(n) => n
            .as_f64()
            .map(Rule::ExactNumber)
            .ok_or_else(|| FilterError::BadRule(key.into(), raw.to_string())),
        Value::Object(obj) if obj.len() == 1 => {
            let (op, arg) = obj.iter().next().unwrap();
            match (op.as_str(), arg) {
                ("exists", Value::Bool(b)) => Ok(Rule::Exists(*b)),
                ("prefix", Value::String(s)) => Ok(Rule::Prefix(s.clone())),
                ("suffix", Value::String(s)) => Ok(Rule::Suffix(s.clone())),
                ("equals-ignore-case", Value::String(s)) => {
                    Ok(Rule::EqualsIgnoreCase(s.clone()))
                }
                ("anything-but", arg) => {
                    let listed = match arg {
                        Value::Array(items) => items.iter().map(primitive).collect(),
                        single => primitive(single).map(|p| vec![p]),
                    }
                    .ok_or_else(|| FilterError::BadRule(key.into(), raw.to_string()))?;
                    Ok(Rule::AnythingBut(listed))
                }
                ("numeric", Value::Array(items)) => {
                    if items.is_empty() || items.len() % 2 != 0 || items.len() > 4 {
                        return Err(FilterError::BadRule(key.into(), raw.to_string()));
                    }
                    let mut bounds = Vec::with_capacity(items.len() / 2);
                    for pair in items.chunks(2) {
                        let op = pair[0]
                            .as_str()
                            .and_then(NumOp::parse)
                            .ok_or_else(|| FilterError::BadRule(key.into(), raw.to_string()))?;
                        let bound = pair[1]
                            .as_f64()
                            .ok_or_else(|| FilterError::BadRule(key.into(), raw.to_string()))?;
                        bounds.push((op, bound));
                    }
                    Ok(Rule::Numeric(bounds))
                }
                ("cidr", Value::String(s)) => Cidr::parse(s)
                    .map(Rule::Cidr)
                    .ok_or_else(|| FilterError::BadRule(key.into(), s.clone())),
                _ => Err(FilterError::BadRule(key.into(), raw.to_string())),
            }
        }
        _ => Err(FilterError::BadRule(key.into(), raw.to_string())),
    }
}

fn primitive(value: &Value) -> Option<Primitive> {
    match value {
        Value::String(s) => Some(Primitive::Str(s.clone())),
        Value::Number(n) => n.as_f64().map(Primitive::Num),
        Value::Bool(b) => Some(Primitive::Bool(*b)),
        _ => None,
    }
}

/// A message-side value a rule is checked against. Arrays (from
/// `String.Array` attributes or JSON bodies) match when any element does.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Arr(Vec<FieldValue>),
}

impl FieldValue {
    fn from_json(value: &Value) -> Option<FieldValue> {
        match value {
            Value::String(s) => Some(FieldValue::Str(s.clone())),
            Value::Number(n) => n.as_f64().map(FieldValue::Num),
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Array(items) => Some(FieldValue::Arr(
                items.iter().filter_map(FieldValue::from_json).collect(),
            )),
            _ => None,
        }
    }
}

/// Flat attribute map a policy is evaluated against: either the message's
/// attributes or the top-level object of a JSON body.
#[derive(Debug, Default)]
pub struct AttributeSource {
    fields: HashMap<String, FieldValue>,
}

impl AttributeSource {
    pub fn from_attributes<'a, I>(attrs: I) -> AttributeSource
    where
        I: IntoIterator<Item = (&'a str, &'a str, Option<&'a str>)>,
    {
        // (name, data type, string value) triples from the publish request.
        let mut fields = HashMap::new();
        for (name, data_type, value) in attrs {
            let Some(value) = value else { continue };
            let field = match data_type {
                "Number" => value
                    .parse::<f64>()
                    .map(FieldValue::Num)
                    .unwrap_or_else(|_| FieldValue::Str(value.to_string())),
                "String.Array" => serde_json::from_str::<Value>(value)
                    .ok()
                    .and_then(|v| FieldValue::from_json(&v))
                    .unwrap_or_else(|| FieldValue::Str(value.to_string())),
                _ => FieldValue::Str(value.to_string()),
            };
            fields.insert(name.to_string(), field);
        }
        AttributeSource { fields }
    }

    /// Body scope: the top-level object of the (JSON) message body. A body
    /// that is not a JSON object yields an empty source, so only
    /// `exists: false` rules can match.
    pub fn from_body(body: &str) -> AttributeSource {
        let mut fields = HashMap::new();
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
            for (k, v) in map {
                if let Some(field) = FieldValue::from_json(&v) {
                    fields.insert(k, field);
                }
            }
        }
        AttributeSource { fields }
    }

    fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

fn rule_matches(rule: &Rule, value: Option<&FieldValue>) -> bool {
    match (rule, value) {
        (Rule::Exists(expected), value) => *expected == value.is_some(),
        (_, None) => false,
        (rule, Some(value)) => field_matches(rule, value),
    }
}

fn field_matches(rule: &Rule, value: &FieldValue) -> bool {
    if let FieldValue::Arr(items) = value {
        return items.iter().any(|item| field_matches(rule, item));
    }
    match rule {
        Rule::ExactString(expected) => matches!(value, FieldValue::Str(s) if s == expected),
        Rule::ExactNumber(expected) => matches!(value, FieldValue::Num(n) if n == expected),
        Rule::Exists(_) => true,
        Rule::Prefix(prefix) => matches!(value, FieldValue::Str(s) if s.starts_with(prefix)),
        Rule::Suffix(suffix) => matches!(value, FieldValue::Str(s) if s.ends_with(suffix)),
        Rule::EqualsIgnoreCase(expected) => {
            matches!(value, FieldValue::Str(s) if s.eq_ignore_ascii_case(expected))
        }
        Rule::AnythingBut(listed) => !listed.iter().any(|p| primitive_eq(p, value)),
        Rule::Numeric(bounds) => match value {
            FieldValue::Num(n) => bounds.iter().all(|(op, bound)| op.eval(*n, *bound)),
            _ => false,
        },
        Rule::Cidr(cidr) => matches!(value, FieldValue::Str(s) if cidr.contains(s)),
    }
}

fn primitive_eq(p: &Primitive, value: &FieldValue) -> bool {
    match (p, value) {
        (Primitive::Str(a), FieldValue::Str(b)) => a == b,
        (Primitive::Num(a), FieldValue::Num(b)) => a == b,
        (Primitive::Bool(a), FieldValue::Bool(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str, &str)]) -> AttributeSource {
        AttributeSource::from_attributes(
            pairs.iter().map(|(n, t, v)| (*n, *t, Some(*v))),
        )
    }

    fn policy(json: &str) -> FilterPolicy {
        FilterPolicy::parse(json).unwrap()
    }

    #[test]
    fn exact_string_match() {
        let p = policy(r#"{"eventType": ["order.created"]}"#);
        assert!(p.matches(&source(&[("eventType", "String", "order.created")])));
        assert!(!p.matches(&source(&[("eventType", "String", "order.updated")])));
        assert!(!p.matches(&source(&[])));
    }

    #[test]
    fn any_rule_in_list_suffices() {
        let p = policy(r#"{"color": ["red", "blue"]}"#);
        assert!(p.matches(&source(&[("color", "String", "blue")])));
        assert!(!p.matches(&source(&[("color", "String", "green")])));
    }

    #[test]
    fn all_keys_must_match() {
        let p = policy(r#"{"a": ["1"], "b": ["2"]}"#);
        assert!(p.matches(&source(&[("a", "String", "1"), ("b", "String", "2")])));
        assert!(!p.matches(&source(&[("a", "String", "1")])));
    }

    #[test]
    fn numeric_exact_and_ranges() {
        let p = policy(r#"{"price": [42]}"#);
        assert!(p.matches(&source(&[("price", "Number", "42")])));
        assert!(!p.matches(&source(&[("price", "Number", "41")])));
        // A string-typed "42" is not a numeric match.
        assert!(!p.matches(&source(&[("price", "String", "42")])));

        let p = policy(r#"{"price": [{"numeric": [">=", 10, "<", 20]}]}"#);
        assert!(p.matches(&source(&[("price", "Number", "10")])));
        assert!(p.matches(&source(&[("price", "Number", "19.9")])));
        assert!(!p.matches(&source(&[("price", "Number", "20")])));
        assert!(!p.matches(&source(&[("price", "Number", "9")])));
    }

    #[test]
    fn exists_rules() {
        let p = policy(r#"{"a": [{"exists": true}]}"#);
        assert!(p.matches(&source(&[("a", "String", "anything")])));
        assert!(!p.matches(&source(&[])));

        let p = policy(r#"{"a": [{"exists": false}]}"#);
        assert!(p.matches(&source(&[])));
        assert!(!p.matches(&source(&[("a", "String", "x")])));
    }

    #[test]
    fn prefix_suffix_and_case_insensitive() {
        let p = policy(r#"{"name": [{"prefix": "ord"}]}"#);
        assert!(p.matches(&source(&[("name", "String", "order")])));
        assert!(!p.matches(&source(&[("name", "String", "disorder")])));

        let p = policy(r#"{"name": [{"suffix": "der"}]}"#);
        assert!(p.matches(&source(&[("name", "String", "order")])));

        let p = policy(r#"{"name": [{"equals-ignore-case": "Order"}]}"#);
        assert!(p.matches(&source(&[("name", "String", "oRDer")])));
        assert!(!p.matches(&source(&[("name", "String", "orders")])));
    }

    #[test]
    fn anything_but_scalar_and_array() {
        let p = policy(r#"{"state": [{"anything-but": "failed"}]}"#);
        assert!(p.matches(&source(&[("state", "String", "ok")])));
        assert!(!p.matches(&source(&[("state", "String", "failed")])));
        // Absent attribute never matches a non-exists rule.
        assert!(!p.matches(&source(&[])));

        let p = policy(r#"{"code": [{"anything-but": [400, 500]}]}"#);
        assert!(p.matches(&source(&[("code", "Number", "200")])));
        assert!(!p.matches(&source(&[("code", "Number", "500")])));
    }

    #[test]
    fn cidr_v4() {
        let p = policy(r#"{"ip": [{"cidr": "10.0.0.0/24"}]}"#);
        assert!(p.matches(&source(&[("ip", "String", "10.0.0.255")])));
        assert!(!p.matches(&source(&[("ip", "String", "10.0.1.0")])));
        assert!(!p.matches(&source(&[("ip", "String", "not-an-ip")])));

        let p = policy(r#"{"ip": [{"cidr": "0.0.0.0/0"}]}"#);
        assert!(p.matches(&source(&[("ip", "String", "192.168.1.1")])));
        // /0 matches all of its family only.
        assert!(!p.matches(&source(&[("ip", "String", "::1")])));
    }

    #[test]
    fn cidr_v6() {
        let p = policy(r#"{"ip": [{"cidr": "2001:db8::/32"}]}"#);
        assert!(p.matches(&source(&[("ip", "String", "2001:db8::1")])));
        assert!(!p.matches(&source(&[("ip", "String", "2001:db9::1")])));
    }

    #[test]
    fn string_array_attribute_matches_any_element() {
        let p = policy(r#"{"tags": ["urgent"]}"#);
        assert!(p.matches(&source(&[("tags", "String.Array", r#"["slow","urgent"]"#)])));
        assert!(!p.matches(&source(&[("tags", "String.Array", r#"["slow"]"#)])));
    }

    #[test]
    fn body_scope_uses_top_level_object() {
        let p = policy(r#"{"kind": ["signup"], "count": [{"numeric": [">", 1]}]}"#);
        let src = AttributeSource::from_body(r#"{"kind": "signup", "count": 3}"#);
        assert!(p.matches(&src));

        let src = AttributeSource::from_body("not json");
        assert!(!p.matches(&src));

        let p = policy(r#"{"kind": [{"exists": false}]}"#);
        assert!(p.matches(&AttributeSource::from_body("not json")));
    }

    #[test]
    fn invalid_policies_are_rejected() {
        assert!(FilterPolicy::parse("[1,2]").is_err());
        assert!(FilterPolicy::parse(r#"{"a": "not-an-array"}"#).is_err());
        assert!(FilterPolicy::parse(r#"{"a": [{"numeric": ["~", 1]}]}"#).is_err());
        assert!(FilterPolicy::parse(r#"{"a": [{"cidr": "999.0.0.0/8"}]}"#).is_err());
        assert!(FilterPolicy::parse(r#"{"a": [{"unknown-op": 1}]}"#).is_err());
    }
}
