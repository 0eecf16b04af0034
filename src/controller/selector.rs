//! Label selector parsing and matching
//!
//! Supports the Kubernetes selector grammar used on the command line:
//!
//! - `key=value`, `key==value` - exact match
//! - `key!=value` - value differs or key absent
//! - `key in (a,b)`, `key notin (a,b)` - set membership
//! - `key`, `!key` - key presence / absence
//!
//! Terms are joined by commas and all must hold. Selectors are parsed once at
//! startup; a malformed selector is a configuration error.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Error, Result};

/// Operator of a single selector term
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    Equals(String),
    NotEquals(String),
    In(BTreeSet<String>),
    NotIn(BTreeSet<String>),
    Exists,
    DoesNotExist,
}

/// One term of a selector, e.g. `app=router`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match &self.operator {
            Operator::Equals(expected) => value == Some(expected),
            Operator::NotEquals(expected) => value != Some(expected),
            Operator::In(set) => value.is_some_and(|v| set.contains(v)),
            Operator::NotIn(set) => value.map_or(true, |v| !set.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");
        match &self.operator {
            Operator::Equals(v) => write!(f, "{}={}", self.key, v),
            Operator::NotEquals(v) => write!(f, "{}!={}", self.key, v),
            Operator::In(set) => write!(f, "{} in ({})", self.key, join(set)),
            Operator::NotIn(set) => write!(f, "{} notin ({})", self.key, join(set)),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// Conjunction of label requirements
///
/// An empty selector matches every label set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Parse selector text such as `app=router,component=druid`
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidSelector("selector is empty".to_string()));
        }

        let requirements = split_terms(text)
            .map_err(|reason| Error::InvalidSelector(format!("{}: {}", text, reason)))?
            .into_iter()
            .map(|term| {
                parse_term(term)
                    .map_err(|reason| Error::InvalidSelector(format!("{}: {}", text, reason)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// True iff every requirement holds for `labels`
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", terms.join(","))
    }
}

/// Split on commas that are not inside a `(...)` value list
fn split_terms(text: &str) -> std::result::Result<Vec<&str>, String> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ')'".to_string())?;
            }
            ',' if depth == 0 => {
                terms.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    terms.push(&text[start..]);
    Ok(terms)
}

fn parse_term(term: &str) -> std::result::Result<Requirement, String> {
    let term = term.trim();
    if term.is_empty() {
        return Err("empty term".to_string());
    }

    if let Some(open) = term.find('(') {
        return parse_set_term(term, open);
    }

    if let Some(key) = term.strip_prefix('!') {
        let key = key.trim();
        validate_key(key)?;
        return Ok(Requirement {
            key: key.to_string(),
            operator: Operator::DoesNotExist,
        });
    }

    let (key, operator) = if let Some((k, v)) = term.split_once("!=") {
        (k, Operator::NotEquals(validated_value(v)?))
    } else if let Some((k, v)) = term.split_once("==") {
        (k, Operator::Equals(validated_value(v)?))
    } else if let Some((k, v)) = term.split_once('=') {
        (k, Operator::Equals(validated_value(v)?))
    } else {
        (term, Operator::Exists)
    };

    let key = key.trim();
    validate_key(key)?;
    Ok(Requirement {
        key: key.to_string(),
        operator,
    })
}

fn parse_set_term(term: &str, open: usize) -> std::result::Result<Requirement, String> {
    let inner = term[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| format!("'{}' must end with ')'", term))?;

    let mut head = term[..open].split_whitespace();
    let (key, op) = match (head.next(), head.next(), head.next()) {
        (Some(key), Some(op), None) => (key, op),
        _ => return Err(format!("'{}' is not of the form 'key in (values)'", term)),
    };
    validate_key(key)?;

    let values = inner
        .split(',')
        .map(validated_value)
        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    if values.iter().all(String::is_empty) {
        return Err(format!("'{}' has no values", term));
    }

    let operator = match op {
        "in" => Operator::In(values),
        "notin" => Operator::NotIn(values),
        other => return Err(format!("unknown set operator '{}'", other)),
    };

    Ok(Requirement {
        key: key.to_string(),
        operator,
    })
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn validate_key(key: &str) -> std::result::Result<(), String> {
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || !prefix.chars().all(is_name_char) {
                return Err(format!("invalid key prefix in '{}'", key));
            }
            name
        }
        None => key,
    };

    let bounded = |s: &str| {
        s.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
            && s.chars().last().is_some_and(|c| c.is_ascii_alphanumeric())
    };

    if name.is_empty() || name.len() > 63 || !name.chars().all(is_name_char) || !bounded(name) {
        return Err(format!("invalid key '{}'", key));
    }
    Ok(())
}

fn validated_value(value: &str) -> std::result::Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(String::new());
    }
    let bounded = value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric());
    if value.len() > 63 || !value.chars().all(is_name_char) || !bounded {
        return Err(format!("invalid value '{}'", value));
    }
    Ok(value.to_string())
}
