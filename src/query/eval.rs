//! Evaluate parsed queries against one run's attributes

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::parse::{AttrRef, Expr, Literal};
use crate::attribute::{Aggregation, Value};
use crate::filter::Operator;

/// Whether a run with `attributes` satisfies `expr`.
///
/// A predicate on a missing attribute (or one whose type differs from the
/// reference's annotation) is false, except `NOT MATCHES`/`NOT CONTAINS`,
/// which are the negation of their positive form. `!=` requires presence.
#[must_use]
pub fn evaluate(expr: &Expr, attributes: &BTreeMap<String, Value>) -> bool {
    match expr {
        Expr::And(parts) => parts.iter().all(|p| evaluate(p, attributes)),
        Expr::Or(parts) => parts.iter().any(|p| evaluate(p, attributes)),
        Expr::Not(inner) => !evaluate(inner, attributes),
        Expr::Exists(attribute) => lookup(attribute, attributes).is_some(),
        Expr::Compare {
            attribute,
            operator,
            value,
        } => match operator {
            Operator::NotMatches => !compare(attribute, Operator::Matches, value, attributes),
            Operator::NotContains => !compare(attribute, Operator::Contains, value, attributes),
            op => compare(attribute, *op, value, attributes),
        },
    }
}

fn lookup<'a>(attribute: &AttrRef, attributes: &'a BTreeMap<String, Value>) -> Option<&'a Value> {
    let value = attributes.get(&attribute.name)?;
    match attribute.attribute_type {
        Some(t) if t != value.attribute_type() => None,
        _ => Some(value),
    }
}

fn compare(
    attribute: &AttrRef,
    operator: Operator,
    literal: &Literal,
    attributes: &BTreeMap<String, Value>,
) -> bool {
    let Some(stored) = lookup(attribute, attributes) else {
        return false;
    };
    let Some(value) = stored.cell(attribute.aggregation.or(Some(Aggregation::Last))) else {
        return false;
    };
    match operator {
        Operator::Matches => match (literal, value.as_str()) {
            (Literal::Regex(re), Some(s)) => re.is_match(s),
            _ => false,
        },
        Operator::Contains => match (literal, &value) {
            (Literal::String(needle), Value::String(s)) => s.contains(needle.as_str()),
            (Literal::String(needle), Value::StringSet(set)) => set.contains(needle),
            _ => false,
        },
        Operator::Eq => order(&value, literal) == Some(Ordering::Equal),
        Operator::Ne => order(&value, literal).is_some_and(|o| o != Ordering::Equal),
        Operator::Gt => order(&value, literal) == Some(Ordering::Greater),
        Operator::Ge => matches!(order(&value, literal), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => order(&value, literal) == Some(Ordering::Less),
        Operator::Le => matches!(order(&value, literal), Some(Ordering::Less | Ordering::Equal)),
        Operator::NotMatches | Operator::NotContains => false,
    }
}

#[allow(clippy::cast_precision_loss)]
fn order(value: &Value, literal: &Literal) -> Option<Ordering> {
    match (value, literal) {
        (Value::Bool(a), Literal::Bool(b)) => Some(a.cmp(b)),
        (Value::Int(a), Literal::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Literal::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::Datetime(a), Literal::String(b)) => {
            let b: DateTime<Utc> = DateTime::parse_from_rfc3339(b).ok()?.with_timezone(&Utc);
            Some(a.cmp(&b))
        }
        (v, Literal::Int(b)) => v.as_f64()?.partial_cmp(&(*b as f64)),
        (v, Literal::Float(b)) => v.as_f64()?.partial_cmp(b),
        _ => None,
    }
}
