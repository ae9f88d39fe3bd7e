//! Filter-to-query translation
//!
//! Toyota Way Principles:
//! - Poka-Yoke: ambiguous attribute types fail translation, never guess
//! - Standardized work: one deterministic rendering per filter tree
//!
//! ## Query Language Subset
//!
//! ```text
//! expr      := clause (("AND" | "OR") clause)*
//! clause    := "(" expr ")" | "NOT" "(" expr ")" | predicate
//! predicate := attr OP literal | attr "EXISTS"
//! attr      := `name`[:type] | agg(`name`[:type])
//! OP        := == != > >= < <= MATCHES "NOT MATCHES" CONTAINS "NOT CONTAINS"
//! ```
//!
//! Combinators render as parenthesized infix (`(a) AND (b)`), negation as
//! `NOT (x)` except for `MATCHES`/`CONTAINS`, which negate in place.
//! Series attributes are wrapped in their aggregation (default `last`).
//!
//! [`parse`] and [`eval`] read the same language back; the in-memory
//! backend uses them to answer queries.

pub mod eval;
pub mod parse;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use crate::attribute::{sys, Aggregation, Attribute, AttributeDefinition, AttributeType};
use crate::filter::{Filter, FilterValue, Operator, Predicate};
use crate::{Error, Result};

/// Known types per attribute name within the targeted scope.
///
/// Well-known system attributes are always present with their fixed type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeCatalog {
    types: BTreeMap<String, BTreeSet<AttributeType>>,
}

impl TypeCatalog {
    /// Empty catalog (system attributes only).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` exists with type `attribute_type`.
    pub fn insert(&mut self, name: impl Into<String>, attribute_type: AttributeType) {
        self.types
            .entry(name.into())
            .or_default()
            .insert(attribute_type);
    }

    /// Record a batch of backend definitions.
    pub fn extend<'a>(&mut self, definitions: impl IntoIterator<Item = &'a AttributeDefinition>) {
        for d in definitions {
            self.insert(d.name.clone(), d.attribute_type);
        }
    }

    /// Types seen for `name`.
    #[must_use]
    pub fn types_of(&self, name: &str) -> BTreeSet<AttributeType> {
        match sys::known_type(name) {
            Some(t) => BTreeSet::from([t]),
            None => self.types.get(name).cloned().unwrap_or_default(),
        }
    }

    /// Type of `attribute` as far as it is known: explicit type, type
    /// implied by the aggregation, system attribute type, then the catalog.
    /// Catalog candidates are narrowed to types supporting the attribute's
    /// aggregation. `None` when nothing is known about the name.
    ///
    /// # Errors
    ///
    /// Returns `AmbiguousAttributeType` if more than one candidate remains.
    pub fn lookup(&self, attribute: &Attribute) -> Result<Option<AttributeType>> {
        if let Some(t) = attribute.attribute_type() {
            return Ok(Some(t));
        }
        let candidates: BTreeSet<AttributeType> = match attribute.type_from_aggregation() {
            Some(t) => BTreeSet::from([t]),
            None => self
                .types_of(attribute.name())
                .into_iter()
                .filter(|t| attribute.aggregation().map_or(true, |a| t.supports(a)))
                .collect(),
        };
        let mut iter = candidates.iter();
        match (iter.next(), iter.next()) {
            (None, _) => Ok(None),
            (Some(t), None) => Ok(Some(*t)),
            _ => Err(Error::AmbiguousAttributeType {
                attribute: attribute.name().to_string(),
                types: candidates
                    .iter()
                    .map(|t| t.backend_name())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// `attribute` with its type filled in.
    ///
    /// A name the catalog has never seen is typed `string`, or
    /// `floatSeries` when it carries an aggregation.
    ///
    /// # Errors
    ///
    /// Returns `AmbiguousAttributeType` if more than one candidate remains.
    pub fn resolve(&self, attribute: &Attribute) -> Result<Attribute> {
        if attribute.attribute_type().is_some() {
            return Ok(attribute.clone());
        }
        let t = self.lookup(attribute)?.unwrap_or(if attribute.aggregation().is_some() {
            AttributeType::FloatSeries
        } else {
            AttributeType::String
        });
        Ok(retype(attribute, t))
    }

    /// Number of names recorded (excluding built-in system attributes).
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no names are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn retype(attribute: &Attribute, t: AttributeType) -> Attribute {
    let typed = Attribute::new(attribute.name()).with_type(t);
    match attribute.aggregation() {
        // aggregation already checked against `t` by the caller
        Some(agg) => typed.with_aggregation(agg).unwrap_or_else(|_| Attribute::typed(attribute.name(), t)),
        None => typed,
    }
}

/// Renders [`Filter`] trees into the backend query language.
///
/// Translation is pure: the same filter and catalog always produce the
/// same string.
#[derive(Debug, Clone, Default)]
pub struct QueryTranslator {
    catalog: TypeCatalog,
}

impl QueryTranslator {
    /// Translator over a resolved type catalog.
    #[must_use]
    pub const fn new(catalog: TypeCatalog) -> Self {
        Self { catalog }
    }

    /// The catalog in use.
    #[must_use]
    pub const fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    /// Render a filter.
    ///
    /// # Errors
    ///
    /// - `AmbiguousAttributeType` for an untyped name with several types
    /// - `UnsupportedAggregation` for `EXISTS` with an aggregation, or an
    ///   aggregation the resolved type does not support
    /// - `InvalidPredicate` if the resolved type rejects the operator
    /// - `InvalidInput` for an `All`/`Any` node with no children
    pub fn translate(&self, filter: &Filter) -> Result<String> {
        let mut out = String::new();
        self.render(filter, &mut out)?;
        Ok(out)
    }

    fn render(&self, filter: &Filter, out: &mut String) -> Result<()> {
        match filter {
            Filter::Predicate(p) => self.render_predicate(p, out),
            Filter::Exists(attribute) => {
                if let Some(agg) = attribute.aggregation() {
                    return Err(Error::unsupported_aggregation(
                        attribute.name(),
                        agg,
                        "EXISTS takes a bare attribute",
                    ));
                }
                let resolved = self.catalog.resolve(attribute)?;
                out.push_str(&render_reference(&resolved));
                out.push_str(" EXISTS");
                Ok(())
            }
            Filter::All(children) => self.render_infix("AND", children, out),
            Filter::Any(children) => self.render_infix("OR", children, out),
            Filter::Not(inner) => match inner.as_ref() {
                Filter::Predicate(p) => match p.directly_negated() {
                    Some(negated) => self.render_predicate(&negated, out),
                    None => self.render_negation(inner, out),
                },
                _ => self.render_negation(inner, out),
            },
        }
    }

    fn render_infix(&self, op: &str, children: &[Filter], out: &mut String) -> Result<()> {
        if children.is_empty() {
            return Err(Error::InvalidInput(format!("{op} needs at least one filter")));
        }
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                let _ = write!(out, " {op} ");
            }
            out.push('(');
            self.render(child, out)?;
            out.push(')');
        }
        Ok(())
    }

    fn render_negation(&self, inner: &Filter, out: &mut String) -> Result<()> {
        out.push_str("NOT (");
        self.render(inner, out)?;
        out.push(')');
        Ok(())
    }

    fn render_predicate(&self, predicate: &Predicate, out: &mut String) -> Result<()> {
        // only a type the backend reported can reject the operand
        if let Some(t) = self.catalog.lookup(predicate.attribute())? {
            predicate.check_type(t)?;
        }
        let attribute = self.catalog.resolve(predicate.attribute())?;
        out.push_str(&self.render_attribute(&attribute)?);
        let _ = write!(out, " {} ", predicate.operator());
        out.push_str(&render_value(predicate.value(), predicate.operator()));
        Ok(())
    }

    /// Render an attribute reference, wrapping series in an aggregation.
    ///
    /// # Errors
    ///
    /// `AmbiguousAttributeType` or `UnsupportedAggregation` as for
    /// [`QueryTranslator::translate`].
    pub fn render_attribute(&self, attribute: &Attribute) -> Result<String> {
        let attribute = self.catalog.resolve(attribute)?;
        let reference = render_reference(&attribute);
        let t = attribute.attribute_type();
        let aggregation = match (attribute.aggregation(), t) {
            (Some(agg), Some(t)) if !t.supports(agg) => {
                return Err(Error::unsupported_aggregation(
                    attribute.name(),
                    agg,
                    format!("type {t} does not support it"),
                ))
            }
            (Some(agg), _) => Some(agg),
            (None, Some(t)) if t.is_series() => Some(Aggregation::Last),
            (None, _) => None,
        };
        Ok(match aggregation {
            Some(agg) => format!("{agg}({reference})"),
            None => reference,
        })
    }
}

fn render_reference(attribute: &Attribute) -> String {
    let t = attribute.attribute_type().unwrap_or(AttributeType::String);
    format!("`{}`:{}", attribute.name(), t.backend_name())
}

/// Render an operand literal.
///
/// Numbers and booleans are bare; strings and timestamps are quoted.
/// Plain strings escape `\` and `"`; regex operands escape only `"`.
#[must_use]
pub fn render_value(value: &FilterValue, operator: Operator) -> String {
    match value {
        FilterValue::Bool(v) => v.to_string(),
        FilterValue::Int(v) => v.to_string(),
        FilterValue::Float(v) => format!("{v:?}"),
        FilterValue::Datetime(v) => format!("\"{}\"", v.to_rfc3339()),
        FilterValue::String(s) if matches!(operator, Operator::Matches | Operator::NotMatches) => {
            format!("\"{}\"", s.replace('"', "\\\""))
        }
        FilterValue::String(s) => format!("\"{}\"", escape(s)),
    }
}

/// Escape a plain string literal.
#[must_use]
pub fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Translate with system-attribute types only.
///
/// # Errors
///
/// Same as [`QueryTranslator::translate`].
pub fn translate(filter: &Filter) -> Result<String> {
    QueryTranslator::default().translate(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TypeCatalog {
        let mut c = TypeCatalog::new();
        c.insert("loss", AttributeType::Float);
        c.insert("metrics/acc", AttributeType::FloatSeries);
        c.insert("status", AttributeType::String);
        c.insert("notes", AttributeType::StringSeries);
        c.insert("dual", AttributeType::Float);
        c.insert("dual", AttributeType::String);
        c
    }

    fn tr(f: &Filter) -> Result<String> {
        QueryTranslator::new(catalog()).translate(f)
    }

    #[test]
    fn test_reference_scenario() {
        let f = Filter::lt("loss", 0.1).unwrap() & Filter::contains_none("sys/tags", ["test"]).unwrap();
        assert_eq!(
            tr(&f).unwrap(),
            r#"(`loss`:float < 0.1) AND (`sys/tags`:stringSet NOT CONTAINS "test")"#
        );
    }

    #[test]
    fn test_series_wrapped_in_last() {
        let f = Filter::gt("metrics/acc", 0.9).unwrap();
        assert_eq!(tr(&f).unwrap(), "last(`metrics/acc`:floatSeries) > 0.9");
    }

    #[test]
    fn test_explicit_aggregation() {
        let a = Attribute::new("metrics/acc").with_aggregation(Aggregation::Max).unwrap();
        let f = Filter::ge(a, 1).unwrap();
        assert_eq!(tr(&f).unwrap(), "max(`metrics/acc`:floatSeries) >= 1");
    }

    #[test]
    fn test_exists_with_aggregation_fails() {
        let a = Attribute::new("metrics/acc").with_aggregation(Aggregation::Last).unwrap();
        let f = Filter::Exists(a);
        assert!(matches!(tr(&f).unwrap_err(), Error::UnsupportedAggregation { .. }));
    }

    #[test]
    fn test_exists_series_not_wrapped() {
        let f = Filter::exists("metrics/acc").unwrap();
        assert_eq!(tr(&f).unwrap(), "`metrics/acc`:floatSeries EXISTS");
    }

    #[test]
    fn test_ambiguous_type() {
        let f = Filter::eq("dual", "x").unwrap();
        let err = tr(&f).unwrap_err();
        assert!(matches!(err, Error::AmbiguousAttributeType { .. }));
        assert!(err.to_string().contains("dual"));
    }

    #[test]
    fn test_explicit_type_disambiguates() {
        let f = Filter::eq(Attribute::typed("dual", AttributeType::String), "x").unwrap();
        assert_eq!(tr(&f).unwrap(), r#"`dual`:string == "x""#);
    }

    #[test]
    fn test_unknown_name_typed_as_string() {
        let f = Filter::eq("nowhere", 3).unwrap();
        assert_eq!(tr(&f).unwrap(), "`nowhere`:string == 3");
        let f = Filter::exists("nowhere").unwrap();
        assert_eq!(tr(&f).unwrap(), "`nowhere`:string EXISTS");
        let a = Attribute::new("nowhere").with_aggregation(Aggregation::Last).unwrap();
        let f = Filter::gt(a, 1.0).unwrap();
        assert_eq!(tr(&f).unwrap(), "last(`nowhere`:floatSeries) > 1.0");
    }

    #[test]
    fn test_empty_combinator_rejected() {
        let inner = Filter::gt("loss", 0.1).unwrap();
        for f in [Filter::All(vec![]), Filter::Any(vec![]), inner & Filter::Any(vec![])] {
            assert!(matches!(tr(&f).unwrap_err(), Error::InvalidInput(_)));
        }
    }

    #[test]
    fn test_inferred_type_rejects_operator() {
        let f = Filter::contains_all("loss", ["x"]).unwrap();
        assert!(matches!(tr(&f).unwrap_err(), Error::InvalidPredicate { .. }));
    }

    #[test]
    fn test_string_escaping() {
        let f = Filter::eq("status", r#"a"b\c"#).unwrap();
        assert_eq!(tr(&f).unwrap(), r#"`status`:string == "a\"b\\c""#);
    }

    #[test]
    fn test_regex_not_escaped() {
        let f = Filter::matches_all("status", [r#"^a\d+"$"#]).unwrap();
        assert_eq!(tr(&f).unwrap(), r#"`status`:string MATCHES "^a\d+\"$""#);
    }

    #[test]
    fn test_negation_forms() {
        let c = Filter::contains_all("sys/tags", ["x"]).unwrap();
        assert_eq!(tr(&!c.clone()).unwrap(), r#"`sys/tags`:stringSet NOT CONTAINS "x""#);
        let l = Filter::lt("loss", 1).unwrap();
        assert_eq!(tr(&!l).unwrap(), "NOT (`loss`:float < 1)");
        assert_eq!(
            tr(&!!c).unwrap(),
            r#"NOT (`sys/tags`:stringSet NOT CONTAINS "x")"#
        );
    }

    #[test]
    fn test_or_and_nesting() {
        let f = (Filter::name_eq("a") | Filter::name_eq("b")) & Filter::exists("loss").unwrap();
        assert_eq!(
            tr(&f).unwrap(),
            r#"((`sys/name`:string == "a") OR (`sys/name`:string == "b")) AND (`loss`:float EXISTS)"#
        );
    }

    #[test]
    fn test_deterministic() {
        let f = Filter::matches_none("notes", ["x", "y"]).unwrap() | Filter::ne("loss", 0.5).unwrap();
        assert_eq!(tr(&f).unwrap(), tr(&f).unwrap());
    }

    #[test]
    fn test_datetime_quoted() {
        use chrono::TimeZone;
        let t = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let f = Filter::gt(sys::CREATION_TIME, t).unwrap();
        assert_eq!(
            translate(&f).unwrap(),
            r#"`sys/creation_time`:datetime > "2024-05-01T12:00:00+00:00""#
        );
    }
}
