//! Row-selection filter algebra
//!
//! Toyota Way: Poka-Yoke. Operator/type mismatches are rejected when the
//! predicate is built, before anything reaches the backend.
//!
//! A [`Filter`] is an immutable tree of attribute predicates joined by
//! `AND`/`OR`/`NOT`. Combinators never mutate their operands: `negate`,
//! `and`, `or` (and the `!`, `&`, `|` operators built on them) return new
//! trees. Equality and hashing are structural.
//!
//! ```rust
//! use trueno_fetch::filter::Filter;
//!
//! let f = Filter::lt("loss", 0.1)? & Filter::contains_none("sys/tags", ["test"])?;
//! assert_eq!(f.attributes().count(), 2);
//! # Ok::<(), trueno_fetch::Error>(())
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitAnd, BitOr, Not};

use chrono::{DateTime, Utc};

use crate::attribute::{sys, Attribute, AttributeType};
use crate::{Error, Result};

/// Comparison and match operators of the query language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `MATCHES` (regex)
    Matches,
    /// `NOT MATCHES`
    NotMatches,
    /// `CONTAINS` (substring or set membership)
    Contains,
    /// `NOT CONTAINS`
    NotContains,
}

impl Operator {
    /// Query-language spelling.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Matches => "MATCHES",
            Self::NotMatches => "NOT MATCHES",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT CONTAINS",
        }
    }

    /// Operator with the opposite meaning, where the language has one.
    #[must_use]
    pub const fn direct_negation(self) -> Option<Self> {
        match self {
            Self::Matches => Some(Self::NotMatches),
            Self::NotMatches => Some(Self::Matches),
            Self::Contains => Some(Self::NotContains),
            Self::NotContains => Some(Self::Contains),
            _ => None,
        }
    }

    const fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Ge | Self::Lt | Self::Le)
    }

    const fn is_match(self) -> bool {
        matches!(self, Self::Matches | Self::NotMatches)
    }

    const fn is_contains(self) -> bool {
        matches!(self, Self::Contains | Self::NotContains)
    }

    /// Whether the operator can be applied to attributes of type `t`.
    #[must_use]
    pub const fn accepts(self, t: AttributeType) -> bool {
        use AttributeType as T;
        match self {
            Self::Eq | Self::Ne => !matches!(t, T::StringSet),
            Self::Gt | Self::Ge | Self::Lt | Self::Le => {
                matches!(t, T::Float | T::Int | T::Datetime | T::String | T::FloatSeries)
            }
            Self::Matches | Self::NotMatches => matches!(t, T::String | T::StringSeries),
            Self::Contains | Self::NotContains => matches!(t, T::String | T::StringSet),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand operand of a predicate.
#[derive(Debug, Clone)]
pub enum FilterValue {
    /// Boolean literal
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Finite float literal
    Float(f64),
    /// String literal or regex
    String(String),
    /// Timestamp literal
    Datetime(DateTime<Utc>),
}

impl FilterValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Datetime(_) => "datetime",
        }
    }

    const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    fn fits(&self, t: AttributeType) -> bool {
        use AttributeType as T;
        match t {
            T::Float | T::Int | T::FloatSeries => self.is_numeric(),
            T::Bool => matches!(self, Self::Bool(_)),
            T::Datetime => matches!(self, Self::Datetime(_)),
            T::String | T::StringSeries | T::StringSet => matches!(self, Self::String(_)),
        }
    }
}

impl PartialEq for FilterValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Datetime(a), Self::Datetime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FilterValue {}

impl Hash for FilterValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::String(v) => v.hash(state),
            Self::Datetime(v) => v.hash(state),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Datetime(v)
    }
}

/// A validated `attribute OPERATOR value` comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    attribute: Attribute,
    operator: Operator,
    value: FilterValue,
}

impl Predicate {
    /// Build a predicate, checking operator/type/operand compatibility.
    ///
    /// When the attribute carries no type, only the operand is checked
    /// against the operator; the remaining check happens once the type is
    /// inferred.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` on any incompatibility.
    pub fn new(
        attribute: impl Into<Attribute>,
        operator: Operator,
        value: impl Into<FilterValue>,
    ) -> Result<Self> {
        let attribute = attribute.into();
        let value = value.into();
        let name = attribute.name();

        if let FilterValue::Float(v) = value {
            if !v.is_finite() {
                return Err(Error::invalid_predicate(name, format!("operand {v} is not finite")));
            }
        }
        if (operator.is_match() || operator.is_contains())
            && !matches!(value, FilterValue::String(_))
        {
            return Err(Error::invalid_predicate(
                name,
                format!("{operator} needs a string operand, got {}", value.kind()),
            ));
        }
        if operator.is_ordering() && matches!(value, FilterValue::Bool(_)) {
            return Err(Error::invalid_predicate(
                name,
                format!("{operator} cannot compare booleans"),
            ));
        }
        if operator.is_match() {
            regex::Regex::new(value_str(&value))?;
        }
        let known = attribute
            .attribute_type()
            .or_else(|| sys::known_type(attribute.name()));
        let predicate = Self {
            attribute,
            operator,
            value,
        };
        if let Some(t) = known {
            predicate.check_type(t)?;
        }
        Ok(predicate)
    }

    /// Check this predicate against a concrete attribute type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` if the operator or operand does not fit `t`.
    pub fn check_type(&self, t: AttributeType) -> Result<()> {
        let name = self.attribute.name();
        if !self.operator.accepts(t) {
            return Err(Error::invalid_predicate(
                name,
                format!("operator {} is not valid for type {t}", self.operator),
            ));
        }
        if !self.value.fits(t) {
            return Err(Error::invalid_predicate(
                name,
                format!("{} operand does not fit type {t}", self.value.kind()),
            ));
        }
        Ok(())
    }

    /// Target attribute.
    #[must_use]
    pub const fn attribute(&self) -> &Attribute {
        &self.attribute
    }

    /// Operator.
    #[must_use]
    pub const fn operator(&self) -> Operator {
        self.operator
    }

    /// Operand.
    #[must_use]
    pub const fn value(&self) -> &FilterValue {
        &self.value
    }

    /// The same predicate with its operator directly negated, if possible.
    #[must_use]
    pub fn directly_negated(&self) -> Option<Self> {
        self.operator.direct_negation().map(|operator| Self {
            operator,
            ..self.clone()
        })
    }

    pub(crate) fn with_attribute(&self, attribute: Attribute) -> Self {
        Self {
            attribute,
            ..self.clone()
        }
    }
}

fn value_str(value: &FilterValue) -> &str {
    match value {
        FilterValue::String(s) => s,
        _ => "",
    }
}

/// Boolean expression tree over attribute predicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    /// `attribute OP value`
    Predicate(Predicate),
    /// `attribute EXISTS`
    Exists(Attribute),
    /// Conjunction of at least one child
    All(Vec<Filter>),
    /// Disjunction of at least one child
    Any(Vec<Filter>),
    /// Negation
    Not(Box<Filter>),
}

impl Filter {
    fn predicate(
        attribute: impl Into<Attribute>,
        operator: Operator,
        value: impl Into<FilterValue>,
    ) -> Result<Self> {
        Predicate::new(attribute, operator, value).map(Self::Predicate)
    }

    /// Value equals.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` if the operand does not fit the attribute.
    pub fn eq(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Result<Self> {
        Self::predicate(attribute, Operator::Eq, value)
    }

    /// Value differs (and is present).
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` if the operand does not fit the attribute.
    pub fn ne(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Result<Self> {
        Self::predicate(attribute, Operator::Ne, value)
    }

    /// Value greater than.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` if the operand does not fit the attribute.
    pub fn gt(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Result<Self> {
        Self::predicate(attribute, Operator::Gt, value)
    }

    /// Value greater than or equal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` if the operand does not fit the attribute.
    pub fn ge(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Result<Self> {
        Self::predicate(attribute, Operator::Ge, value)
    }

    /// Value less than.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` if the operand does not fit the attribute.
    pub fn lt(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Result<Self> {
        Self::predicate(attribute, Operator::Lt, value)
    }

    /// Value less than or equal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` if the operand does not fit the attribute.
    pub fn le(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Result<Self> {
        Self::predicate(attribute, Operator::Le, value)
    }

    fn each<I, S>(attribute: impl Into<Attribute>, operator: Operator, operands: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let attribute = attribute.into();
        let mut parts = operands
            .into_iter()
            .map(|v| Self::predicate(attribute.clone(), operator, FilterValue::String(v.into())))
            .collect::<Result<Vec<_>>>()?;
        match parts.len() {
            0 => Err(Error::invalid_predicate(
                attribute.name(),
                format!("{operator} needs at least one operand"),
            )),
            1 => Ok(parts.remove(0)),
            _ => Ok(Self::All(parts)),
        }
    }

    /// Value matches every regex.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` for an empty list or a non-string
    /// attribute, `Error::Regex` for a pattern that fails to compile.
    pub fn matches_all<I, S>(attribute: impl Into<Attribute>, regexes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::each(attribute, Operator::Matches, regexes)
    }

    /// Value matches none of the regexes.
    ///
    /// # Errors
    ///
    /// Same as [`Filter::matches_all`].
    pub fn matches_none<I, S>(attribute: impl Into<Attribute>, regexes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::each(attribute, Operator::NotMatches, regexes)
    }

    /// String contains every substring, or set contains every element.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` for an empty list or an attribute type
    /// other than string/string_set.
    pub fn contains_all<I, S>(attribute: impl Into<Attribute>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::each(attribute, Operator::Contains, values)
    }

    /// String contains none of the substrings, or set none of the elements.
    ///
    /// # Errors
    ///
    /// Same as [`Filter::contains_all`].
    pub fn contains_none<I, S>(attribute: impl Into<Attribute>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::each(attribute, Operator::NotContains, values)
    }

    /// Attribute is present.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAggregation` if the attribute carries an
    /// aggregation.
    pub fn exists(attribute: impl Into<Attribute>) -> Result<Self> {
        let attribute = attribute.into();
        if let Some(agg) = attribute.aggregation() {
            return Err(Error::unsupported_aggregation(
                attribute.name(),
                agg,
                "EXISTS takes a bare attribute",
            ));
        }
        Ok(Self::Exists(attribute))
    }

    /// Experiment/run name equals.
    #[must_use]
    pub fn name_eq(name: impl Into<String>) -> Self {
        Self::Predicate(Predicate {
            attribute: Attribute::typed(sys::NAME, AttributeType::String),
            operator: Operator::Eq,
            value: FilterValue::String(name.into()),
        })
    }

    /// Name equals any of `names`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` if `names` is empty.
    pub fn name_in<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts: Vec<Self> = names.into_iter().map(Self::name_eq).collect();
        match parts.len() {
            0 => Err(Error::invalid_predicate(sys::NAME, "name_in needs at least one name")),
            1 => Ok(parts.remove(0)),
            _ => Ok(Self::Any(parts)),
        }
    }

    /// Conjunction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `filters` is empty.
    pub fn all(filters: impl IntoIterator<Item = Self>) -> Result<Self> {
        let filters: Vec<Self> = filters.into_iter().collect();
        if filters.is_empty() {
            return Err(Error::InvalidInput("AND needs at least one filter".to_string()));
        }
        Ok(Self::All(filters))
    }

    /// Disjunction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `filters` is empty.
    pub fn any(filters: impl IntoIterator<Item = Self>) -> Result<Self> {
        let filters: Vec<Self> = filters.into_iter().collect();
        if filters.is_empty() {
            return Err(Error::InvalidInput("OR needs at least one filter".to_string()));
        }
        Ok(Self::Any(filters))
    }

    /// Negation of `filter`.
    #[must_use]
    pub fn negate(filter: &Self) -> Self {
        Self::Not(Box::new(filter.clone()))
    }

    /// `self AND other`.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        Self::All(vec![self.clone(), other.clone()])
    }

    /// `self OR other`.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        Self::Any(vec![self.clone(), other.clone()])
    }

    /// Every attribute referenced in the tree, depth first.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out.into_iter()
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a Attribute>) {
        match self {
            Self::Predicate(p) => out.push(p.attribute()),
            Self::Exists(a) => out.push(a),
            Self::All(children) | Self::Any(children) => {
                for c in children {
                    c.collect_attributes(out);
                }
            }
            Self::Not(inner) => inner.collect_attributes(out),
        }
    }

    /// Rebuild the tree with each attribute passed through `f`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `f`.
    pub fn try_map_attributes<F>(&self, f: &mut F) -> Result<Self>
    where
        F: FnMut(&Attribute) -> Result<Attribute>,
    {
        Ok(match self {
            Self::Predicate(p) => Self::Predicate(p.with_attribute(f(p.attribute())?)),
            Self::Exists(a) => Self::Exists(f(a)?),
            Self::All(children) => Self::All(
                children
                    .iter()
                    .map(|c| c.try_map_attributes(f))
                    .collect::<Result<_>>()?,
            ),
            Self::Any(children) => Self::Any(
                children
                    .iter()
                    .map(|c| c.try_map_attributes(f))
                    .collect::<Result<_>>()?,
            ),
            Self::Not(inner) => Self::Not(Box::new(inner.try_map_attributes(f)?)),
        })
    }
}

impl BitAnd for Filter {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self::All(vec![self, rhs])
    }
}

impl BitOr for Filter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::Any(vec![self, rhs])
    }
}

impl Not for Filter {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Aggregation;

    #[test]
    fn test_contains_all_on_float_rejected() {
        let attr = Attribute::typed("lr", AttributeType::Float);
        let err = Filter::contains_all(attr, ["x"]).unwrap_err();
        assert!(matches!(err, Error::InvalidPredicate { .. }));
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_contains_on_string_set_ok() {
        let f = Filter::contains_all("sys/tags", ["a"]).unwrap();
        assert!(matches!(f, Filter::Predicate(_)));
    }

    #[test]
    fn test_list_operands_expand_to_all() {
        let f = Filter::contains_none("sys/tags", ["a", "b"]).unwrap();
        match f {
            Filter::All(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected All, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_operand_list_rejected() {
        assert!(Filter::matches_all("name", Vec::<String>::new()).is_err());
        assert!(Filter::name_in(Vec::<String>::new()).is_err());
        assert!(Filter::all(Vec::new()).is_err());
    }

    #[test]
    fn test_ordering_on_bool_rejected() {
        assert!(Filter::gt("flag", true).is_err());
        let attr = Attribute::typed("flag", AttributeType::Bool);
        assert!(Filter::gt(attr, 1).is_err());
    }

    #[test]
    fn test_operand_type_mismatch() {
        let attr = Attribute::typed("lr", AttributeType::Float);
        assert!(Filter::eq(attr.clone(), "abc").is_err());
        assert!(Filter::eq(attr, 0.5).is_ok());
    }

    #[test]
    fn test_nan_rejected() {
        assert!(Filter::lt("loss", f64::NAN).is_err());
    }

    #[test]
    fn test_bad_regex_rejected() {
        assert!(matches!(
            Filter::matches_all("name", ["("]).unwrap_err(),
            Error::Regex(_)
        ));
    }

    #[test]
    fn test_exists_with_aggregation_rejected() {
        let attr = Attribute::new("loss").with_aggregation(Aggregation::Max).unwrap();
        assert!(matches!(
            Filter::exists(attr).unwrap_err(),
            Error::UnsupportedAggregation { .. }
        ));
    }

    #[test]
    fn test_structural_equality() {
        let a = Filter::lt("loss", 0.1).unwrap() & Filter::exists("x").unwrap();
        let b = Filter::lt("loss", 0.1).unwrap() & Filter::exists("x").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Filter::lt("loss", 0.2).unwrap() & Filter::exists("x").unwrap());
    }

    #[test]
    fn test_combinators_do_not_mutate() {
        let a = Filter::eq("x", 1).unwrap();
        let b = Filter::eq("y", 2).unwrap();
        let both = a.and(&b);
        let neg = Filter::negate(&a);
        assert_eq!(a, Filter::eq("x", 1).unwrap());
        assert_eq!(both, Filter::All(vec![a.clone(), b]));
        assert_eq!(neg, !a);
    }

    #[test]
    fn test_name_in_single_is_name_eq() {
        assert_eq!(Filter::name_in(["exp"]).unwrap(), Filter::name_eq("exp"));
    }

    #[test]
    fn test_direct_negation() {
        assert_eq!(Operator::Contains.direct_negation(), Some(Operator::NotContains));
        assert_eq!(Operator::Lt.direct_negation(), None);
    }

    #[test]
    fn test_attributes_walk() {
        let f = !(Filter::eq("a", 1).unwrap() | Filter::exists("b").unwrap());
        let names: Vec<&str> = f.attributes().map(Attribute::name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
