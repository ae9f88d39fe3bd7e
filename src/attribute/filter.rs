//! Attribute selection: which attribute columns a table fetch returns

use std::collections::BTreeSet;
use std::ops::BitOr;

use regex::Regex;

use super::{Aggregation, AttributeDefinition, AttributeType};
use crate::{Error, Result};

/// Name predicate made of regexes: every `must_match` pattern has to match
/// and no `must_not_match` pattern may match.
#[derive(Debug, Clone)]
pub struct AttributeNameFilter {
    must_match: Vec<Regex>,
    must_not_match: Vec<Regex>,
}

impl AttributeNameFilter {
    /// Compile a name filter.
    ///
    /// # Errors
    ///
    /// Returns `Error::Regex` if any pattern fails to compile.
    pub fn new<I, J, S, T>(must_match: I, must_not_match: J) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Ok(Self {
            must_match: compile_all(must_match)?,
            must_not_match: compile_all(must_not_match)?,
        })
    }

    /// Whether `name` passes this filter.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.must_match.iter().all(|r| r.is_match(name))
            && !self.must_not_match.iter().any(|r| r.is_match(name))
    }

    /// Patterns that must match.
    pub fn must_match(&self) -> impl Iterator<Item = &str> {
        self.must_match.iter().map(Regex::as_str)
    }

    /// Patterns that must not match.
    pub fn must_not_match(&self) -> impl Iterator<Item = &str> {
        self.must_not_match.iter().map(Regex::as_str)
    }
}

impl PartialEq for AttributeNameFilter {
    fn eq(&self, other: &Self) -> bool {
        self.must_match().eq(other.must_match())
            && self.must_not_match().eq(other.must_not_match())
    }
}

fn compile_all<I, S>(patterns: I) -> Result<Vec<Regex>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| Regex::new(p.as_ref()).map_err(Error::from))
        .collect()
}

/// Selects attributes by exact name, type, and/or name regexes, and picks
/// the aggregations to report for series attributes.
///
/// An empty filter (`AttributeFilter::default()`) selects every attribute
/// of every type with the `last` aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFilter {
    name_eq: Option<BTreeSet<String>>,
    type_in: Vec<AttributeType>,
    must_match_any: Vec<AttributeNameFilter>,
    aggregations: Vec<Aggregation>,
}

impl Default for AttributeFilter {
    fn default() -> Self {
        Self {
            name_eq: None,
            type_in: AttributeType::ALL.to_vec(),
            must_match_any: Vec::new(),
            aggregations: vec![Aggregation::Last],
        }
    }
}

impl AttributeFilter {
    /// Filter selecting every attribute.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter selecting exactly the given attribute names.
    #[must_use]
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name_eq: Some(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Filter selecting attribute names matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Regex` if the pattern fails to compile.
    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Self::default().with_name_filter(AttributeNameFilter::new([pattern], [""; 0])?))
    }

    /// Restrict to the given types.
    #[must_use]
    pub fn with_types(mut self, types: impl IntoIterator<Item = AttributeType>) -> Self {
        self.type_in = types.into_iter().collect();
        self
    }

    /// Add an alternative name filter. A name passes if it matches any of
    /// the configured alternatives.
    #[must_use]
    pub fn with_name_filter(mut self, filter: AttributeNameFilter) -> Self {
        self.must_match_any.push(filter);
        self
    }

    /// Set the series aggregations to report.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `aggregations` is empty.
    pub fn with_aggregations(
        mut self,
        aggregations: impl IntoIterator<Item = Aggregation>,
    ) -> Result<Self> {
        let mut aggs: Vec<Aggregation> = aggregations.into_iter().collect();
        if aggs.is_empty() {
            return Err(Error::InvalidInput(
                "attribute filter needs at least one aggregation".to_string(),
            ));
        }
        aggs.sort_unstable();
        aggs.dedup();
        self.aggregations = aggs;
        Ok(self)
    }

    /// Exact names, if restricted.
    #[must_use]
    pub const fn name_eq(&self) -> Option<&BTreeSet<String>> {
        self.name_eq.as_ref()
    }

    /// Allowed types.
    #[must_use]
    pub fn type_in(&self) -> &[AttributeType] {
        &self.type_in
    }

    /// Regex alternatives.
    #[must_use]
    pub fn name_filters(&self) -> &[AttributeNameFilter] {
        &self.must_match_any
    }

    /// Requested aggregations.
    #[must_use]
    pub fn aggregations(&self) -> &[Aggregation] {
        &self.aggregations
    }

    /// Whether a backend-reported definition is selected.
    #[must_use]
    pub fn matches(&self, definition: &AttributeDefinition) -> bool {
        if !self.type_in.contains(&definition.attribute_type) {
            return false;
        }
        if let Some(names) = &self.name_eq {
            if !names.contains(&definition.name) {
                return false;
            }
        }
        self.must_match_any.is_empty()
            || self
                .must_match_any
                .iter()
                .any(|f| f.matches(&definition.name))
    }
}

/// Union of attribute filters.
///
/// Built from a single filter, a list of exact names, or by `|`-ing
/// filters together.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSelection {
    filters: Vec<AttributeFilter>,
}

impl AttributeSelection {
    /// Selection of exactly the given names.
    #[must_use]
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributeFilter::names(names).into()
    }

    /// Selection of names matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Regex` if the pattern fails to compile.
    pub fn regex(pattern: &str) -> Result<Self> {
        AttributeFilter::regex(pattern).map(Into::into)
    }

    /// Selection that matches nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// The alternatives.
    #[must_use]
    pub fn filters(&self) -> &[AttributeFilter] {
        &self.filters
    }

    /// Whether any alternative selects `definition`.
    #[must_use]
    pub fn matches(&self, definition: &AttributeDefinition) -> bool {
        self.filters.iter().any(|f| f.matches(definition))
    }

    /// Aggregations to report for `definition`.
    ///
    /// Empty for scalar types. For series types, the union of aggregations
    /// requested by the matching alternatives, restricted to what the type
    /// supports.
    #[must_use]
    pub fn aggregations_for(&self, definition: &AttributeDefinition) -> BTreeSet<Aggregation> {
        let t = definition.attribute_type;
        self.filters
            .iter()
            .filter(|f| f.matches(definition))
            .flat_map(|f| f.aggregations().iter().copied())
            .filter(|a| t.supports(*a))
            .collect()
    }

    /// Placeholder definitions for exactly-named attributes that `found`
    /// does not cover.
    ///
    /// Only plain name-list alternatives contribute. A requested name is
    /// covered when `found` has it under a type the alternative accepts.
    /// A placeholder takes the alternative's type when it accepts exactly
    /// one, otherwise `preferred` if accepted, otherwise its first type.
    #[must_use]
    pub fn missing_exact(
        &self,
        found: &[AttributeDefinition],
        preferred: AttributeType,
    ) -> Vec<AttributeDefinition> {
        let mut missing = BTreeSet::new();
        for f in &self.filters {
            let Some(names) = f.name_eq() else {
                continue;
            };
            if !f.must_match_any.is_empty() {
                continue;
            }
            let t = match f.type_in() {
                [only] => *only,
                types if types.contains(&preferred) => preferred,
                [first, ..] => *first,
                [] => continue,
            };
            for name in names {
                let covered = found
                    .iter()
                    .any(|d| &d.name == name && f.type_in.contains(&d.attribute_type));
                if !covered {
                    missing.insert(AttributeDefinition::new(name.clone(), t));
                }
            }
        }
        missing.into_iter().collect()
    }

    /// Exact names when every alternative is a plain name list.
    #[must_use]
    pub fn exact_names(&self) -> Option<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        for f in &self.filters {
            if !f.must_match_any.is_empty() {
                return None;
            }
            out.extend(f.name_eq()?.iter().cloned());
        }
        Some(out)
    }
}

impl From<AttributeFilter> for AttributeSelection {
    fn from(filter: AttributeFilter) -> Self {
        Self {
            filters: vec![filter],
        }
    }
}

impl From<&[&str]> for AttributeSelection {
    fn from(names: &[&str]) -> Self {
        Self::names(names.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for AttributeSelection {
    fn from(names: [&str; N]) -> Self {
        Self::names(names)
    }
}

impl From<Vec<String>> for AttributeSelection {
    fn from(names: Vec<String>) -> Self {
        Self::names(names)
    }
}

impl BitOr for AttributeFilter {
    type Output = AttributeSelection;

    fn bitor(self, rhs: Self) -> AttributeSelection {
        AttributeSelection {
            filters: vec![self, rhs],
        }
    }
}

impl BitOr<AttributeFilter> for AttributeSelection {
    type Output = Self;

    fn bitor(mut self, rhs: AttributeFilter) -> Self {
        self.filters.push(rhs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, t: AttributeType) -> AttributeDefinition {
        AttributeDefinition::new(name, t)
    }

    #[test]
    fn test_default_selects_everything() {
        let f = AttributeFilter::default();
        assert!(f.matches(&def("anything", AttributeType::Bool)));
        assert_eq!(f.aggregations(), &[Aggregation::Last]);
    }

    #[test]
    fn test_names_exact() {
        let f = AttributeFilter::names(["metrics/loss"]);
        assert!(f.matches(&def("metrics/loss", AttributeType::FloatSeries)));
        assert!(!f.matches(&def("metrics/loss2", AttributeType::FloatSeries)));
    }

    #[test]
    fn test_regex_and_types() {
        let f = AttributeFilter::regex("^metrics/")
            .unwrap()
            .with_types([AttributeType::FloatSeries]);
        assert!(f.matches(&def("metrics/acc", AttributeType::FloatSeries)));
        assert!(!f.matches(&def("metrics/acc", AttributeType::Float)));
        assert!(!f.matches(&def("params/lr", AttributeType::FloatSeries)));
    }

    #[test]
    fn test_name_filter_must_not_match() {
        let nf = AttributeNameFilter::new(["^metrics/"], ["val"]).unwrap();
        assert!(nf.matches("metrics/train_loss"));
        assert!(!nf.matches("metrics/val_loss"));
    }

    #[test]
    fn test_bad_regex() {
        assert!(matches!(AttributeFilter::regex("(").unwrap_err(), Error::Regex(_)));
    }

    #[test]
    fn test_empty_aggregations_rejected() {
        assert!(AttributeFilter::new().with_aggregations([]).is_err());
    }

    #[test]
    fn test_selection_union_of_aggregations() {
        let a = AttributeFilter::names(["loss"])
            .with_aggregations([Aggregation::Min])
            .unwrap();
        let b = AttributeFilter::names(["loss"])
            .with_aggregations([Aggregation::Max, Aggregation::Last])
            .unwrap();
        let sel = a | b;
        let aggs = sel.aggregations_for(&def("loss", AttributeType::FloatSeries));
        assert_eq!(
            aggs.into_iter().collect::<Vec<_>>(),
            vec![Aggregation::Last, Aggregation::Min, Aggregation::Max]
        );
        assert!(sel
            .aggregations_for(&def("loss", AttributeType::Float))
            .is_empty());
    }

    #[test]
    fn test_missing_exact_names_get_placeholders() {
        let sel: AttributeSelection = ["params/lr", "params/absent"].into();
        let found = [def("params/lr", AttributeType::Float)];
        assert_eq!(
            sel.missing_exact(&found, AttributeType::String),
            vec![def("params/absent", AttributeType::String)]
        );

        let typed: AttributeSelection = AttributeFilter::names(["m"])
            .with_types([AttributeType::FloatSeries])
            .into();
        assert_eq!(
            typed.missing_exact(&[def("m", AttributeType::Float)], AttributeType::String),
            vec![def("m", AttributeType::FloatSeries)]
        );

        let regex = AttributeSelection::regex("^nothing").unwrap();
        assert!(regex.missing_exact(&[], AttributeType::String).is_empty());
    }

    #[test]
    fn test_exact_names() {
        let sel: AttributeSelection = ["a", "b"].into();
        assert_eq!(sel.exact_names().unwrap().len(), 2);
        let sel = AttributeSelection::regex("a").unwrap();
        assert!(sel.exact_names().is_none());
    }
}
