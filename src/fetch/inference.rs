//! Attribute type inference ahead of translation
//!
//! Untyped attribute references are typed, in order, by their
//! aggregation, by the fixed system-attribute table, and finally by one
//! project-wide definition lookup covering every remaining name.

use std::collections::BTreeSet;

use tracing::debug;

use super::BatchFetcher;
use crate::attribute::{sys, Attribute, AttributeFilter};
use crate::context::ResolvedContext;
use crate::filter::Filter;
use crate::query::{QueryTranslator, TypeCatalog};
use crate::transport::SortSpec;
use crate::Result;

/// Names that only a backend lookup can type.
pub fn unresolved_names<'a>(attributes: impl IntoIterator<Item = &'a Attribute>) -> BTreeSet<String> {
    attributes
        .into_iter()
        .filter(|a| {
            a.attribute_type().is_none()
                && a.type_from_aggregation().is_none()
                && sys::known_type(a.name()).is_none()
        })
        .map(|a| a.name().to_string())
        .collect()
}

/// Catalog of backend types for every unresolved name in `attributes`.
///
/// # Errors
///
/// `FetchFailed` if the definition lookup exhausts its retries.
pub fn infer_types<'a>(
    fetcher: &BatchFetcher,
    ctx: &ResolvedContext,
    attributes: impl IntoIterator<Item = &'a Attribute>,
) -> Result<TypeCatalog> {
    let names = unresolved_names(attributes);
    let mut catalog = TypeCatalog::new();
    if names.is_empty() {
        return Ok(catalog);
    }
    let filter = AttributeFilter::names(names.iter().cloned());
    let definitions = fetcher.list_definitions(ctx, &[], &filter, 0)?;
    debug!(names = names.len(), found = definitions.len(), "inferred attribute types");
    catalog.extend(&definitions);
    Ok(catalog)
}

/// A filter and sort key ready to send.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    /// Translated filter, if one was given
    pub query: Option<String>,
    /// Sort key with its type resolved
    pub sort: SortSpec,
}

/// Type, then translate, a filter and sort key.
///
/// # Errors
///
/// `AmbiguousAttributeType` if an untyped name has several types in the
/// project, or `FetchFailed` from the lookup.
pub fn prepare(
    fetcher: &BatchFetcher,
    ctx: &ResolvedContext,
    filter: Option<&Filter>,
    sort: &SortSpec,
) -> Result<PreparedQuery> {
    let attributes = filter
        .into_iter()
        .flat_map(Filter::attributes)
        .chain(std::iter::once(&sort.attribute));
    let translator = QueryTranslator::new(infer_types(fetcher, ctx, attributes)?);
    let query = filter.map(|f| translator.translate(f)).transpose()?;
    let sort = SortSpec {
        attribute: translator.catalog().resolve(&sort.attribute)?,
        direction: sort.direction,
    };
    Ok(PreparedQuery { query, sort })
}
