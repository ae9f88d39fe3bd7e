//! Tests for error and warning types

use trueno_fetch::transport::TransportError;
use trueno_fetch::{Error, Warning};

#[test]
fn test_invalid_predicate_error() {
    let error = Error::InvalidPredicate {
        attribute: "sys/tags".to_string(),
        reason: "ordering not supported".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid predicate"));
    assert!(error_str.contains("sys/tags"));
    assert!(error_str.contains("ordering not supported"));
    assert!(error.is_construction_error());
}

#[test]
fn test_ambiguous_attribute_type_error() {
    let error = Error::AmbiguousAttributeType {
        attribute: "score".to_string(),
        types: "float, string".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("score"));
    assert!(error_str.contains("float, string"));
    assert!(error_str.contains("explicitly"));
    assert!(error.is_construction_error());
}

#[test]
fn test_unsupported_aggregation_error() {
    let error = Error::UnsupportedAggregation {
        attribute: "metrics/acc".to_string(),
        aggregation: "max".to_string(),
        reason: "EXISTS takes a bare attribute".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("`max`"));
    assert!(error_str.contains("metrics/acc"));
}

#[test]
fn test_fetch_failed_names_page_and_cause() {
    let error = Error::FetchFailed {
        operation: "attribute values",
        page: 3,
        detail: "50 run(s) x 2 attribute(s)".to_string(),
        attempts: 3,
        source: TransportError::Transient("connection reset".to_string()),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("attribute values page 3"));
    assert!(error_str.contains("after 3 attempt(s)"));
    assert!(error_str.contains("connection reset"));
    assert!(std::error::Error::source(&error).is_some());
    assert!(!error.is_construction_error());
}

#[test]
fn test_ambiguous_column_type_error() {
    let error = Error::AmbiguousColumnType {
        attribute: "score".to_string(),
        types: "float, string".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Conflicting types for column `score`"));
    assert!(error_str.contains("type_suffix_in_column_names"));
}

#[test]
fn test_missing_context_error() {
    let error = Error::MissingContext("API token");
    let error_str = format!("{error}");
    assert!(error_str.contains("Missing API token"));
}

#[test]
fn test_invalid_input_error() {
    let error = Error::InvalidInput("limit must be positive".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid input"));
    assert!(error_str.contains("limit must be positive"));
}

#[test]
fn test_regex_error_from() {
    #[allow(clippy::invalid_regex)]
    let regex_err = regex::Regex::new("(unclosed").unwrap_err();
    let error: Error = regex_err.into();
    assert!(format!("{error}").contains("Regex error"));
}

#[test]
fn test_io_error_from() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_err.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_warning_messages() {
    let truncated = Warning::ResultTruncated {
        returned: 5000,
        backend_max: 5000,
    };
    assert!(truncated.to_string().contains("5000"));
    let clamped = Warning::LimitClamped {
        requested: 9000,
        backend_max: 5000,
    };
    let s = clamped.to_string();
    assert!(s.contains("9000"));
    assert!(s.contains("5000"));
}

#[test]
fn test_error_debug_format() {
    let error = Error::NotFound("run RUN-9".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("NotFound"));
}
