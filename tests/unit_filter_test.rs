// tests/unit_filter_test.rs

use flotilla::FlotillaError;
use flotilla::core::rpc::filter::Filter;
use serde_json::json;

fn matches(source: &str, row: &serde_json::Value) -> bool {
    Filter::parse(source).unwrap().unwrap().matches(row)
}

#[test]
fn test_empty_filter_matches_everything() {
    assert!(Filter::parse("").unwrap().is_none());
    assert!(Filter::parse("   ").unwrap().is_none());
}

#[test]
fn test_equality_and_inequality() {
    let row = json!({ "status": "running", "namespace": "default" });
    assert!(matches("status == \"running\"", &row));
    assert!(!matches("status == \"failed\"", &row));
    assert!(matches("status != \"failed\"", &row));
}

#[test]
fn test_boolean_composition() {
    let row = json!({ "status": "running", "namespace": "default" });
    assert!(matches(
        "status == \"running\" and namespace == \"default\"",
        &row
    ));
    assert!(matches(
        "status == \"failed\" or namespace == \"default\"",
        &row
    ));
    assert!(!matches(
        "status == \"failed\" and namespace == \"default\"",
        &row
    ));
    assert!(matches("not status == \"failed\"", &row));
    assert!(matches(
        "(status == \"failed\" or status == \"running\") and namespace == \"default\"",
        &row
    ));
}

#[test]
fn test_nested_selectors() {
    let row = json!({ "task_groups": { "web": { "promoted": true } } });
    assert!(matches("task_groups.web.promoted == \"true\"", &row));
    assert!(!matches("task_groups.web.missing == \"true\"", &row));
}

#[test]
fn test_matches_operator() {
    let row = json!({ "id": "deploy-abc123" });
    assert!(matches("id matches \"^deploy-\"", &row));
    assert!(!matches("id matches \"^alloc-\"", &row));
}

#[test]
fn test_contains_operator() {
    let row = json!({ "description": "rolling back to job version 0" });
    assert!(matches("description contains \"rolling back\"", &row));
}

#[test]
fn test_parse_errors() {
    assert!(matches!(
        Filter::parse("status =="),
        Err(FlotillaError::InvalidRequest(_))
    ));
    assert!(matches!(
        Filter::parse("status == \"unterminated"),
        Err(FlotillaError::InvalidRequest(_))
    ));
    assert!(matches!(
        Filter::parse("(status == \"x\""),
        Err(FlotillaError::InvalidRequest(_))
    ));
    assert!(matches!(
        Filter::parse("id matches \"[unclosed\""),
        Err(FlotillaError::InvalidRequest(_))
    ));
}
