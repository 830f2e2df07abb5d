use super::*;
use serde_json::json;

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[test]
fn empty_filter_matches_everything() {
    let filter = Filter::new();
    assert!(filter.is_unrestricted());
    assert!(filter.matches(&row(json!({"id": "a"}))));
}

#[test]
fn eq_and_in_are_conjunctive() {
    let filter = Filter::new().eq("session_id", "s1").is_in("name", ["ann", "bob"]);
    assert!(filter.matches(&row(json!({"session_id": "s1", "name": "bob"}))));
    assert!(!filter.matches(&row(json!({"session_id": "s2", "name": "bob"}))));
    assert!(!filter.matches(&row(json!({"session_id": "s1", "name": "cy"}))));
}

#[test]
fn empty_in_list_matches_nothing() {
    let filter = Filter::new().is_in::<&str>("participant_id", []);
    assert!(!filter.matches(&row(json!({"participant_id": "p1"}))));
}

#[test]
fn missing_column_does_not_match() {
    let filter = Filter::new().eq("is_online", true);
    assert!(!filter.matches(&row(json!({"name": "ann"}))));
}

#[test]
fn sort_orders_numbers_ascending_and_descending() {
    let mut rows = vec![row(json!({"order_index": 2})), row(json!({"order_index": 0})), row(json!({"order_index": 1}))];
    Filter::new().order_by("order_index").sort(&mut rows);
    let got: Vec<_> = rows.iter().map(|r| r["order_index"].clone()).collect();
    assert_eq!(got, vec![json!(0), json!(1), json!(2)]);

    Filter::new().order_by_desc("order_index").sort(&mut rows);
    assert_eq!(rows[0]["order_index"], json!(2));
}

#[test]
fn validate_rejects_foreign_columns() {
    assert!(Filter::new().eq("session_id", "x").order_by("order_index").validate(ResourceKind::Tasks).is_ok());
    let err = Filter::new().order_by("bogus").validate(ResourceKind::Tasks).unwrap_err();
    assert!(matches!(err, StoreError::UnknownColumn { ref column, .. } if column == "bogus"));
}

#[test]
fn display_renders_query_string() {
    let filter = Filter::new().eq("session_id", "abc").is_in("task_id", ["t1", "t2"]).order_by("order_index");
    assert_eq!(filter.to_string(), "session_id=eq.abc&task_id=in.(t1,t2)&order=order_index.asc");
    assert_eq!(Filter::new().eq("is_online", true).to_string(), "is_online=eq.true");
}
