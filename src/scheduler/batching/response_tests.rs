use std::sync::Arc;

use super::*;
use crate::scheduler::policy::RequestConfig;
use crate::scheduler::request::HttpMethod;

fn members(n: usize) -> Vec<QueuedRequest> {
    (0..n)
        .map(|i| {
            QueuedRequest::new(
                "/events",
                format!(r#"{{"n":{i}}}"#),
                HttpMethod::Post,
                Arc::new(RequestConfig::default()),
            )
        })
        .collect()
}

fn ok(body: &str) -> RequestOutcome {
    Ok(Response::new(body, 200))
}

#[test]
fn parses_results_shape() {
    let raw = r#"{"results":[
        {"success":true,"response":{"id":1}},
        {"isSuccess":false,"errorMessage":"bad input","statusCode":422},
        {"success":true,"data":"plain"}
    ]}"#;
    let parsed = parse_batch_response(raw, 3);

    assert_eq!(parsed.succeeded, 2);
    assert_eq!(parsed.failed, 1);
    assert!(parsed.is_partial_success());
    assert_eq!(parsed.results[0].response.as_deref(), Some(r#"{"id":1}"#));
    assert_eq!(parsed.results[1].status, 422);
    assert_eq!(parsed.results[1].error.as_deref(), Some("bad input"));
    assert_eq!(parsed.results[2].response.as_deref(), Some("plain"));
}

#[test]
fn success_failure_shape_places_failures_after_successes() {
    let raw = r#"{"successes":[{"a":1},{"a":2}],"failures":[{"error":"nope","statusCode":400}]}"#;
    let parsed = parse_batch_response(raw, 3);

    assert_eq!(parsed.results.len(), 3);
    assert!(parsed.results[0].success && parsed.results[1].success);
    assert_eq!(parsed.results[2].index, 2);
    assert_eq!(parsed.results[2].status, 400);
}

#[test]
fn bare_array_is_all_success() {
    let parsed = parse_batch_response(r#"[{"a":1},{"a":2}]"#, 2);
    assert!(parsed.is_full_success());
    assert_eq!(parsed.results[1].response.as_deref(), Some(r#"{"a":2}"#));
}

#[test]
fn unknown_object_succeeds_with_whole_body() {
    let raw = r#"{"status":"ok"}"#;
    let parsed = parse_batch_response(raw, 2);
    assert!(parsed.is_full_success());
    assert!(parsed.results.iter().all(|r| r.response.as_deref() == Some(raw)));
}

#[test]
fn malformed_body_fails_everyone() {
    let parsed = parse_batch_response("{not json", 3);
    assert!(parsed.malformed);
    assert!(parsed.is_full_failure());
    assert!(parsed.results.iter().all(|r| r.error.as_deref().unwrap().starts_with("Parse error:")));
    assert!(parsed.results.iter().all(|r| r.status == 500));
}

#[test]
fn empty_body_fails_everyone() {
    let outcomes = batch_outcomes(&members(2), &ok(""));
    assert!(outcomes.iter().all(Result::is_err));
}

#[test]
fn partial_success_routes_by_index() {
    let raw = r#"{"results":[
        {"success":true,"response":"r0"},
        {"success":false,"error":"e1","statusCode":409},
        {"success":true,"response":"r2"},
        {"success":false,"error":"e3"},
        {"success":true,"response":"r4"}
    ]}"#;
    let outcomes = batch_outcomes(&members(5), &ok(raw));

    for i in [0, 2, 4] {
        assert_eq!(outcomes[i].as_ref().unwrap().body, format!("r{i}"));
    }
    let e1 = outcomes[1].as_ref().unwrap_err();
    assert_eq!(e1.status, 409);
    assert_eq!(e1.kind, FailureKind::Client);
    let doc: Value = serde_json::from_str(&e1.message).unwrap();
    assert_eq!(doc["errorCode"], 409);
    assert_eq!(doc["errorMessage"], "e1");

    let e3 = outcomes[3].as_ref().unwrap_err();
    assert_eq!(e3.status, 500);
    assert_eq!(e3.kind, FailureKind::Server);
}

#[test]
fn partial_success_with_missing_member_fails_that_member() {
    let raw = r#"{"results":[{"success":true,"response":"r0"},{"success":false,"error":"e1"}]}"#;
    let outcomes = batch_outcomes(&members(3), &ok(raw));

    let missing = outcomes[2].as_ref().unwrap_err();
    let doc: Value = serde_json::from_str(&missing.message).unwrap();
    assert_eq!(doc["errorMessage"], "No response from server for this request");
}

#[test]
fn full_success_with_missing_member_defaults_to_empty_object() {
    let raw = r#"{"results":[{"success":true,"response":"r0"},{"success":true,"response":"r1"}]}"#;
    let parsed = parse_batch_response(raw, 3);
    assert!(parsed.is_full_success());

    let outcomes = batch_outcomes(&members(3), &ok(raw));
    assert_eq!(outcomes[0].as_ref().unwrap().body, "r0");
    assert_eq!(outcomes[1].as_ref().unwrap().body, "r1");
    assert_eq!(outcomes[2].as_ref().unwrap().body, "{}");

    let outcomes = batch_outcomes(&members(2), &ok(r#"["r0"]"#));
    assert_eq!(outcomes[1].as_ref().unwrap().body, "{}");
}

#[test]
fn wire_failure_goes_to_every_member() {
    let failure = RequestFailure::new(FailureKind::Network, 0, "offline");
    let outcomes = batch_outcomes(&members(3), &Err(failure.clone()));
    assert!(outcomes.iter().all(|o| o.as_ref().unwrap_err() == &failure));
}

#[test]
fn parse_error_members_are_parse_failures() {
    let outcomes = batch_outcomes(&members(2), &ok("<html>"));
    assert!(outcomes
        .iter()
        .all(|o| o.as_ref().unwrap_err().kind == FailureKind::Parse));
}
