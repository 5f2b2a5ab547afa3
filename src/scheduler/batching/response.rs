//! Batch response parsing and per-member routing.
//!
//! A batch wire call returns one body for N members. The parser turns it into
//! one result per member, aligned by index, and never fails: malformed input
//! degrades to "every member failed".

use serde_json::{json, Value};

use crate::error::{FailureKind, RequestFailure};
use crate::scheduler::request::{QueuedRequest, RequestOutcome, Response};
use crate::transport::ErrorClass;

/// Outcome for one batch member as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberResult {
    pub index: usize,
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
    pub status: u16,
}

impl MemberResult {
    fn ok(index: usize, response: String, status: u16) -> Self {
        Self { index, success: true, response: Some(response), error: None, status }
    }

    fn failed(index: usize, error: String, status: u16) -> Self {
        Self { index, success: false, response: None, error: Some(error), status }
    }
}

/// Parsed batch response.
#[derive(Debug, Clone, Default)]
pub struct BatchParseResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<MemberResult>,
    /// The body could not be parsed at all.
    pub malformed: bool,
}

impl BatchParseResult {
    /// Every reported member succeeded. Members the server did not report at
    /// all do not count against this.
    pub fn is_full_success(&self) -> bool {
        self.succeeded > 0 && self.failed == 0
    }

    pub fn is_partial_success(&self) -> bool {
        self.succeeded > 0 && self.failed > 0
    }

    pub fn is_full_failure(&self) -> bool {
        self.succeeded == 0
    }

    pub fn get(&self, index: usize) -> Option<&MemberResult> {
        self.results.get(index)
    }

    fn push(&mut self, result: MemberResult) {
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }
}

/// Parse a raw batch body into `expected` member results.
///
/// Recognized shapes:
/// - `{"results": [{"success"|"isSuccess", "response"|"data", "error"|"errorMessage", "statusCode"}]}`
/// - `{"successes": [...], "failures": [...]}` (failure indices follow the successes)
/// - a bare array, all success
///
/// Any other JSON object counts as success for every member with the whole
/// body as payload.
pub fn parse_batch_response(raw: &str, expected: usize) -> BatchParseResult {
    let mut parsed = BatchParseResult { total: expected, ..Default::default() };

    if raw.trim().is_empty() {
        parsed.failed = expected;
        return parsed;
    }

    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse batch response");
            return all_failed(expected, format!("Parse error: {e}"));
        }
    };

    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                parsed.push(MemberResult::ok(i, render(item), 200));
            }
        }
        Value::Object(ref map) => {
            if let Some(Value::Array(results)) = map.get("results") {
                parse_results(&mut parsed, results);
            } else if let (Some(successes), Some(failures)) =
                (map.get("successes"), map.get("failures"))
            {
                parse_success_failure(&mut parsed, successes, failures);
            } else {
                for i in 0..expected {
                    parsed.push(MemberResult::ok(i, raw.to_string(), 200));
                }
            }
        }
        _ => return all_failed(expected, "Parse error: batch response is not an object or array".into()),
    }
    parsed
}

fn parse_results(parsed: &mut BatchParseResult, results: &[Value]) {
    for (i, item) in results.iter().enumerate() {
        let Value::Object(item) = item else {
            continue;
        };
        let success = item
            .get("success")
            .and_then(Value::as_bool)
            .or_else(|| item.get("isSuccess").and_then(Value::as_bool))
            .unwrap_or(false);
        let response = item
            .get("response")
            .filter(|v| !v.is_null())
            .or_else(|| item.get("data").filter(|v| !v.is_null()))
            .map(render);
        let error = item
            .get("error")
            .filter(|v| !v.is_null())
            .or_else(|| item.get("errorMessage").filter(|v| !v.is_null()))
            .map(render);
        let status = item
            .get("statusCode")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(if success { 200 } else { 500 });

        parsed.push(MemberResult { index: i, success, response, error, status });
    }
}

fn parse_success_failure(parsed: &mut BatchParseResult, successes: &Value, failures: &Value) {
    let successes = successes.as_array().map(Vec::as_slice).unwrap_or_default();
    let failures = failures.as_array().map(Vec::as_slice).unwrap_or_default();

    for (i, item) in successes.iter().enumerate() {
        parsed.push(MemberResult::ok(i, render(item), 200));
    }
    let offset = successes.len();
    for (i, item) in failures.iter().enumerate() {
        let error = item
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        let status = item
            .get("statusCode")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(500);
        parsed.push(MemberResult::failed(offset + i, error, status));
    }
}

fn all_failed(expected: usize, message: String) -> BatchParseResult {
    let mut parsed = BatchParseResult { total: expected, malformed: true, ..Default::default() };
    for i in 0..expected {
        parsed.push(MemberResult::failed(i, message.clone(), 500));
    }
    parsed
}

/// Strings are passed through as-is, anything else as compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON error document delivered to a failed batch member.
pub fn error_document(status: u16, message: &str, error: &str) -> String {
    json!({
        "errorCode": status,
        "errorMessage": message,
        "error": error,
    })
    .to_string()
}

fn member_failure(status: u16, message: &str, error: &str, malformed: bool) -> RequestFailure {
    let kind = if malformed {
        FailureKind::Parse
    } else {
        match ErrorClass::from_status(status).failure_kind() {
            FailureKind::Unknown => FailureKind::Server,
            kind => kind,
        }
    };
    RequestFailure::new(kind, status, error_document(status, message, error))
}

/// Compute each member's outcome for a completed batch wire call, in member
/// order.
pub fn batch_outcomes(batch: &[QueuedRequest], outcome: &RequestOutcome) -> Vec<RequestOutcome> {
    let wire = match outcome {
        Ok(response) => response,
        Err(failure) => return batch.iter().map(|_| Err(failure.clone())).collect(),
    };
    if batch.is_empty() {
        return Vec::new();
    }

    let parsed = parse_batch_response(&wire.body, batch.len());

    if parsed.is_full_success() {
        return (0..batch.len())
            .map(|i| match parsed.get(i) {
                Some(r) if r.success => {
                    Ok(Response::new(r.response.clone().unwrap_or_default(), r.status))
                }
                // Missing member in an otherwise successful batch.
                _ => Ok(Response::new("{}", wire.status)),
            })
            .collect();
    }

    if parsed.is_partial_success() {
        tracing::warn!(
            succeeded = parsed.succeeded,
            total = parsed.total,
            "Batch partially succeeded"
        );
        return (0..batch.len())
            .map(|i| match parsed.get(i) {
                Some(r) if r.success => {
                    Ok(Response::new(r.response.clone().unwrap_or_default(), r.status))
                }
                Some(r) => {
                    let message = r.error.as_deref().unwrap_or("Unknown error");
                    Err(member_failure(r.status, message, message, false))
                }
                None => Err(member_failure(
                    500,
                    "No response from server for this request",
                    "Missing response",
                    false,
                )),
            })
            .collect();
    }

    tracing::error!(batch_size = batch.len(), "Batch completely failed");
    (0..batch.len())
        .map(|i| {
            let (message, status) = parsed
                .get(i)
                .map(|r| (r.error.as_deref().unwrap_or("Batch request failed"), r.status))
                .unwrap_or(("Batch request failed", 500));
            Err(member_failure(status, message, message, parsed.malformed))
        })
        .collect()
}

/// Deliver a batch wire outcome to every member, in member order.
pub fn route_batch_response(batch: &[QueuedRequest], outcome: &RequestOutcome) {
    for (req, member) in batch.iter().zip(batch_outcomes(batch, outcome)) {
        req.complete(member);
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
