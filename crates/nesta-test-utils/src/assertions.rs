use serde_json::Value;

/// Assert the response status is 2xx and return the JSON body.
pub fn assert_api_ok(status: u16, body: &Value) -> &Value {
    assert!(
        (200..300).contains(&status),
        "Expected success, got {status}: {body}"
    );
    body
}

/// Assert the response carries the expected status and machine code, and
/// that the error body has the standard shape.
pub fn assert_api_error(status: u16, body: &Value, expected_status: u16, expected_code: &str) {
    assert_eq!(
        status, expected_status,
        "Expected status {expected_status}, got {status}: {body}"
    );
    let code = body.get("code").and_then(|c| c.as_str());
    assert_eq!(
        code,
        Some(expected_code),
        "Expected code '{expected_code}', got {body}"
    );
    assert!(body.get("message").is_some(), "error body has no message: {body}");
    assert!(
        body.get("request_id").and_then(|r| r.as_str()).is_some(),
        "error body has no request_id: {body}"
    );
}
