use dialhub::types::FormParams;
use dialhub::verify::{compute_signature, verify_signature};

const AUTH_TOKEN: &str = "test_auth_token";
const URL: &str = "https://dialhub.example.com/v1/webhooks/sms";

fn sample_params() -> FormParams {
    let mut params = FormParams::new();
    params.insert("Body".to_string(), "hello".to_string());
    params.insert("From".to_string(), "+61400000001".to_string());
    params.insert("MessageSid".to_string(), "SM123".to_string());
    params.insert("To".to_string(), "+61255501234".to_string());
    params
}

#[test]
fn test_known_signature_vector() {
    let sig = compute_signature(AUTH_TOKEN, URL, &sample_params());
    assert_eq!(sig, "YWcWquidkjjDrk9zOVRnQwoGz9o=");
}

#[test]
fn test_known_signature_vector_no_params() {
    let sig = compute_signature(AUTH_TOKEN, URL, &FormParams::new());
    assert_eq!(sig, "IH0jQYRg5AXS27+bl0pcnmpugUU=");
}

#[test]
fn test_verify_accepts_matching_signature() {
    let params = sample_params();
    let sig = compute_signature(AUTH_TOKEN, URL, &params);
    assert!(verify_signature(AUTH_TOKEN, URL, &params, Some(&sig)));
}

#[test]
fn test_verify_rejects_missing_header() {
    assert!(!verify_signature(AUTH_TOKEN, URL, &sample_params(), None));
}

#[test]
fn test_verify_rejects_tampered_body() {
    let params = sample_params();
    let sig = compute_signature(AUTH_TOKEN, URL, &params);
    let mut tampered = params.clone();
    tampered.insert("Body".to_string(), "HELLO".to_string());
    assert!(!verify_signature(AUTH_TOKEN, URL, &tampered, Some(&sig)));
}

#[test]
fn test_verify_rejects_wrong_url() {
    let params = sample_params();
    let sig = compute_signature(AUTH_TOKEN, URL, &params);
    assert!(!verify_signature(
        AUTH_TOKEN,
        "https://dialhub.example.com/v1/webhooks/voice",
        &params,
        Some(&sig)
    ));
}

#[test]
fn test_verify_rejects_garbage_header() {
    assert!(!verify_signature(
        AUTH_TOKEN,
        URL,
        &sample_params(),
        Some("not base64!!!")
    ));
}

#[test]
fn test_signature_is_order_independent() {
    // FormParams is a sorted map, so insertion order never leaks into the
    // signed string.
    let mut reversed = FormParams::new();
    reversed.insert("To".to_string(), "+61255501234".to_string());
    reversed.insert("MessageSid".to_string(), "SM123".to_string());
    reversed.insert("From".to_string(), "+61400000001".to_string());
    reversed.insert("Body".to_string(), "hello".to_string());
    assert_eq!(
        compute_signature(AUTH_TOKEN, URL, &reversed),
        compute_signature(AUTH_TOKEN, URL, &sample_params())
    );
}
