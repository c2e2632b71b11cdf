//! Integration tests for envelope decoding and permission evaluation.
//!
//! These tests drive the public API the way the bridge engine does: decode a
//! client frame, then evaluate the decoded address and body against a rule
//! list loaded from TOML.

use std::sync::Arc;

use busbridge_core::{
    decode_frame, Authority, ErrorCode, PatternCache, PermissionMatcher, PermissionRule,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    inbound: Vec<PermissionRule>,
}

fn load(text: &str) -> PermissionMatcher {
    let file: RuleFile = toml::from_str(text).expect("rules must parse");
    PermissionMatcher::new(file.inbound, Arc::new(PatternCache::new()))
}

#[test]
fn test_decoded_send_is_checked_against_loaded_rules() {
    // Arrange
    let matcher = load(
        r#"
[[inbound]]
address = "orders"
match = { action = { kind = "create" } }
required_authority = "orders:write"

[[inbound]]
address_regex = "public\\..*"
"#,
    );
    let env = decode_frame(
        br#"{"type":"send","address":"orders","body":{"action":{"kind":"create","id":9}}}"#,
    )
    .unwrap();

    // Act
    let result = matcher.evaluate(env.address_or_empty(), Some(&env.body));

    // Assert
    assert!(result.matched);
    assert_eq!(result.required_authority, Some(Authority::new("orders:write")));
}

#[test]
fn test_decoded_publish_to_unlisted_address_is_denied() {
    let matcher = load(
        r#"
[[inbound]]
address_regex = "public\\..*"
"#,
    );
    let env = decode_frame(br#"{"type":"publish","address":"private.x","body":1}"#).unwrap();

    assert!(!matcher.evaluate(env.address_or_empty(), Some(&env.body)).matched);
}

#[test]
fn test_no_rules_section_means_default_deny() {
    let matcher = load("");
    assert!(!matcher.evaluate("anything", Some(&json!({}))).matched);
}

#[test]
fn test_malformed_frames_map_to_client_error_codes() {
    let cases: [(&[u8], ErrorCode); 4] = [
        (b"nope", ErrorCode::InvalidJson),
        (br#"{"address":"a"}"#, ErrorCode::MissingType),
        (br#"{"type":"send"}"#, ErrorCode::MissingAddress),
        (br#"{"type":"shout","address":"a"}"#, ErrorCode::InvalidType),
    ];

    for (frame, expected) in cases {
        let err = decode_frame(frame).unwrap_err();
        assert_eq!(err.code(), expected, "frame {:?}", String::from_utf8_lossy(frame));
    }
}
