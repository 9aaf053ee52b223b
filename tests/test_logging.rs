//! Tests for logging configuration and format parsing
//!
//! Exercises the pure parsing helpers and checks that initialization is safe
//! to repeat, since every binary and several tests call it.

use sensor_sim::observability::logging::{
    build_filter, init_logging, init_with_verbosity, parse_level, parse_spans_flag, LogFormat,
};
use sensor_sim::{action_span, lifecycle_span, session_span};
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert!(matches!(LogFormat::parse("JSON"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("Pretty"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("COMPACT"), LogFormat::Compact));
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Unknown formats stay machine-readable
    assert!(matches!(LogFormat::parse("yaml"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("123"), LogFormat::Json));
    assert!(matches!(LogFormat::parse(" pretty "), LogFormat::Json));
}

#[test]
fn test_unknown_level_defaults_to_info() {
    assert_eq!(parse_level("verbose"), Level::INFO);
    assert_eq!(parse_level(""), Level::INFO);
    assert_eq!(parse_level("trace"), Level::TRACE);
}

#[test]
fn test_spans_flag_requires_true() {
    assert!(parse_spans_flag("TRUE"));
    assert!(!parse_spans_flag("1"));
    assert!(!parse_spans_flag(""));
}

#[test]
fn test_filter_clamps_transport_crates() {
    let rendered = build_filter(Level::TRACE).to_string();
    assert!(rendered.contains("rumqttc=warn"));
    assert!(rendered.contains("tokio=warn"));
}

#[test]
fn test_repeated_initialization_does_not_panic() {
    init_logging(Level::DEBUG, LogFormat::Compact, false);
    init_logging(Level::INFO, LogFormat::Json, true);
    init_with_verbosity(2);

    let session = session_span!(device_id = "dev1");
    let action = action_span!(action = "reboot");
    let lifecycle = lifecycle_span!(operation = "startup");
    let _guard = lifecycle.enter();
    tracing::info!(parent: &session, "session event");
    tracing::info!(parent: &action, "action event");
}
