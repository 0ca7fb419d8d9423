//! Runs driven by on-disk configuration
#![allow(clippy::unwrap_used, clippy::expect_used)]

use docguard_fusion::{
    Category, DeclaredContext, DocumentText, ErrorCategory, FusionConfig, FusionEngine,
    HeuristicClassifier, RunStatus, SafetyKind, TriggerKind,
};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::Arc;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(contents.as_bytes()).expect("write");
    file
}

#[tokio::test]
async fn custom_critical_category_blocks() {
    let file = write_config(
        r#"
[[safety.categories]]
kind = "cyber_threat"
severity = "medium"
patterns = [
    "port scan",
    { pattern = "project nightshade", tier = "critical" },
]
"#,
    );
    let cfg = FusionConfig::load_from_path(file.path()).expect("load");
    assert_eq!(cfg.safety.categories.len(), 1);

    let engine = FusionEngine::builder(cfg)
        .primary(Arc::new(HeuristicClassifier::new()))
        .build()
        .expect("engine");

    let record = engine
        .classify(
            &DocumentText::from_plain("Status update on Project Nightshade deployment."),
            &DeclaredContext::default(),
        )
        .await;
    assert_eq!(record.status, RunStatus::Blocked);
    assert_eq!(record.category, Category::Unsafe);
    assert!(record.hitl.has(TriggerKind::SafetyBlock));
    assert_eq!(record.trace.safety.flagged_kinds(), vec![SafetyKind::CyberThreat]);

    // Default categories were replaced, not merged
    let record = engine
        .classify(
            &DocumentText::from_plain("A discussion of ransomware trends."),
            &DeclaredContext::default(),
        )
        .await;
    assert!(record.content_safe);
}

#[tokio::test]
async fn stricter_review_threshold_from_file() {
    let file = write_config(
        r#"
[hitl]
low_confidence_threshold = 0.95
"#,
    );
    let cfg = FusionConfig::load_from_path(file.path()).expect("load");
    let engine = FusionEngine::builder(cfg).build().expect("engine");

    let record = engine
        .classify(
            &DocumentText::from_plain("Public announcement of our new opening hours."),
            &DeclaredContext::default(),
        )
        .await;
    assert_eq!(record.category, Category::Public);
    assert!(record.hitl.has(TriggerKind::LowConfidence));
}

#[test]
fn invalid_pattern_is_a_configuration_error() {
    let file = write_config(
        r#"
[[safety.categories]]
kind = "criminal"
severity = "high"
patterns = [{ pattern = "(unclosed", regex = true }]
"#,
    );
    let cfg = FusionConfig::load_from_path(file.path()).expect("parses and validates");
    let err = FusionEngine::builder(cfg).build().err().expect("compile fails");
    assert_eq!(err.category(), ErrorCategory::ConfigurationError);
}

#[test]
fn missing_file_is_a_configuration_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = FusionConfig::load_from_path(&dir.path().join("absent.toml")).expect_err("missing");
    assert_eq!(err.category(), ErrorCategory::ConfigurationError);
}

#[test]
fn out_of_range_value_rejected_at_load() {
    let file = write_config(
        r#"
[agreement]
conflict_threshold = 1.5
"#,
    );
    let err = FusionConfig::load_from_path(file.path()).expect_err("invalid");
    assert!(err.to_string().contains("agreement.conflict_threshold"));
}
