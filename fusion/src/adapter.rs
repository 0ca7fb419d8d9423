//! Classification adapters
//!
//! A classification adapter is any capability that turns an assembled prompt
//! into a category judgement: a remote model client, a local model, or the
//! offline [`HeuristicClassifier`]. Adapters return a loosely-typed
//! [`RawClassification`]; the pipeline validates it into a
//! [`ClassificationResult`] and discards anything malformed.

use crate::citations::CitationKind;
use crate::errors::{ClassificationError, FusionError, Result};
use crate::pii::PiiKind;
use crate::redact::Redactor;
use crate::safety::{SafetyKind, SafetySeverity};
use crate::types::{Category, Provenance};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// Structured summary of scanner output, sent alongside the prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceDigest {
    pub page_count: usize,
    pub pii_count: usize,
    pub pii_kinds: Vec<PiiKind>,
    pub high_risk_pii: bool,
    pub safety_kinds: Vec<SafetyKind>,
    pub max_safety_severity: Option<SafetySeverity>,
    pub claimed_public: bool,
}

/// One classification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub provenance: Provenance,
    pub prompt: String,
    pub evidence: EvidenceDigest,
}

// ─────────────────────────────────────────────────────────────────────────────
// Response
// ─────────────────────────────────────────────────────────────────────────────

/// A citation asserted by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCitation {
    #[serde(default = "default_citation_kind")]
    pub kind: CitationKind,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

fn default_citation_kind() -> CitationKind {
    CitationKind::Text
}

/// Unvalidated adapter output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawClassification {
    pub category: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub citations: Vec<ModelCitation>,
    /// Per-category scores, when the adapter exposes them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_scores: Option<BTreeMap<String, f64>>,
}

impl RawClassification {
    pub fn new(category: impl Into<String>, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            confidence,
            reasoning: reasoning.into(),
            citations: Vec::new(),
            category_scores: None,
        }
    }

    pub fn with_scores(mut self, scores: BTreeMap<String, f64>) -> Self {
        self.category_scores = Some(scores);
        self
    }

    /// Parse free-form model output.
    ///
    /// Accepts bare JSON, a fenced ```json block, or the outermost `{...}`
    /// region of surrounding prose.
    pub fn from_model_text(text: &str) -> std::result::Result<Self, ClassificationError> {
        let value = extract_json_object(text).ok_or_else(|| {
            ClassificationError::Malformed(format!(
                "no JSON object found ({} bytes analyzed)",
                text.len()
            ))
        })?;
        serde_json::from_value(value)
            .map_err(|e| ClassificationError::Malformed(format!("unexpected response shape: {e}")))
    }

    /// Validate into a typed result.
    ///
    /// Unknown categories and confidences outside [0,1] are rejected rather
    /// than clamped. Malformed per-category scores are dropped.
    pub fn validate(self, provenance: Provenance, adapter: &str) -> Result<ClassificationResult> {
        let category: Category = self.category.parse().map_err(|e: String| {
            FusionError::validation(format!("{provenance} response from {adapter}: {e}"))
        })?;

        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(FusionError::validation(format!(
                "{provenance} response from {adapter}: confidence {} outside [0, 1]",
                self.confidence
            )));
        }

        let category_scores = self.category_scores.and_then(|raw| {
            let parsed: Option<BTreeMap<Category, f64>> = raw
                .into_iter()
                .map(|(name, score)| {
                    let category = name.parse::<Category>().ok()?;
                    (score.is_finite() && (0.0..=1.0).contains(&score)).then_some((category, score))
                })
                .collect();
            if parsed.is_none() {
                tracing::warn!(%provenance, adapter, "Ignoring malformed category scores");
            }
            parsed
        });

        Ok(ClassificationResult {
            category,
            confidence: self.confidence,
            reasoning: self.reasoning,
            provenance,
            adapter: adapter.to_string(),
            citations: self.citations,
            category_scores,
        })
    }
}

/// Validated classification from one adapter call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub confidence: f64,
    pub reasoning: String,
    pub provenance: Provenance,
    pub adapter: String,
    #[serde(default)]
    pub citations: Vec<ModelCitation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_scores: Option<BTreeMap<Category, f64>>,
}

impl ClassificationResult {
    /// Mask raw values a model echoed into its reasoning or citations.
    pub fn redacted(mut self, redactor: &Redactor) -> Self {
        self.reasoning = redactor.scrub(&self.reasoning).into_owned();
        for citation in &mut self.citations {
            citation.excerpt = redactor.scrub(&citation.excerpt).into_owned();
        }
        self
    }

    /// Difference between the two highest category scores
    pub fn top_two_margin(&self) -> Option<f64> {
        let scores = self.category_scores.as_ref()?;
        let mut values: Vec<f64> = scores.values().copied().collect();
        if values.len() < 2 {
            return None;
        }
        values.sort_by(|a, b| b.total_cmp(a));
        Some(values[0] - values[1])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Extract a JSON object from model output
///
/// Tries, in order:
/// 1. Direct parse of the trimmed text
/// 2. The last ```json (or bare ```) fenced block
/// 3. The region from the first `{` to the last `}`
pub fn extract_json_object(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(json @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(json);
    }

    if let Some(fenced) = extract_from_markdown_fence(trimmed)
        && let Ok(json @ Value::Object(_)) = serde_json::from_str::<Value>(fenced)
    {
        return Some(json);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(json @ Value::Object(_)) => Some(json),
        _ => {
            tracing::debug!(bytes = content.len(), "No parseable JSON object in model output");
            None
        }
    }
}

fn extract_from_markdown_fence(content: &str) -> Option<&str> {
    let open = content.rfind("```json").map(|i| i + "```json".len()).or_else(|| {
        let first = content.find("```")?;
        Some(first + 3)
    })?;
    let body = &content[open..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

// ─────────────────────────────────────────────────────────────────────────────
// Adapter trait and built-in adapters
// ─────────────────────────────────────────────────────────────────────────────

/// A classification capability
///
/// Implementations must be safe to call concurrently; the pipeline invokes
/// the primary and secondary adapters at the same time.
#[async_trait]
pub trait ClassificationAdapter: Send + Sync {
    /// Short identifier recorded in results and traces
    fn name(&self) -> &str;

    /// Classify one request
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> std::result::Result<RawClassification, ClassificationError>;
}

/// Offline adapter that derives a category from the evidence digest.
///
/// Safety findings dominate, then high-risk PII, then any PII. Documents
/// with no evidence are classified Public.
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    name: String,
}

impl HeuristicClassifier {
    pub const DEFAULT_NAME: &'static str = "heuristic";

    pub fn new() -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
        }
    }

    /// Pure decision used by [`ClassificationAdapter::classify`]
    pub fn judge(evidence: &EvidenceDigest) -> RawClassification {
        let (category, confidence, reasoning) = if evidence
            .max_safety_severity
            .is_some_and(|s| s.is_high())
        {
            (
                Category::Unsafe,
                0.80,
                format!(
                    "High-severity safety concerns detected: {}",
                    join_display(&evidence.safety_kinds)
                ),
            )
        } else if evidence.high_risk_pii {
            (
                Category::HighlySensitive,
                0.85,
                format!(
                    "Document contains high-risk personal data: {}",
                    join_display(&evidence.pii_kinds)
                ),
            )
        } else if evidence.pii_count > 0 || !evidence.safety_kinds.is_empty() {
            let mut reasons = Vec::new();
            if evidence.pii_count > 0 {
                reasons.push(format!("personal data ({})", join_display(&evidence.pii_kinds)));
            }
            if !evidence.safety_kinds.is_empty() {
                reasons.push(format!(
                    "lower-severity safety concerns ({})",
                    join_display(&evidence.safety_kinds)
                ));
            }
            let confidence = if evidence.safety_kinds.is_empty() { 0.75 } else { 0.65 };
            (
                Category::Confidential,
                confidence,
                format!("Document contains {}", reasons.join(" and ")),
            )
        } else {
            (
                Category::Public,
                0.90,
                "No personal data or safety concerns detected".to_string(),
            )
        };

        let scores = Category::all()
            .into_iter()
            .map(|c| {
                let score = if c == category {
                    confidence
                } else {
                    (1.0 - confidence) / 3.0
                };
                (c.as_str().to_string(), score)
            })
            .collect();

        RawClassification::new(category.as_str(), confidence, reasoning).with_scores(scores)
    }
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn join_display<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl ClassificationAdapter for HeuristicClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> std::result::Result<RawClassification, ClassificationError> {
        Ok(Self::judge(&request.evidence))
    }
}

/// Adapter that replays a fixed model response.
///
/// Used to classify with model output captured elsewhere.
#[derive(Debug, Clone)]
pub struct CannedClassifier {
    name: String,
    response: String,
}

impl CannedClassifier {
    pub fn new(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: response.into(),
        }
    }
}

#[async_trait]
impl ClassificationAdapter for CannedClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(
        &self,
        _request: &ClassificationRequest,
    ) -> std::result::Result<RawClassification, ClassificationError> {
        RawClassification::from_model_text(&self.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_bare_json() {
        let raw = RawClassification::from_model_text(
            r#"{"category": "Confidential", "confidence": 0.8, "reasoning": "internal memo"}"#,
        )
        .expect("parse");
        assert_eq!(raw.category, "Confidential");
        assert_eq!(raw.confidence, 0.8);
        assert!(raw.citations.is_empty());
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "Here is my answer:\n```json\n{\"category\": \"Public\", \"confidence\": 0.9}\n```\nThanks.";
        let raw = RawClassification::from_model_text(text).expect("parse");
        assert_eq!(raw.category, "Public");
    }

    #[test]
    fn test_parse_brace_region_with_citations() {
        let text = r#"Sure. {"category": "Highly Sensitive", "confidence": 0.7,
            "citations": [{"page": 2, "excerpt": "SSN listed", "relevance": 0.9},
                          {"kind": "image", "page": 3, "region": "img-1", "excerpt": "ID card"}]}
            Let me know."#;
        let raw = RawClassification::from_model_text(text).expect("parse");
        assert_eq!(raw.citations.len(), 2);
        assert_eq!(raw.citations[0].kind, CitationKind::Text);
        assert_eq!(raw.citations[1].kind, CitationKind::Image);
        assert_eq!(raw.citations[1].region.as_deref(), Some("img-1"));
    }

    #[test]
    fn test_parse_failures_are_malformed() {
        let err = RawClassification::from_model_text("I cannot classify this.").expect_err("no json");
        assert!(!err.is_retryable());
        let err = RawClassification::from_model_text(r#"{"label": "Public"}"#).expect_err("shape");
        assert!(matches!(err, ClassificationError::Malformed(_)));
    }

    #[test]
    fn test_validate_rejects_out_of_range_and_unknown() {
        let bad_conf = RawClassification::new("Public", 1.2, "");
        assert!(bad_conf.validate(Provenance::Primary, "m").is_err());

        let bad_cat = RawClassification::new("Secret", 0.5, "");
        let err = bad_cat.validate(Provenance::Secondary, "m").expect_err("unknown");
        assert_eq!(err.category(), crate::ErrorCategory::ValidationError);
    }

    #[test]
    fn test_validate_normalizes_category_and_scores() {
        let scores = BTreeMap::from([
            ("Public".to_string(), 0.48),
            ("Confidential".to_string(), 0.45),
        ]);
        let result = RawClassification::new("highly_sensitive", 0.5, "r")
            .with_scores(scores)
            .validate(Provenance::Primary, "m")
            .expect("valid");
        assert_eq!(result.category, Category::HighlySensitive);
        let margin = result.top_two_margin().expect("margin");
        assert!((margin - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_redacted_masks_echoed_values() {
        let text = r#"{"category": "HighlySensitive", "confidence": 0.9,
            "reasoning": "Lists SSN 123-45-6789 for jane.doe@corp.org",
            "citations": [{"page": 1, "excerpt": "SSN: 123-45-6789"}]}"#;
        let result = RawClassification::from_model_text(text)
            .expect("parse")
            .validate(Provenance::Primary, "m")
            .expect("valid")
            .redacted(&Redactor::new(4).expect("redactor"));
        assert_eq!(result.reasoning, "Lists SSN ***-**-6789 for ****.***@****.***");
        assert_eq!(result.citations[0].excerpt, "SSN: ***-**-6789");
    }

    #[test]
    fn test_malformed_scores_are_dropped() {
        let scores = BTreeMap::from([("Nope".to_string(), 0.5), ("Public".to_string(), 0.4)]);
        let result = RawClassification::new("Public", 0.9, "")
            .with_scores(scores)
            .validate(Provenance::Primary, "m")
            .expect("valid");
        assert_eq!(result.category_scores, None);
    }

    #[test]
    fn test_heuristic_judgements() {
        let public = HeuristicClassifier::judge(&EvidenceDigest::default());
        assert_eq!(public.category, "Public");
        assert_eq!(public.confidence, 0.90);

        let pii = HeuristicClassifier::judge(&EvidenceDigest {
            pii_count: 1,
            pii_kinds: vec![PiiKind::NationalId],
            high_risk_pii: true,
            ..Default::default()
        });
        assert_eq!(pii.category, "HighlySensitive");

        let email_only = HeuristicClassifier::judge(&EvidenceDigest {
            pii_count: 1,
            pii_kinds: vec![PiiKind::Email],
            ..Default::default()
        });
        assert_eq!(email_only.category, "Confidential");

        let unsafe_doc = HeuristicClassifier::judge(&EvidenceDigest {
            safety_kinds: vec![SafetyKind::Violence],
            max_safety_severity: Some(SafetySeverity::High),
            ..Default::default()
        });
        assert_eq!(unsafe_doc.category, "Unsafe");
    }

    #[tokio::test]
    async fn test_canned_classifier_replays_response() {
        let adapter = CannedClassifier::new("canned", "```json\n{\"category\":\"Unsafe\",\"confidence\":0.75}\n```");
        let request = ClassificationRequest {
            provenance: Provenance::Secondary,
            prompt: String::new(),
            evidence: EvidenceDigest::default(),
        };
        let raw = adapter.classify(&request).await.expect("classify");
        assert_eq!(raw.category, "Unsafe");
        assert_eq!(adapter.name(), "canned");
    }
}
