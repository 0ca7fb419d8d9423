//! Human-in-the-loop trigger evaluation
//!
//! Each check is independent and only ever adds a reason. The decision is
//! triggered iff at least one reason is present.

use crate::agreement::AgreementAssessment;
use crate::config::HitlConfig;
use crate::pii::PiiFinding;
use crate::safety::SafetyReport;
use crate::types::{Category, DeclaredContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Reason a run requires human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    LowConfidence,
    PiiInPublicDocument,
    HighSeveritySafety,
    DualModelDisagreement,
    NearTiedCategories,
    SafetyBlock,
    ClassificationUnavailable,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowConfidence => "low_confidence",
            Self::PiiInPublicDocument => "pii_in_public_document",
            Self::HighSeveritySafety => "high_severity_safety",
            Self::DualModelDisagreement => "dual_model_disagreement",
            Self::NearTiedCategories => "near_tied_categories",
            Self::SafetyBlock => "safety_block",
            Self::ClassificationUnavailable => "classification_unavailable",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of the review request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPriority {
    Low,
    Medium,
    High,
}

impl ReviewPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Whether and why a run needs human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitlDecision {
    pub triggered: bool,
    pub reasons: BTreeSet<TriggerKind>,
    pub priority: ReviewPriority,
}

impl HitlDecision {
    fn new(reasons: BTreeSet<TriggerKind>, priority: ReviewPriority) -> Self {
        Self {
            triggered: !reasons.is_empty(),
            reasons,
            priority,
        }
    }

    pub fn has(&self, kind: TriggerKind) -> bool {
        self.reasons.contains(&kind)
    }
}

/// Inputs to one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct HitlInput<'a> {
    pub category: Category,
    pub confidence: f64,
    pub pii: &'a [PiiFinding],
    pub safety: &'a SafetyReport,
    pub agreement: Option<&'a AgreementAssessment>,
    pub declared: &'a DeclaredContext,
    /// Reasons already established by the orchestrator
    pub preset: &'a [TriggerKind],
}

/// Applies the configured review triggers.
#[derive(Debug, Clone)]
pub struct HitlEvaluator {
    low_confidence_threshold: f64,
    near_tie_margin: f64,
}

impl HitlEvaluator {
    pub fn new(cfg: &HitlConfig) -> Self {
        Self {
            low_confidence_threshold: cfg.low_confidence_threshold,
            near_tie_margin: cfg.near_tie_margin,
        }
    }

    pub fn evaluate(&self, input: &HitlInput<'_>) -> HitlDecision {
        let mut reasons: BTreeSet<TriggerKind> = input.preset.iter().copied().collect();
        let pii_present = !input.pii.is_empty();

        if input.confidence < self.low_confidence_threshold {
            reasons.insert(TriggerKind::LowConfidence);
        }
        if pii_present && (input.declared.claimed_public || input.category == Category::Public) {
            reasons.insert(TriggerKind::PiiInPublicDocument);
        }
        if input.safety.has_high_severity() {
            reasons.insert(TriggerKind::HighSeveritySafety);
        }
        if let Some(assessment) = input.agreement {
            if assessment.conflict {
                reasons.insert(TriggerKind::DualModelDisagreement);
            }
            let near_tie = assessment
                .results()
                .filter_map(|r| r.top_two_margin())
                .any(|margin| margin <= self.near_tie_margin);
            if near_tie {
                reasons.insert(TriggerKind::NearTiedCategories);
            }
        }

        let priority = if !input.safety.is_safe() || reasons.contains(&TriggerKind::SafetyBlock) {
            ReviewPriority::High
        } else if pii_present {
            ReviewPriority::Medium
        } else {
            ReviewPriority::Low
        };

        let decision = HitlDecision::new(reasons, priority);
        if decision.triggered {
            tracing::info!(
                reasons = ?decision.reasons,
                priority = decision.priority.as_str(),
                "Human review required"
            );
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RawClassification;
    use crate::agreement::AgreementResolver;
    use crate::config::{AgreementConfig, FusionConfig};
    use crate::types::{Location, Provenance};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn evaluator() -> HitlEvaluator {
        HitlEvaluator::new(&HitlConfig::default())
    }

    fn input<'a>(
        category: Category,
        confidence: f64,
        pii: &'a [PiiFinding],
        safety: &'a SafetyReport,
        declared: &'a DeclaredContext,
    ) -> HitlInput<'a> {
        HitlInput {
            category,
            confidence,
            pii,
            safety,
            agreement: None,
            declared,
            preset: &[],
        }
    }

    fn ssn_findings() -> Vec<PiiFinding> {
        FusionConfig::default()
            .compile()
            .expect("compile")
            .pii
            .scan_text("SSN: 123-45-6789", &Location::page(1))
    }

    #[test]
    fn test_clean_high_confidence_not_triggered() {
        let safety = SafetyReport::default();
        let declared = DeclaredContext::default();
        let d = evaluator().evaluate(&input(Category::Public, 0.9, &[], &safety, &declared));
        assert!(!d.triggered);
        assert!(d.reasons.is_empty());
        assert_eq!(d.priority, ReviewPriority::Low);
    }

    #[test]
    fn test_low_confidence_always_triggers() {
        let safety = SafetyReport::default();
        let declared = DeclaredContext::default();
        for category in Category::all() {
            let d = evaluator().evaluate(&input(category, 0.69, &[], &safety, &declared));
            assert!(d.triggered);
            assert!(d.has(TriggerKind::LowConfidence));
        }
        let d = evaluator().evaluate(&input(Category::Public, 0.70, &[], &safety, &declared));
        assert!(!d.has(TriggerKind::LowConfidence));
    }

    #[test]
    fn test_pii_in_public_document() {
        let pii = ssn_findings();
        let safety = SafetyReport::default();

        let claimed = DeclaredContext::claimed_public();
        let d = evaluator().evaluate(&input(Category::HighlySensitive, 0.9, &pii, &safety, &claimed));
        assert!(d.has(TriggerKind::PiiInPublicDocument));
        assert_eq!(d.priority, ReviewPriority::Medium);

        let undeclared = DeclaredContext::default();
        let d = evaluator().evaluate(&input(Category::Public, 0.9, &pii, &safety, &undeclared));
        assert!(d.has(TriggerKind::PiiInPublicDocument));

        let d = evaluator().evaluate(&input(Category::HighlySensitive, 0.9, &pii, &safety, &undeclared));
        assert!(!d.triggered);
    }

    #[test]
    fn test_high_severity_safety() {
        let safety = FusionConfig::default()
            .compile()
            .expect("compile")
            .safety
            .scan_text("Scenes of graphic violence.", &Location::page(1));
        let declared = DeclaredContext::default();
        let d = evaluator().evaluate(&input(Category::Unsafe, 0.9, &[], &safety, &declared));
        assert_eq!(d.reasons, BTreeSet::from([TriggerKind::HighSeveritySafety]));
        assert_eq!(d.priority, ReviewPriority::High);
    }

    #[test]
    fn test_disagreement_and_near_tie() {
        let scores = BTreeMap::from([
            ("Confidential".to_string(), 0.47),
            ("HighlySensitive".to_string(), 0.44),
            ("Public".to_string(), 0.09),
        ]);
        let primary = RawClassification::new("Confidential", 0.8, "")
            .with_scores(scores)
            .validate(Provenance::Primary, "a")
            .expect("valid");
        let secondary = RawClassification::new("Unsafe", 0.75, "")
            .validate(Provenance::Secondary, "b")
            .expect("valid");
        let assessment =
            AgreementResolver::new(&AgreementConfig::default()).assess(primary, Some(secondary));

        let safety = SafetyReport::default();
        let declared = DeclaredContext::default();
        let d = evaluator().evaluate(&HitlInput {
            agreement: Some(&assessment),
            ..input(assessment.resolved.category, assessment.resolved.confidence, &[], &safety, &declared)
        });
        assert!(d.has(TriggerKind::DualModelDisagreement));
        assert!(d.has(TriggerKind::NearTiedCategories));
    }

    #[test]
    fn test_preset_reasons_are_kept() {
        let safety = SafetyReport::default();
        let declared = DeclaredContext::default();
        let d = evaluator().evaluate(&HitlInput {
            preset: &[TriggerKind::ClassificationUnavailable],
            ..input(Category::HighlySensitive, 0.0, &[], &safety, &declared)
        });
        assert_eq!(
            d.reasons,
            BTreeSet::from([
                TriggerKind::LowConfidence,
                TriggerKind::ClassificationUnavailable
            ])
        );
        let json = serde_json::to_string(&d.reasons).expect("serialize");
        assert_eq!(json, r#"["low_confidence","classification_unavailable"]"#);
    }
}
