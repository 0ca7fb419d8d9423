//! Dual-model agreement resolution
//!
//! Composite agreement = weighted mean of
//! - category agreement: `1 - distance / 3` on the severity order
//! - confidence similarity: `1 - |c1 - c2|`
//!
//! Resolution never averages categories. At or above the conflict threshold
//! the primary result stands. Below it, differing categories resolve to the
//! more severe result; identical categories keep the primary category with
//! the lower of the two confidences.

use crate::adapter::ClassificationResult;
use crate::config::AgreementConfig;
use crate::types::{Category, Provenance, clamp_unit};
use serde::{Deserialize, Serialize};

/// How the resolved result was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    /// Only one result was available
    SingleModel,
    /// Agreement met the threshold; primary stands
    Agreed,
    /// Categories differed below the threshold; the more severe one wins
    MoreSevere,
    /// Same category below the threshold; confidence lowered
    LoweredConfidence,
}

/// The category/confidence the pipeline proceeds with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub category: Category,
    pub confidence: f64,
    pub reasoning: String,
    /// Result whose category was adopted
    pub source: Provenance,
    pub rule: ResolutionRule,
}

/// Outcome of comparing the primary and secondary results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementAssessment {
    pub primary: ClassificationResult,
    pub secondary: Option<ClassificationResult>,
    pub category_agreement: f64,
    pub confidence_similarity: f64,
    pub agreement: f64,
    pub conflict: bool,
    pub resolved: Resolved,
}

impl AgreementAssessment {
    /// Results that fed the assessment
    pub fn results(&self) -> impl Iterator<Item = &ClassificationResult> {
        std::iter::once(&self.primary).chain(self.secondary.as_ref())
    }
}

/// Category agreement component
pub fn category_agreement(a: Category, b: Category) -> f64 {
    1.0 - f64::from(a.distance(b)) / f64::from(Category::MAX_DISTANCE)
}

/// Confidence similarity component
pub fn confidence_similarity(a: f64, b: f64) -> f64 {
    clamp_unit(1.0 - (a - b).abs())
}

/// Resolves primary/secondary results under configured weights.
#[derive(Debug, Clone)]
pub struct AgreementResolver {
    category_weight: f64,
    confidence_weight: f64,
    threshold: f64,
}

impl AgreementResolver {
    pub fn new(cfg: &AgreementConfig) -> Self {
        Self {
            category_weight: cfg.category_weight,
            confidence_weight: cfg.confidence_weight,
            threshold: cfg.conflict_threshold,
        }
    }

    /// Weighted composite; identical components give exactly 1.0.
    fn composite(&self, category: f64, confidence: f64) -> f64 {
        let total = self.category_weight + self.confidence_weight;
        if total <= 0.0 {
            return clamp_unit(category);
        }
        let disagreement =
            self.category_weight * (1.0 - category) + self.confidence_weight * (1.0 - confidence);
        clamp_unit(1.0 - disagreement / total)
    }

    pub fn assess(
        &self,
        primary: ClassificationResult,
        secondary: Option<ClassificationResult>,
    ) -> AgreementAssessment {
        let Some(second) = secondary else {
            let resolved = Resolved {
                category: primary.category,
                confidence: primary.confidence,
                reasoning: primary.reasoning.clone(),
                source: primary.provenance,
                rule: ResolutionRule::SingleModel,
            };
            return AgreementAssessment {
                primary,
                secondary: None,
                category_agreement: 1.0,
                confidence_similarity: 1.0,
                agreement: 1.0,
                conflict: false,
                resolved,
            };
        };

        let cat = category_agreement(primary.category, second.category);
        let conf = confidence_similarity(primary.confidence, second.confidence);
        let agreement = self.composite(cat, conf);
        let conflict = agreement < self.threshold;

        let resolved = if !conflict {
            Resolved {
                category: primary.category,
                confidence: primary.confidence,
                reasoning: primary.reasoning.clone(),
                source: primary.provenance,
                rule: ResolutionRule::Agreed,
            }
        } else if primary.category != second.category {
            let winner = if primary.category.more_severe(second.category) == second.category {
                &second
            } else {
                &primary
            };
            Resolved {
                category: winner.category,
                confidence: winner.confidence,
                reasoning: format!(
                    "Models disagreed ({} vs {}); adopting the more severe {} classification. {}",
                    primary.category, second.category, winner.provenance, winner.reasoning
                ),
                source: winner.provenance,
                rule: ResolutionRule::MoreSevere,
            }
        } else {
            Resolved {
                category: primary.category,
                confidence: primary.confidence.min(second.confidence),
                reasoning: format!(
                    "Models agreed on {} with divergent confidence ({:.2} vs {:.2}). {}",
                    primary.category, primary.confidence, second.confidence, primary.reasoning
                ),
                source: primary.provenance,
                rule: ResolutionRule::LoweredConfidence,
            }
        };

        if conflict {
            tracing::info!(
                agreement,
                primary = %primary.category,
                secondary = %second.category,
                resolved = %resolved.category,
                "Dual-model conflict"
            );
        }

        AgreementAssessment {
            primary,
            secondary: Some(second),
            category_agreement: cat,
            confidence_similarity: conf,
            agreement,
            conflict,
            resolved,
        }
    }
}
