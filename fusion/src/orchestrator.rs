//! Decision orchestrator
//!
//! One run is a single sequential pass:
//!
//! 1. Scan PII and content safety (blank text degrades to empty findings)
//! 2. Short-circuit to Unsafe when the safety scan blocks
//! 3. Assemble prompts and call the primary (and secondary) adapter
//!    concurrently, each under retry, timeout and cancellation
//! 4. Validate responses, discarding malformed ones
//! 5. Resolve agreement, evaluate review triggers, aggregate citations
//!
//! Any failure to obtain a usable primary classification produces a
//! fail-closed record instead of an error. Only cancellation surfaces as
//! an error, and no partial record is returned in that case.

use crate::adapter::{ClassificationAdapter, ClassificationRequest, ClassificationResult, EvidenceDigest};
use crate::agreement::{AgreementAssessment, AgreementResolver};
use crate::citations::{Citation, CitationAggregator};
use crate::config::{CompiledRules, FusionConfig};
use crate::errors::{ClassificationError, FusionError, Result};
use crate::hitl::{HitlDecision, HitlEvaluator, HitlInput, TriggerKind};
use crate::pii::{PiiFinding, PiiSeverity};
use crate::prompt::{PromptAssembler, PromptInput};
use crate::retry::{RetryError, RetryPolicy, call_with_retry};
use crate::safety::SafetyReport;
use crate::types::{Category, DeclaredContext, DocumentText, Provenance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Reasoning recorded when no usable classification could be obtained
pub const FAIL_CLOSED_REASONING: &str = "manual review required — classification unavailable";

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Blocked,
    FailedClosed,
}

/// A classification response that was not used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedResponse {
    pub provenance: Provenance,
    pub adapter: String,
    /// Machine-readable error category
    pub error: String,
    pub reason: String,
}

/// Every intermediate artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set when the document text was unusable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_degraded: Option<String>,
    pub pii_findings: Vec<PiiFinding>,
    pub pii_severity: PiiSeverity,
    pub pii_summary: String,
    pub safety: SafetyReport,
    pub safety_summary: String,
    pub short_circuit: bool,
    pub dual_verification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<ClassificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<ClassificationResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discarded: Vec<DiscardedResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement: Option<AgreementAssessment>,
}

/// Final, auditable output of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub category: Category,
    pub confidence: f64,
    pub reasoning: String,
    pub pii_detected: bool,
    pub content_safe: bool,
    pub citations: Vec<Citation>,
    pub hitl: HitlDecision,
    pub trace: DecisionTrace,
}

/// Review portion of [`DecisionSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitlSummary {
    pub triggered: bool,
    pub reasons: Vec<TriggerKind>,
}

/// Stable external view of a [`DecisionRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub category: Category,
    pub confidence: f64,
    pub reasoning: String,
    pub pii_detected: bool,
    pub content_safe: bool,
    pub citations: Vec<Citation>,
    pub hitl: HitlSummary,
}

impl DecisionRecord {
    pub fn summary(&self) -> DecisionSummary {
        DecisionSummary {
            category: self.category,
            confidence: self.confidence,
            reasoning: self.reasoning.clone(),
            pii_detected: self.pii_detected,
            content_safe: self.content_safe,
            citations: self.citations.clone(),
            hitl: HitlSummary {
                triggered: self.hitl.triggered,
                reasons: self.hitl.reasons.iter().copied().collect(),
            },
        }
    }
}

/// Scanner output shared by every exit path of a run.
struct Scanned {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    input_degraded: Option<String>,
    pii: Vec<PiiFinding>,
    safety: SafetyReport,
}

/// Outcome of the classification stage.
struct Classified {
    primary: std::result::Result<ClassificationResult, FusionError>,
    secondary: Option<std::result::Result<ClassificationResult, FusionError>>,
    secondary_name: Option<String>,
}

/// Runs the pipeline against one shared, immutable configuration.
pub struct Orchestrator {
    cfg: Arc<FusionConfig>,
    rules: Arc<CompiledRules>,
    primary: Arc<dyn ClassificationAdapter>,
    secondary: Option<Arc<dyn ClassificationAdapter>>,
    assembler: Arc<dyn PromptAssembler>,
    policy: RetryPolicy,
    resolver: AgreementResolver,
    evaluator: HitlEvaluator,
    aggregator: CitationAggregator,
}

impl Orchestrator {
    pub fn new(
        cfg: Arc<FusionConfig>,
        rules: Arc<CompiledRules>,
        primary: Arc<dyn ClassificationAdapter>,
        secondary: Option<Arc<dyn ClassificationAdapter>>,
        assembler: Arc<dyn PromptAssembler>,
    ) -> Self {
        Self {
            policy: RetryPolicy::from(&cfg.classification),
            resolver: AgreementResolver::new(&cfg.agreement),
            evaluator: HitlEvaluator::new(&cfg.hitl),
            aggregator: CitationAggregator::new(&cfg.citations, rules.redactor.clone()),
            cfg,
            rules,
            primary,
            secondary,
            assembler,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.cfg
    }

    /// Replace the retry policy derived from configuration
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn dual_verification(&self) -> bool {
        self.cfg.classification.dual_verification && self.secondary.is_some()
    }

    /// Run the pipeline; errors only with [`FusionError::Cancelled`].
    pub async fn run(
        &self,
        doc: &DocumentText,
        declared: &DeclaredContext,
        cancel: &CancellationToken,
    ) -> Result<DecisionRecord> {
        let scanned = self.scan(doc);
        tracing::info!(
            run_id = %scanned.run_id,
            pages = doc.pages.len(),
            pii = scanned.pii.len(),
            safety_flags = scanned.safety.findings.len(),
            "Decision run started"
        );

        if cancel.is_cancelled() {
            return Err(FusionError::Cancelled);
        }

        let record = if scanned.safety.blocked {
            self.blocked(doc, declared, scanned)
        } else {
            let classified = self.classify(doc, declared, &scanned, cancel).await?;
            self.fuse(doc, declared, scanned, classified)
        };

        tracing::info!(
            run_id = %record.run_id,
            status = ?record.status,
            category = %record.category,
            confidence = record.confidence,
            hitl = record.hitl.triggered,
            "Decision run finished"
        );
        Ok(record)
    }

    /// Emit a fail-closed record for `doc` without calling any adapter.
    pub fn fail_closed_for(
        &self,
        doc: &DocumentText,
        declared: &DeclaredContext,
        cause: &FusionError,
    ) -> DecisionRecord {
        let scanned = self.scan(doc);
        let discarded = vec![DiscardedResponse {
            provenance: Provenance::Primary,
            adapter: self.primary.name().to_string(),
            error: cause.category().as_str().to_string(),
            reason: cause.to_string(),
        }];
        self.fail_closed(doc, declared, scanned, discarded, None)
    }

    fn scan(&self, doc: &DocumentText) -> Scanned {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        if doc.is_blank() {
            let err = FusionError::input("document has no extractable text");
            tracing::warn!(%run_id, error = %err, code = err.category().as_str(), "Degrading to empty findings");
            return Scanned {
                run_id,
                started_at,
                input_degraded: Some(err.to_string()),
                pii: Vec::new(),
                safety: SafetyReport::default(),
            };
        }

        Scanned {
            run_id,
            started_at,
            input_degraded: None,
            pii: self.rules.pii.scan_document(doc),
            safety: self.rules.safety.scan_document(doc),
        }
    }

    fn digest(&self, doc: &DocumentText, declared: &DeclaredContext, scanned: &Scanned) -> EvidenceDigest {
        let mut pii_kinds: Vec<_> = scanned.pii.iter().map(|f| f.kind).collect();
        pii_kinds.sort();
        pii_kinds.dedup();
        EvidenceDigest {
            page_count: doc.pages.len(),
            pii_count: scanned.pii.len(),
            high_risk_pii: pii_kinds.iter().any(|k| k.is_high_risk()),
            pii_kinds,
            safety_kinds: scanned.safety.flagged_kinds(),
            max_safety_severity: scanned.safety.max_severity,
            claimed_public: declared.claimed_public,
        }
    }

    fn request(
        &self,
        provenance: Provenance,
        doc: &DocumentText,
        declared: &DeclaredContext,
        scanned: &Scanned,
        evidence: &EvidenceDigest,
    ) -> ClassificationRequest {
        let prompt = self.assembler.assemble(&PromptInput {
            provenance,
            document: doc,
            declared,
            categories: &self.cfg.categories,
            pii: &scanned.pii,
            safety: &scanned.safety,
        });
        ClassificationRequest {
            provenance,
            prompt,
            evidence: evidence.clone(),
        }
    }

    async fn call(
        &self,
        adapter: &dyn ClassificationAdapter,
        request: &ClassificationRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<ClassificationResult, FusionError> {
        let raw = call_with_retry(|| adapter.classify(request), &self.policy, cancel, adapter.name())
            .await
            .map_err(|err| match err {
                RetryError::Cancelled => FusionError::Cancelled,
                RetryError::Permanent(ClassificationError::Malformed(msg)) => {
                    FusionError::validation(format!(
                        "{} response from {}: {msg}",
                        request.provenance,
                        adapter.name()
                    ))
                }
                RetryError::Permanent(last) | RetryError::Exhausted { last, .. } => {
                    FusionError::external_with_source(
                        format!("{} adapter {} failed", request.provenance, adapter.name()),
                        last,
                    )
                }
            })?;
        raw.validate(request.provenance, adapter.name())
            .map(|result| result.redacted(&self.rules.redactor))
    }

    async fn classify(
        &self,
        doc: &DocumentText,
        declared: &DeclaredContext,
        scanned: &Scanned,
        cancel: &CancellationToken,
    ) -> Result<Classified> {
        let evidence = self.digest(doc, declared, scanned);
        let primary_request = self.request(Provenance::Primary, doc, declared, scanned, &evidence);
        let secondary = self.secondary.as_deref().filter(|_| self.dual_verification());
        let secondary_request = secondary
            .map(|_| self.request(Provenance::Secondary, doc, declared, scanned, &evidence));

        let (primary, secondary_result) = tokio::join!(
            self.call(self.primary.as_ref(), &primary_request, cancel),
            async {
                match (secondary, &secondary_request) {
                    (Some(adapter), Some(request)) => Some(self.call(adapter, request, cancel).await),
                    _ => None,
                }
            }
        );

        let cancelled = |r: &std::result::Result<ClassificationResult, FusionError>| {
            matches!(r, Err(FusionError::Cancelled))
        };
        if cancel.is_cancelled()
            || cancelled(&primary)
            || secondary_result.as_ref().is_some_and(cancelled)
        {
            tracing::info!(run_id = %scanned.run_id, "Decision run cancelled");
            return Err(FusionError::Cancelled);
        }

        Ok(Classified {
            primary,
            secondary: secondary_result,
            secondary_name: secondary.map(|a| a.name().to_string()),
        })
    }

    fn discard(provenance: Provenance, adapter: &str, err: &FusionError) -> DiscardedResponse {
        tracing::warn!(
            %provenance,
            adapter,
            code = err.category().as_str(),
            error = %err,
            "Discarding classification response"
        );
        DiscardedResponse {
            provenance,
            adapter: adapter.to_string(),
            error: err.category().as_str().to_string(),
            reason: err.to_string(),
        }
    }

    fn fuse(
        &self,
        doc: &DocumentText,
        declared: &DeclaredContext,
        scanned: Scanned,
        classified: Classified,
    ) -> DecisionRecord {
        let mut discarded = Vec::new();

        let secondary = match (classified.secondary, classified.secondary_name) {
            (Some(Ok(result)), _) => Some(result),
            (Some(Err(err)), name) => {
                let name = name.unwrap_or_default();
                discarded.push(Self::discard(Provenance::Secondary, &name, &err));
                None
            }
            (None, _) => None,
        };

        let primary = match classified.primary {
            Ok(result) => result,
            Err(err) => {
                discarded.push(Self::discard(Provenance::Primary, self.primary.name(), &err));
                return self.fail_closed(doc, declared, scanned, discarded, secondary);
            }
        };

        let assessment = self.resolver.assess(primary, secondary);
        let resolved = &assessment.resolved;

        let hitl = self.evaluator.evaluate(&HitlInput {
            category: resolved.category,
            confidence: resolved.confidence,
            pii: &scanned.pii,
            safety: &scanned.safety,
            agreement: Some(&assessment),
            declared,
            preset: &[],
        });

        let models: Vec<&ClassificationResult> = assessment.results().collect();
        let citations = self
            .aggregator
            .aggregate(doc, &scanned.pii, &scanned.safety, &models);

        DecisionRecord {
            run_id: scanned.run_id,
            status: RunStatus::Completed,
            category: resolved.category,
            confidence: resolved.confidence,
            reasoning: resolved.reasoning.clone(),
            pii_detected: !scanned.pii.is_empty(),
            content_safe: scanned.safety.is_safe(),
            citations,
            hitl,
            trace: DecisionTrace {
                primary: Some(assessment.primary.clone()),
                secondary: assessment.secondary.clone(),
                discarded,
                agreement: Some(assessment),
                short_circuit: false,
                ..self.trace(scanned)
            },
        }
    }

    fn blocked(&self, doc: &DocumentText, declared: &DeclaredContext, scanned: Scanned) -> DecisionRecord {
        tracing::warn!(
            run_id = %scanned.run_id,
            flagged = ?scanned.safety.flagged_kinds(),
            "Content safety block, skipping classification"
        );

        let hitl = self.evaluator.evaluate(&HitlInput {
            category: Category::Unsafe,
            confidence: 1.0,
            pii: &scanned.pii,
            safety: &scanned.safety,
            agreement: None,
            declared,
            preset: &[TriggerKind::SafetyBlock],
        });
        let citations = self.aggregator.aggregate(doc, &scanned.pii, &scanned.safety, &[]);

        DecisionRecord {
            run_id: scanned.run_id,
            status: RunStatus::Blocked,
            category: Category::Unsafe,
            confidence: 1.0,
            reasoning: format!("Blocked by content safety policy: {}", scanned.safety.summary()),
            pii_detected: !scanned.pii.is_empty(),
            content_safe: false,
            citations,
            hitl,
            trace: DecisionTrace {
                short_circuit: true,
                ..self.trace(scanned)
            },
        }
    }

    /// Terminal record when no usable primary classification exists.
    ///
    /// Category is Unsafe when any safety finding exists, otherwise
    /// HighlySensitive.
    fn fail_closed(
        &self,
        doc: &DocumentText,
        declared: &DeclaredContext,
        scanned: Scanned,
        discarded: Vec<DiscardedResponse>,
        secondary: Option<ClassificationResult>,
    ) -> DecisionRecord {
        let category = if scanned.safety.is_safe() {
            Category::HighlySensitive
        } else {
            Category::Unsafe
        };
        tracing::warn!(
            run_id = %scanned.run_id,
            category = %category,
            "Failing closed, classification unavailable"
        );

        let hitl = self.evaluator.evaluate(&HitlInput {
            category,
            confidence: 0.0,
            pii: &scanned.pii,
            safety: &scanned.safety,
            agreement: None,
            declared,
            preset: &[TriggerKind::ClassificationUnavailable],
        });
        let citations = self.aggregator.aggregate(doc, &scanned.pii, &scanned.safety, &[]);

        DecisionRecord {
            run_id: scanned.run_id,
            status: RunStatus::FailedClosed,
            category,
            confidence: 0.0,
            reasoning: FAIL_CLOSED_REASONING.to_string(),
            pii_detected: !scanned.pii.is_empty(),
            content_safe: scanned.safety.is_safe(),
            citations,
            hitl,
            trace: DecisionTrace {
                secondary,
                discarded,
                ..self.trace(scanned)
            },
        }
    }

    fn trace(&self, scanned: Scanned) -> DecisionTrace {
        DecisionTrace {
            started_at: scanned.started_at,
            finished_at: Utc::now(),
            input_degraded: scanned.input_degraded,
            pii_severity: PiiSeverity::from_findings(&scanned.pii),
            pii_summary: crate::pii::summarize(&scanned.pii),
            safety_summary: scanned.safety.summary(),
            pii_findings: scanned.pii,
            safety: scanned.safety,
            short_circuit: false,
            dual_verification: self.dual_verification(),
            primary: None,
            secondary: None,
            discarded: Vec::new(),
            agreement: None,
        }
    }
}
