//! Document sensitivity decision fusion
//!
//! Classifies a document into one of four sensitivity categories by fusing
//! independent evidence:
//! - pattern-based PII detection with context-window scoring
//! - weighted content safety scanning with negation/mitigation heuristics
//! - one or two model classifications, reconciled by an agreement resolver
//!
//! Every run yields a single auditable [`DecisionRecord`]: the resolved
//! category and confidence, redacted citations, a human-review decision and
//! a trace of every intermediate artifact. Failures to classify fail closed
//! instead of erroring.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod adapter;
pub mod agreement;
pub mod citations;
pub mod config;
pub mod context;
pub mod errors;
pub mod hitl;
pub mod orchestrator;
pub mod pii;
pub mod prompt;
pub mod redact;
pub mod retry;
pub mod safety;
pub mod types;

pub use adapter::{
    CannedClassifier, ClassificationAdapter, ClassificationRequest, ClassificationResult,
    EvidenceDigest, HeuristicClassifier, ModelCitation, RawClassification,
};
pub use agreement::{AgreementAssessment, AgreementResolver, ResolutionRule};
pub use citations::{Citation, CitationKind};
pub use config::{CompiledRules, FusionConfig};
pub use errors::{ClassificationError, ErrorCategory, FusionError, Result};
pub use hitl::{HitlDecision, ReviewPriority, TriggerKind};
pub use orchestrator::{DecisionRecord, DecisionSummary, DecisionTrace, Orchestrator, RunStatus};
pub use pii::{PiiFinding, PiiKind, PiiSeverity};
pub use prompt::{DefaultPromptAssembler, PromptAssembler};
pub use retry::RetryPolicy;
pub use safety::{SafetyFinding, SafetyKind, SafetyReport, SafetySeverity};
pub use types::{Category, DeclaredContext, DocumentText, Location, Page, Provenance};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main entry point for classification runs
///
/// Holds the compiled rule set and adapters; cheap to share across tasks
/// behind an `Arc`.
pub struct FusionEngine {
    orchestrator: Orchestrator,
}

/// Builder for [`FusionEngine`]
pub struct FusionEngineBuilder {
    cfg: FusionConfig,
    primary: Option<Arc<dyn ClassificationAdapter>>,
    secondary: Option<Arc<dyn ClassificationAdapter>>,
    assembler: Option<Arc<dyn PromptAssembler>>,
    retry: Option<RetryPolicy>,
}

impl FusionEngineBuilder {
    /// Primary adapter (defaults to [`HeuristicClassifier`])
    pub fn primary(mut self, adapter: Arc<dyn ClassificationAdapter>) -> Self {
        self.primary = Some(adapter);
        self
    }

    /// Secondary adapter, used when dual verification is enabled
    pub fn secondary(mut self, adapter: Arc<dyn ClassificationAdapter>) -> Self {
        self.secondary = Some(adapter);
        self
    }

    /// Prompt assembler (defaults to [`DefaultPromptAssembler`])
    pub fn assembler(mut self, assembler: Arc<dyn PromptAssembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }

    /// Override the retry policy derived from configuration
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Validate and compile the configuration, then assemble the engine
    pub fn build(self) -> Result<FusionEngine> {
        let rules = Arc::new(self.cfg.compile()?);
        let assembler: Arc<dyn PromptAssembler> = match self.assembler {
            Some(assembler) => assembler,
            None => Arc::new(DefaultPromptAssembler::new(&self.cfg.prompt)),
        };
        let primary: Arc<dyn ClassificationAdapter> = match self.primary {
            Some(primary) => primary,
            None => Arc::new(HeuristicClassifier::new()),
        };

        if self.cfg.classification.dual_verification && self.secondary.is_none() {
            tracing::info!("Dual verification enabled but no secondary adapter configured");
        }

        tracing::info!(
            version = VERSION,
            primary = primary.name(),
            secondary = ?self.secondary.as_ref().map(|a| a.name()),
            dual_verification = self.cfg.classification.dual_verification,
            "Fusion engine initialized"
        );

        let mut orchestrator = Orchestrator::new(
            Arc::new(self.cfg),
            rules,
            primary,
            self.secondary,
            assembler,
        );
        if let Some(policy) = self.retry {
            orchestrator = orchestrator.with_retry_policy(policy);
        }
        Ok(FusionEngine { orchestrator })
    }
}

impl FusionEngine {
    /// Start building an engine from an explicit configuration
    pub fn builder(cfg: FusionConfig) -> FusionEngineBuilder {
        FusionEngineBuilder {
            cfg,
            primary: None,
            secondary: None,
            assembler: None,
            retry: None,
        }
    }

    /// Load configuration from disk and use `primary` as the only adapter
    pub fn new(primary: Arc<dyn ClassificationAdapter>) -> Result<Self> {
        Self::builder(FusionConfig::load()?).primary(primary).build()
    }

    pub fn config(&self) -> &FusionConfig {
        self.orchestrator.config()
    }

    /// Classify a document. Never errors: failures produce a fail-closed record.
    pub async fn classify(&self, doc: &DocumentText, declared: &DeclaredContext) -> DecisionRecord {
        let token = CancellationToken::new();
        match self.orchestrator.run(doc, declared, &token).await {
            Ok(record) => record,
            Err(err) => self.orchestrator.fail_closed_for(doc, declared, &err),
        }
    }

    /// Classify under a cancellation token; errors only when cancelled.
    pub async fn classify_cancellable(
        &self,
        doc: &DocumentText,
        declared: &DeclaredContext,
        cancel: &CancellationToken,
    ) -> Result<DecisionRecord> {
        self.orchestrator.run(doc, declared, cancel).await
    }

    /// Synchronous wrapper around [`FusionEngine::classify`].
    ///
    /// Must not be called from within an async runtime.
    pub fn classify_blocking(&self, doc: &DocumentText, declared: &DeclaredContext) -> DecisionRecord {
        match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime.block_on(self.classify(doc, declared)),
            Err(err) => {
                let cause = FusionError::internal(format!("failed to start runtime: {err}"));
                self.orchestrator.fail_closed_for(doc, declared, &cause)
            }
        }
    }
}
