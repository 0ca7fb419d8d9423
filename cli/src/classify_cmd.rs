//! `docguard classify` and `docguard scan`

use crate::{EXIT_BLOCKED, EXIT_ERROR, EXIT_OK, EXIT_REVIEW, load_config, read_document};
use anyhow::Context;
use clap::Parser;
use docguard_fusion::pii::summarize;
use docguard_fusion::{
    CannedClassifier, Category, Citation, ClassificationAdapter, DeclaredContext, DecisionRecord,
    FusionEngine, PiiSeverity, RunStatus, TriggerKind,
};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Classify a document into a sensitivity category
#[derive(Debug, Parser)]
pub struct ClassifyArgs {
    /// Document text file (pages separated by form feed)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,

    /// Submitter claims the document is public
    #[arg(long)]
    pub declared_public: bool,

    /// Captured primary model output to replay instead of the heuristic adapter
    #[arg(long, value_name = "FILE")]
    pub primary_response: Option<PathBuf>,

    /// Captured secondary model output for dual verification
    #[arg(long, value_name = "FILE")]
    pub secondary_response: Option<PathBuf>,

    /// Include the full decision trace (JSON output only)
    #[arg(long)]
    pub trace: bool,

    /// Config file (default: $DOCGUARD_CONFIG, then ~/.config/docguard/fusion.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl ClassifyArgs {
    pub async fn run(self) -> i32 {
        match self.execute().await {
            Ok(code) => code,
            Err(err) => {
                eprintln!("Error: {err:#}");
                EXIT_ERROR
            }
        }
    }

    async fn execute(self) -> anyhow::Result<i32> {
        let cfg = load_config(self.config.as_deref())?;
        let doc = read_document(&self.file)?;

        let mut builder = FusionEngine::builder(cfg);
        if let Some(path) = &self.primary_response {
            builder = builder.primary(canned("primary", path)?);
        }
        if let Some(path) = &self.secondary_response {
            builder = builder.secondary(canned("secondary", path)?);
        }
        let engine = builder.build().context("failed to build fusion engine")?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let declared = DeclaredContext {
            claimed_public: self.declared_public,
        };
        tracing::debug!(
            file = %self.file.display(),
            pages = doc.pages.len(),
            declared_public = self.declared_public,
            "Classifying document"
        );
        let record = engine
            .classify_cancellable(&doc, &declared, &cancel)
            .await
            .context("classification did not complete")?;

        if self.json {
            let value = if self.trace {
                serde_json::to_value(&record)?
            } else {
                serde_json::to_value(record.summary())?
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            print_decision(&record);
        }

        Ok(exit_code(&record))
    }
}

fn canned(role: &str, path: &Path) -> anyhow::Result<Arc<dyn ClassificationAdapter>> {
    let response = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {role} response {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| role.to_string());
    Ok(Arc::new(CannedClassifier::new(name, response)))
}

fn exit_code(record: &DecisionRecord) -> i32 {
    if record.status == RunStatus::Blocked {
        EXIT_BLOCKED
    } else if record.hitl.triggered {
        EXIT_REVIEW
    } else {
        EXIT_OK
    }
}

fn category_label(category: Category) -> String {
    let name = category.display_name();
    match category {
        Category::Public => name.green().to_string(),
        Category::Confidential => name.yellow().to_string(),
        Category::HighlySensitive => name.red().to_string(),
        Category::Unsafe => name.red().bold().to_string(),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn print_citations(citations: &[Citation]) {
    if citations.is_empty() {
        return;
    }
    println!("\nCitations:");
    for c in citations {
        println!(
            "  [{}] {} {:.2}  {}",
            c.kind,
            c.location,
            c.relevance,
            c.label.dimmed()
        );
        if !c.excerpt.is_empty() {
            println!("        \"{}\"", c.excerpt);
        }
    }
}

fn print_decision(record: &DecisionRecord) {
    println!(
        "\n {} (confidence {:.2})\n",
        category_label(record.category),
        record.confidence
    );
    println!("Run:          {}", record.run_id);
    println!("Status:       {:?}", record.status);
    println!("Reasoning:    {}", record.reasoning);
    println!("PII detected: {}", yes_no(record.pii_detected));
    println!("Content safe: {}", yes_no(record.content_safe));

    if record.hitl.triggered {
        let reasons: Vec<&str> = record.hitl.reasons.iter().map(TriggerKind::as_str).collect();
        println!(
            "Review:       {} ({} priority: {})",
            "required".yellow(),
            record.hitl.priority.as_str(),
            reasons.join(", ")
        );
    } else {
        println!("Review:       {}", "not required".green());
    }

    print_citations(&record.citations);
    println!();
}

/// Run only the PII and content safety scanners
#[derive(Debug, Parser)]
pub struct ScanArgs {
    /// Document text file (pages separated by form feed)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,

    /// Config file (default: $DOCGUARD_CONFIG, then ~/.config/docguard/fusion.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl ScanArgs {
    pub fn run(self) -> i32 {
        match self.execute() {
            Ok(()) => EXIT_OK,
            Err(err) => {
                eprintln!("Error: {err:#}");
                EXIT_ERROR
            }
        }
    }

    fn execute(self) -> anyhow::Result<()> {
        let cfg = load_config(self.config.as_deref())?;
        let rules = cfg.compile().context("failed to compile rules")?;
        let doc = read_document(&self.file)?;

        let pii = rules.pii.scan_document(&doc);
        let safety = rules.safety.scan_document(&doc);

        if self.json {
            let output = serde_json::json!({
                "pages": doc.pages.len(),
                "pii": {
                    "severity": PiiSeverity::from_findings(&pii),
                    "summary": summarize(&pii),
                    "findings": pii,
                },
                "safety": {
                    "summary": safety.summary(),
                    "blocked": safety.blocked,
                    "max_severity": safety.max_severity,
                    "findings": safety.findings,
                },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        println!("\n Document scan ({} page(s))\n", doc.pages.len());
        println!("{}", summarize(&pii));
        for f in &pii {
            println!(
                "  - {} at {} (confidence {:.2}): {}",
                f.kind, f.location, f.confidence, f.redacted
            );
        }
        let safety_line = safety.summary();
        if safety.is_safe() {
            println!("{}", safety_line.green());
        } else {
            println!("{}", safety_line.red());
        }
        for f in &safety.findings {
            println!(
                "  - {} ({}) score {:.2}: {}",
                f.kind, f.severity, f.score, f.description
            );
        }
        println!();
        Ok(())
    }
}
