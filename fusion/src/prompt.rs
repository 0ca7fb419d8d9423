//! Prompt assembly
//!
//! Renders the text sent to a classification adapter: system prompt,
//! category definitions, scanner summaries, the document itself and the
//! expected JSON response format.

use crate::config::{CategoryDefinition, PromptConfig};
use crate::pii::{self, PiiFinding, PiiSeverity};
use crate::safety::SafetyReport;
use crate::types::{DeclaredContext, DocumentText, Provenance};
use std::fmt::Write as _;

/// Everything a prompt may draw from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub provenance: Provenance,
    pub document: &'a DocumentText,
    pub declared: &'a DeclaredContext,
    pub categories: &'a [CategoryDefinition],
    pub pii: &'a [PiiFinding],
    pub safety: &'a SafetyReport,
}

/// Builds the prompt for one classification call.
pub trait PromptAssembler: Send + Sync {
    fn assemble(&self, input: &PromptInput<'_>) -> String;
}

/// Sectioned markdown prompt built from configuration.
#[derive(Debug, Clone)]
pub struct DefaultPromptAssembler {
    system_prompt: String,
    max_document_chars: usize,
}

const RESPONSE_FORMAT: &str = r#"{
  "category": "Public | Confidential | HighlySensitive | Unsafe",
  "confidence": 0.0,
  "reasoning": "why this category applies",
  "citations": [
    {"kind": "text", "page": 1, "excerpt": "short supporting quote", "relevance": 0.0}
  ],
  "category_scores": {"Public": 0.0, "Confidential": 0.0, "HighlySensitive": 0.0, "Unsafe": 0.0}
}"#;

impl DefaultPromptAssembler {
    pub fn new(cfg: &PromptConfig) -> Self {
        Self {
            system_prompt: cfg.system_prompt.clone(),
            max_document_chars: cfg.max_document_chars,
        }
    }

    fn render_categories(out: &mut String, categories: &[CategoryDefinition]) {
        out.push_str("## Category Definitions\n\n");
        for def in categories {
            let _ = writeln!(out, "### {}", def.category.display_name());
            let _ = writeln!(out, "{}", def.description);
            if !def.keywords.is_empty() {
                let _ = writeln!(out, "Indicators: {}", def.keywords.join(", "));
            }
            out.push('\n');
        }
    }

    fn render_pii(out: &mut String, findings: &[PiiFinding]) {
        out.push_str("## PII Detection Results\n\n");
        let _ = writeln!(out, "{}", pii::summarize(findings));
        for f in findings {
            let _ = writeln!(
                out,
                "- {} at {} (confidence {:.2}): {}",
                f.kind, f.location, f.confidence, f.redacted
            );
        }
        if PiiSeverity::from_findings(findings) == PiiSeverity::High {
            out.push_str(
                "High-risk personal data is present; the document cannot be Public.\n",
            );
        }
        out.push('\n');
    }

    fn render_safety(out: &mut String, report: &SafetyReport) {
        out.push_str("## Content Safety Results\n\n");
        let _ = writeln!(out, "{}", report.summary());
        for f in &report.findings {
            let _ = writeln!(
                out,
                "- {} ({}, confidence {:.2}): {}",
                f.kind, f.severity, f.confidence, f.description
            );
        }
        out.push('\n');
    }

    fn render_document(&self, out: &mut String, doc: &DocumentText) {
        out.push_str("## Document\n\n");
        let mut budget = self.max_document_chars;
        for (location, text) in doc.segments() {
            if text.trim().is_empty() {
                continue;
            }
            let _ = writeln!(out, "--- {location} ---");
            let taken: String = text.chars().take(budget).collect();
            budget -= taken.chars().count();
            out.push_str(&taken);
            out.push('\n');
            if budget == 0 {
                out.push_str("[document truncated]\n");
                break;
            }
        }
        out.push('\n');
    }
}

impl PromptAssembler for DefaultPromptAssembler {
    fn assemble(&self, input: &PromptInput<'_>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}\n", self.system_prompt.trim());
        if input.provenance == Provenance::Secondary {
            out.push_str(
                "You are the independent second reviewer. Judge the document on its own merits.\n\n",
            );
        }

        Self::render_categories(&mut out, input.categories);
        Self::render_pii(&mut out, input.pii);
        Self::render_safety(&mut out, input.safety);

        out.push_str("## Task\n\n");
        out.push_str(
            "Classify the document into exactly one category. Prefer the more severe \
             category when evidence supports more than one.\n",
        );
        if input.declared.claimed_public {
            out.push_str("The submitter declared this document as Public; verify that claim.\n");
        }
        out.push('\n');

        self.render_document(&mut out, input.document);

        out.push_str("## Citation Instructions\n\n");
        out.push_str(
            "Cite the page (and image region, if any) for each piece of supporting evidence. \
             Never quote personal data verbatim; refer to it by type.\n\n",
        );

        out.push_str("## Response Format\n\nRespond with a single JSON object:\n```json\n");
        out.push_str(RESPONSE_FORMAT);
        out.push_str("\n```\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FusionConfig;
    use crate::types::Page;

    fn render(doc: &DocumentText, provenance: Provenance, max_chars: usize) -> String {
        let cfg = FusionConfig::default();
        let rules = cfg.compile().expect("compile");
        let pii = rules.pii.scan_document(doc);
        let safety = rules.safety.scan_document(doc);
        let assembler = DefaultPromptAssembler::new(&PromptConfig {
            max_document_chars: max_chars,
            ..cfg.prompt.clone()
        });
        assembler.assemble(&PromptInput {
            provenance,
            document: doc,
            declared: &DeclaredContext::claimed_public(),
            categories: &cfg.categories,
            pii: &pii,
            safety: &safety,
        })
    }

    #[test]
    fn test_sections_present() {
        let doc = DocumentText::from_plain("Quarterly memo. SSN: 123-45-6789");
        let prompt = render(&doc, Provenance::Primary, 10_000);
        for section in [
            "## Category Definitions",
            "### Highly Sensitive",
            "## PII Detection Results",
            "national_id at p1",
            "***-**-6789",
            "## Content Safety Results",
            "Content appears safe",
            "declared this document as Public",
            "--- p1 ---",
            "## Response Format",
        ] {
            assert!(prompt.contains(section), "missing {section:?}");
        }
        assert!(!prompt.contains("independent second reviewer"));
    }

    #[test]
    fn test_secondary_prompt_marks_reviewer() {
        let doc = DocumentText::from_plain("hello");
        assert!(render(&doc, Provenance::Secondary, 100).contains("independent second reviewer"));
    }

    #[test]
    fn test_document_is_truncated() {
        let doc = DocumentText::new(vec![Page::new(1, "abcdefghij"), Page::new(2, "klmnop")]);
        let prompt = render(&doc, Provenance::Primary, 12);
        assert!(prompt.contains("abcdefghij\n--- p2 ---\nkl\n[document truncated]"));
        assert!(!prompt.contains("klm"));
    }
}
