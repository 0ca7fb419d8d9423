//! Content safety scanner
//!
//! Weighted keyword/pattern matching over a configured category table. Hits
//! are discounted when a negation cue precedes them in the same clause, or
//! when the surrounding window reads as fiction, reporting, training or a
//! quotation. A category is flagged once its discounted hit sum exceeds its
//! threshold. Any flagged category at the critical tier blocks the document
//! without a model call.

use crate::config::{SafetyCategoryConfig, SafetyConfig};
use crate::context::{Window, mitigated, negated, quoted};
use crate::errors::{FusionError, Result};
use crate::redact::Redactor;
use crate::types::{DocumentText, Location, clamp_unit};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Safety category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyKind {
    ChildSafety,
    HateSpeech,
    Violence,
    Exploitation,
    Criminal,
    CyberThreat,
    PoliticalMisinformation,
}

impl SafetyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChildSafety => "child_safety",
            Self::HateSpeech => "hate_speech",
            Self::Violence => "violence",
            Self::Exploitation => "exploitation",
            Self::Criminal => "criminal",
            Self::CyberThreat => "cyber_threat",
            Self::PoliticalMisinformation => "political_misinformation",
        }
    }
}

impl fmt::Display for SafetyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity tier, ordered low to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SafetySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// High or critical
    pub fn is_high(&self) -> bool {
        *self >= Self::High
    }
}

impl fmt::Display for SafetySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pattern match that contributed to a category score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyHit {
    /// Configured pattern text
    pub pattern: String,
    pub tier: SafetySeverity,
    pub location: Location,
    pub start: usize,
    pub end: usize,
    /// Weight after context discounts
    pub weight: f64,
    /// Negated, mitigated or quoted
    pub suppressed: bool,
    pub excerpt: String,
}

/// A flagged safety category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyFinding {
    pub kind: SafetyKind,
    pub severity: SafetySeverity,
    pub confidence: f64,
    /// Discounted hit sum that exceeded the category threshold
    pub score: f64,
    /// Location of the strongest hit
    pub location: Location,
    pub description: String,
    pub hits: Vec<SafetyHit>,
}

/// Result of a safety scan over one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub findings: Vec<SafetyFinding>,
    pub max_severity: Option<SafetySeverity>,
    pub blocked: bool,
}

impl SafetyReport {
    fn from_findings(findings: Vec<SafetyFinding>) -> Self {
        let max_severity = findings.iter().map(|f| f.severity).max();
        Self {
            blocked: max_severity == Some(SafetySeverity::Critical),
            max_severity,
            findings,
        }
    }

    pub fn is_safe(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn has_high_severity(&self) -> bool {
        self.max_severity.is_some_and(|s| s.is_high())
    }

    pub fn flagged_kinds(&self) -> Vec<SafetyKind> {
        self.findings.iter().map(|f| f.kind).collect()
    }

    /// One-line human-readable summary
    pub fn summary(&self) -> String {
        if self.findings.is_empty() {
            return "Content appears safe".to_string();
        }
        let parts: Vec<String> = self
            .findings
            .iter()
            .map(|f| format!("{} ({})", f.kind, f.severity))
            .collect();
        let mut line = format!(
            "Flagged {} safety categor{}: {}",
            self.findings.len(),
            if self.findings.len() == 1 { "y" } else { "ies" },
            parts.join(", ")
        );
        if self.blocked {
            line.push_str("; blocked");
        }
        line
    }
}

#[derive(Debug)]
struct CompiledPattern {
    source: String,
    regex: Regex,
    weight: f64,
    tier: SafetySeverity,
}

#[derive(Debug)]
struct CompiledCategory {
    kind: SafetyKind,
    severity: SafetySeverity,
    threshold: f64,
    description: String,
    patterns: Vec<CompiledPattern>,
}

/// Compiled safety rule set.
#[derive(Debug)]
pub struct SafetyRules {
    categories: Vec<CompiledCategory>,
    base_confidence: f64,
    context_window: usize,
    negation_multiplier: f64,
    mitigating_multiplier: f64,
    suppression_penalty: f64,
    negation_cues: Vec<String>,
    mitigating_cues: Vec<String>,
    redactor: Redactor,
}

/// Characters on each side of a hit kept in its excerpt
const EXCERPT_RADIUS: usize = 24;

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive regex for a literal phrase, word-bounded where the phrase
/// starts or ends with a word character.
fn phrase_regex(phrase: &str) -> String {
    let phrase = phrase.trim();
    let lead = if phrase.starts_with(is_word_char) { r"\b" } else { "" };
    let tail = if phrase.ends_with(is_word_char) { r"\b" } else { "" };
    format!("(?i){lead}{}{tail}", regex::escape(phrase))
}

fn compile_category(cat: &SafetyCategoryConfig) -> Result<CompiledCategory> {
    let patterns = cat
        .patterns
        .iter()
        .map(|spec| {
            let source = spec.pattern().to_string();
            let expr = if spec.is_regex() {
                format!("(?i){source}")
            } else {
                phrase_regex(&source)
            };
            let regex = Regex::new(&expr).map_err(|e| {
                FusionError::config_with_source(
                    format!("invalid {} pattern: {source}", cat.kind),
                    e,
                )
            })?;
            Ok(CompiledPattern {
                weight: spec.weight(),
                tier: spec.tier().unwrap_or(cat.severity),
                source,
                regex,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CompiledCategory {
        kind: cat.kind,
        severity: cat.severity,
        threshold: cat.threshold,
        description: cat.description.clone(),
        patterns,
    })
}

impl SafetyRules {
    pub fn compile(cfg: &SafetyConfig, redactor: Redactor) -> Result<Self> {
        let categories = cfg
            .categories
            .iter()
            .map(compile_category)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            categories,
            base_confidence: cfg.base_confidence,
            context_window: cfg.context_window,
            negation_multiplier: cfg.negation_multiplier,
            mitigating_multiplier: cfg.mitigating_multiplier,
            suppression_penalty: cfg.suppression_penalty,
            negation_cues: cfg.negation_cues.clone(),
            mitigating_cues: cfg.mitigating_cues.clone(),
            redactor,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Scan a single text unit.
    pub fn scan_text(&self, text: &str, location: &Location) -> SafetyReport {
        self.scan_segments(std::iter::once((location.clone(), text)))
    }

    /// Scan every page and region; hit sums are aggregated per document.
    pub fn scan_document(&self, doc: &DocumentText) -> SafetyReport {
        let report = self.scan_segments(doc.segments());
        tracing::debug!(
            flagged = report.findings.len(),
            blocked = report.blocked,
            "Safety scan complete"
        );
        report
    }

    fn scan_segments<'a>(
        &self,
        segments: impl Iterator<Item = (Location, &'a str)>,
    ) -> SafetyReport {
        let mut hits_by_category: BTreeMap<usize, Vec<SafetyHit>> = BTreeMap::new();

        for (location, text) in segments {
            if text.trim().is_empty() {
                continue;
            }
            for (idx, category) in self.categories.iter().enumerate() {
                let hits = self.category_hits(category, text, &location);
                if !hits.is_empty() {
                    hits_by_category.entry(idx).or_default().extend(hits);
                }
            }
        }

        let findings = hits_by_category
            .into_iter()
            .filter_map(|(idx, hits)| {
                let category = self.categories.get(idx)?;
                self.evaluate(category, hits)
            })
            .collect();

        SafetyReport::from_findings(findings)
    }

    fn category_hits(
        &self,
        category: &CompiledCategory,
        text: &str,
        location: &Location,
    ) -> Vec<SafetyHit> {
        let mut hits: Vec<SafetyHit> = Vec::new();
        for pattern in &category.patterns {
            for m in pattern.regex.find_iter(text) {
                let window = Window::around(text, m.start(), m.end(), self.context_window);
                let mut multiplier = 1.0;
                if negated(window.before, &self.negation_cues) {
                    multiplier *= self.negation_multiplier;
                }
                if mitigated(&window, &self.mitigating_cues) || quoted(text, m.start(), m.end()) {
                    multiplier *= self.mitigating_multiplier;
                }

                let excerpt_window = Window::around(text, m.start(), m.end(), EXCERPT_RADIUS);
                let (es, ee) = excerpt_window.span_in(text);
                let excerpt = text[es..ee].split_whitespace().collect::<Vec<_>>().join(" ");
                let excerpt = self.redactor.scrub(&excerpt).into_owned();

                let hit = SafetyHit {
                    pattern: pattern.source.clone(),
                    tier: pattern.tier,
                    location: location.clone(),
                    start: m.start(),
                    end: m.end(),
                    weight: pattern.weight * multiplier,
                    suppressed: multiplier < 1.0,
                    excerpt,
                };

                // Overlapping hits within a category count once, strongest wins
                let overlapping = hits.iter().position(|h| {
                    h.location == hit.location && h.start < hit.end && hit.start < h.end
                });
                match overlapping {
                    Some(pos) if hits[pos].weight < hit.weight => hits[pos] = hit,
                    Some(_) => {}
                    None => hits.push(hit),
                }
            }
        }
        hits.sort_by_key(|h| h.start);
        hits
    }

    fn evaluate(&self, category: &CompiledCategory, hits: Vec<SafetyHit>) -> Option<SafetyFinding> {
        let score: f64 = hits.iter().map(|h| h.weight).sum();
        if score <= category.threshold {
            tracing::debug!(
                kind = %category.kind,
                score,
                threshold = category.threshold,
                "Safety category below threshold"
            );
            return None;
        }

        let severity = hits
            .iter()
            .filter(|h| !h.suppressed)
            .map(|h| h.tier)
            .max()
            .unwrap_or(category.severity);
        let penalty = if hits.iter().any(|h| h.suppressed) {
            self.suppression_penalty
        } else {
            0.0
        };
        let location = hits
            .iter()
            .max_by(|a, b| a.weight.total_cmp(&b.weight))
            .map(|h| h.location.clone())?;

        Some(SafetyFinding {
            kind: category.kind,
            severity,
            confidence: clamp_unit(self.base_confidence - penalty),
            score,
            location,
            description: category.description.clone(),
            hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FusionConfig;
    use crate::types::Page;
    use pretty_assertions::assert_eq;

    fn rules() -> SafetyRules {
        FusionConfig::default().compile().expect("compile").safety
    }

    fn scan(text: &str) -> SafetyReport {
        rules().scan_text(text, &Location::page(1))
    }

    #[test]
    fn test_benign_text_is_safe() {
        let report = scan("This brochure describes our public product line.");
        assert!(report.is_safe());
        assert!(!report.blocked);
        assert_eq!(report.summary(), "Content appears safe");
    }

    #[test]
    fn test_critical_match_blocks() {
        let report = scan("The archive contained CSAM material.");
        assert!(report.blocked);
        assert_eq!(report.max_severity, Some(SafetySeverity::Critical));
        assert_eq!(report.flagged_kinds(), vec![SafetyKind::ChildSafety]);
        assert!((report.findings[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_pattern_tier_overrides_category_tier() {
        let report = scan("Appendix B is a weapon schematic.");
        assert_eq!(report.flagged_kinds(), vec![SafetyKind::Violence]);
        assert_eq!(report.findings[0].severity, SafetySeverity::Critical);
        assert!(report.blocked);
    }

    #[test]
    fn test_threshold_must_be_exceeded() {
        // One half-weight hit sums to exactly the threshold
        assert!(scan("The plan relied on coercion.").is_safe());
        let report = scan("The plan relied on coercion and exploitation.");
        assert_eq!(report.flagged_kinds(), vec![SafetyKind::Exploitation]);
    }

    #[test]
    fn test_negation_suppresses() {
        assert!(scan("The attachment is free of malware.").is_safe());
        assert!(scan("We found no ransomware on the host.").is_safe());
        assert!(!scan("No issues. Ransomware encrypted the host.").is_safe());
    }

    #[test]
    fn test_educational_context_lowers_confidence() {
        assert!(scan("Security training: how ransomware spreads.").is_safe());

        let report = scan("In this novel, the botnet deployed ransomware.");
        assert_eq!(report.flagged_kinds(), vec![SafetyKind::CyberThreat]);
        let finding = &report.findings[0];
        assert!((finding.confidence - 0.4).abs() < 1e-9);
        assert!(finding.hits.iter().all(|h| h.suppressed));
    }

    #[test]
    fn test_quoted_hit_is_suppressed() {
        assert!(scan(r#"The headline read "ransomware" in bold."#).is_safe());
    }

    #[test]
    fn test_word_boundaries() {
        assert!(scan("The goren family portrait.").is_safe());
        assert!(!scan("Scenes of gore throughout.").is_safe());
    }

    #[test]
    fn test_document_aggregates_across_pages() {
        let doc = DocumentText::new(vec![
            Page::new(1, "It mentions coercion."),
            Page::new(2, "And later exploitation."),
        ]);
        let report = rules().scan_document(&doc);
        assert_eq!(report.flagged_kinds(), vec![SafetyKind::Exploitation]);
        let pages: Vec<u32> = report.findings[0].hits.iter().map(|h| h.location.page).collect();
        assert_eq!(pages, vec![1, 2]);
        assert!(report.summary().starts_with("Flagged 1 safety category"));
    }

    #[test]
    fn test_overlapping_hits_count_once() {
        // "sexual exploitation" and "exploitation" overlap; only the stronger counts
        let report = scan("Reports of sexual exploitation.");
        let finding = &report.findings[0];
        assert_eq!(finding.hits.len(), 1);
        assert_eq!(finding.hits[0].pattern, "sexual exploitation");
        assert!((finding.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hit_excerpt_masks_nearby_values() {
        let report = scan("SSN: 123-45-6789 graphic violence");
        let hit = &report.findings[0].hits[0];
        assert!(!hit.excerpt.contains("123-45-6789"));
        assert!(hit.excerpt.contains("***-**-6789"));
        assert!(hit.excerpt.contains("graphic violence"));
    }

    #[test]
    fn test_minor_needs_sexual_context() {
        assert!(scan("Minor edits to chapter two. Minor typo fixes.").is_safe());
        let report = scan("Sexualized images of minors were found.");
        assert_eq!(report.flagged_kinds(), vec![SafetyKind::ChildSafety]);
        assert!(report.blocked);
    }
}
