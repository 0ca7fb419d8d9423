//! PII scanner
//!
//! Pattern-based detection of personal data in page text. Each subtype has
//! compiled patterns, an optional structural validator (Luhn for payment
//! cards, area/group/serial rules for national IDs) and a base confidence
//! that the surrounding context window adjusts up or down.
//!
//! The scanner never fails. Raw matched values never leave it: findings carry
//! only the masked value and an excerpt in which every intersecting PII span
//! has been replaced by its mask.

use crate::config::PiiConfig;
use crate::context::{Window, keyword_delta};
use crate::errors::{FusionError, Result};
use crate::redact::{Redactor, mask_value};
use crate::types::{DocumentText, Location, clamp_unit};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// PII subtype, declared in tie-break priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    NationalId,
    PaymentCard,
    BankAccount,
    Passport,
    DriversLicense,
    DateOfBirth,
    Phone,
    Email,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NationalId => "national_id",
            Self::PaymentCard => "payment_card",
            Self::BankAccount => "bank_account",
            Self::Passport => "passport",
            Self::DriversLicense => "drivers_license",
            Self::DateOfBirth => "date_of_birth",
            Self::Phone => "phone",
            Self::Email => "email",
        }
    }

    /// Subtypes whose presence alone makes the document high severity
    pub fn is_high_risk(&self) -> bool {
        matches!(
            self,
            Self::NationalId | Self::PaymentCard | Self::BankAccount | Self::Passport
        )
    }

    fn validate(&self, value: &str) -> bool {
        match self {
            Self::PaymentCard => luhn_valid(value),
            Self::NationalId => national_id_valid(value),
            _ => true,
        }
    }
}

impl fmt::Display for PiiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Luhn checksum over the digits of `value` (13 to 19 digits).
pub fn luhn_valid(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(idx, &d)| {
            if idx % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Structural check for 9-digit national IDs.
///
/// Rejects area `000`/`666`/`9xx`, group `00`, serial `0000`, and numbers
/// made of one repeated digit.
pub fn national_id_valid(value: &str) -> bool {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 9 {
        return false;
    }
    let (area, rest) = digits.split_at(3);
    let (group, serial) = rest.split_at(2);
    let repeated = digits.chars().all(|c| Some(c) == digits.chars().next());

    !(area == "000"
        || area == "666"
        || area.starts_with('9')
        || group == "00"
        || serial == "0000"
        || repeated)
}

/// A detected PII occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiFinding {
    pub kind: PiiKind,
    pub confidence: f64,
    pub location: Location,
    /// Byte offsets of the match within the page or region text
    pub start: usize,
    pub end: usize,
    /// Suggested replacement for the matched value
    pub redacted: String,
    /// Redacted text surrounding the match
    pub excerpt: String,
}

/// Overall PII severity for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiSeverity {
    None,
    Low,
    Medium,
    High,
}

impl PiiSeverity {
    /// Finding count above which severity is at least medium
    pub const MEDIUM_COUNT: usize = 5;

    pub fn from_findings(findings: &[PiiFinding]) -> Self {
        if findings.is_empty() {
            Self::None
        } else if findings.iter().any(|f| f.kind.is_high_risk()) {
            Self::High
        } else if findings.len() > Self::MEDIUM_COUNT {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One-line human-readable summary of PII findings.
pub fn summarize(findings: &[PiiFinding]) -> String {
    if findings.is_empty() {
        return "No PII detected".to_string();
    }
    let mut counts: BTreeMap<PiiKind, usize> = BTreeMap::new();
    for f in findings {
        *counts.entry(f.kind).or_default() += 1;
    }
    let parts: Vec<String> = counts
        .iter()
        .map(|(kind, n)| format!("{kind} x{n}"))
        .collect();
    format!(
        "Detected {} PII item(s): {} (severity: {})",
        findings.len(),
        parts.join(", "),
        PiiSeverity::from_findings(findings).as_str()
    )
}

#[derive(Debug)]
struct CompiledDetector {
    kind: PiiKind,
    base_confidence: f64,
    patterns: Vec<Regex>,
    keywords: Vec<String>,
}

/// Compiled PII rule set.
#[derive(Debug)]
pub struct PiiRules {
    detectors: Vec<CompiledDetector>,
    disclaiming: Vec<String>,
    context_window: usize,
    excerpt_radius: usize,
    boost: f64,
    penalty: f64,
    min_confidence: f64,
    redactor: Redactor,
}

struct Candidate {
    kind: PiiKind,
    confidence: f64,
    start: usize,
    end: usize,
}

impl Candidate {
    fn overlaps(&self, other: &Candidate) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl PiiRules {
    pub fn compile(cfg: &PiiConfig, redactor: Redactor) -> Result<Self> {
        let detectors = cfg
            .detectors
            .iter()
            .map(|det| {
                let patterns = det
                    .patterns
                    .iter()
                    .map(|p| {
                        Regex::new(p).map_err(|e| {
                            FusionError::config_with_source(
                                format!("invalid {} pattern: {p}", det.kind),
                                e,
                            )
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mut keywords = det.keywords.clone();
                keywords.extend(cfg.general_keywords.iter().cloned());
                keywords.sort();
                keywords.dedup();
                Ok(CompiledDetector {
                    kind: det.kind,
                    base_confidence: det.base_confidence,
                    patterns,
                    keywords,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            detectors,
            disclaiming: cfg.disclaiming_keywords.clone(),
            context_window: cfg.context_window,
            excerpt_radius: cfg.excerpt_radius,
            boost: cfg.corroborating_boost,
            penalty: cfg.disclaiming_penalty,
            min_confidence: cfg.min_confidence,
            redactor,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Scan one unit of text, ordered by byte offset.
    pub fn scan_text(&self, text: &str, location: &Location) -> Vec<PiiFinding> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for det in &self.detectors {
            for re in &det.patterns {
                for caps in re.captures_iter(text) {
                    let Some(m) = caps.name("value").or_else(|| caps.get(0)) else {
                        continue;
                    };
                    if m.as_str().is_empty() || !det.kind.validate(m.as_str()) {
                        continue;
                    }
                    let window = Window::around(text, m.start(), m.end(), self.context_window);
                    let delta = keyword_delta(
                        &window.surroundings(),
                        &det.keywords,
                        &self.disclaiming,
                        self.boost,
                        self.penalty,
                    );
                    let confidence = clamp_unit(det.base_confidence + delta);
                    if confidence < self.min_confidence {
                        tracing::debug!(
                            kind = %det.kind,
                            confidence,
                            "PII candidate below minimum confidence"
                        );
                        continue;
                    }
                    candidates.push(Candidate {
                        kind: det.kind,
                        confidence,
                        start: m.start(),
                        end: m.end(),
                    });
                }
            }
        }

        let accepted = dedupe(candidates);
        let masks: Vec<String> = accepted
            .iter()
            .map(|c| self.redactor.mask(&text[c.start..c.end]))
            .collect();

        accepted
            .iter()
            .zip(&masks)
            .map(|(c, redacted)| PiiFinding {
                kind: c.kind,
                confidence: c.confidence,
                location: location.clone(),
                start: c.start,
                end: c.end,
                redacted: redacted.clone(),
                excerpt: self.excerpt(text, c, &accepted, &masks),
            })
            .collect()
    }

    /// Scan every page and region of a document.
    pub fn scan_document(&self, doc: &DocumentText) -> Vec<PiiFinding> {
        let findings: Vec<PiiFinding> = doc
            .segments()
            .flat_map(|(location, text)| self.scan_text(text, &location))
            .collect();
        tracing::debug!(count = findings.len(), "PII scan complete");
        findings
    }

    fn excerpt(&self, text: &str, target: &Candidate, all: &[Candidate], masks: &[String]) -> String {
        let window = Window::around(text, target.start, target.end, self.excerpt_radius);
        let (ws, we) = window.span_in(text);

        let mut out = String::new();
        let mut cursor = ws;
        for (c, mask) in all.iter().zip(masks) {
            if c.end <= ws || c.start >= we {
                continue;
            }
            let s = c.start.max(ws);
            let e = c.end.min(we);
            out.push_str(&text[cursor..s]);
            if s == c.start && e == c.end {
                out.push_str(mask);
            } else {
                out.push_str(&mask_value(&text[s..e], 0));
            }
            cursor = e;
        }
        out.push_str(&text[cursor..we]);

        let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
        self.redactor.scrub(&collapsed).into_owned()
    }
}

/// Keep the highest-confidence match among overlapping ones; ties go to the
/// higher-priority subtype. Result is ordered by offset.
fn dedupe(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.kind.cmp(&b.kind))
            .then(a.start.cmp(&b.start))
    });
    let mut accepted: Vec<Candidate> = Vec::new();
    for c in candidates {
        if !accepted.iter().any(|a| a.overlaps(&c)) {
            accepted.push(c);
        }
    }
    accepted.sort_by_key(|c| (c.start, c.end));
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FusionConfig;
    use pretty_assertions::assert_eq;

    fn rules() -> PiiRules {
        FusionConfig::default().compile().expect("compile").pii
    }

    fn scan(text: &str) -> Vec<PiiFinding> {
        rules().scan_text(text, &Location::page(1))
    }

    #[test]
    fn test_luhn() {
        assert!(luhn_valid("4111 1111 1111 1111"));
        assert!(luhn_valid("5500-0000-0000-0004"));
        assert!(!luhn_valid("4111 1111 1111 1112"));
        assert!(!luhn_valid("4111"));
    }

    #[test]
    fn test_national_id_structure() {
        assert!(national_id_valid("123-45-6789"));
        assert!(!national_id_valid("000-12-3456"));
        assert!(!national_id_valid("666-12-3456"));
        assert!(!national_id_valid("111-11-1111"));
        assert!(!national_id_valid("123-00-4567"));
        assert!(!national_id_valid("123-45-0000"));
    }

    #[test]
    fn test_ssn_with_label_is_redacted() {
        let findings = scan("Our brochure. SSN: 123-45-6789 for enrollment.");
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.kind, PiiKind::NationalId);
        assert_eq!(f.redacted, "***-**-6789");
        assert!(f.excerpt.contains("***-**-6789"));
        assert!(!f.excerpt.contains("123-45"));
        assert!((f.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_card_never_reported() {
        let findings = scan("credit card 4111 1111 1111 1112 on file");
        assert!(findings.iter().all(|f| f.kind != PiiKind::PaymentCard));

        let findings = scan("credit card 4111 1111 1111 1111 on file");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, PiiKind::PaymentCard);
        assert_eq!(findings[0].redacted, "**** **** **** 1111");
    }

    #[test]
    fn test_disclaiming_context_lowers_confidence() {
        let plain = scan("Reach me at 555-867-5309 today");
        let disclaimed = scan("Dummy sample: 555-867-5309 (example only)");
        assert_eq!(plain.len(), 1);
        assert!(disclaimed.is_empty(), "disclaimed phone should fall below minimum");
    }

    #[test]
    fn test_account_number_uses_value_group() {
        let text = "Please debit account number: 12345678901 monthly";
        let findings = scan(text);
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.kind, PiiKind::BankAccount);
        assert_eq!(&text[f.start..f.end], "12345678901");
        assert_eq!(f.redacted, "*******8901");
    }

    #[test]
    fn test_email_and_date_of_birth() {
        let findings = scan("Contact jane.doe@corp.org. DOB: 04/12/1988");
        let kinds: Vec<PiiKind> = findings.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![PiiKind::Email, PiiKind::DateOfBirth]);
        assert_eq!(findings[0].redacted, "****.***@****.***");
    }

    #[test]
    fn test_overlap_keeps_highest_confidence() {
        let candidates = vec![
            Candidate {
                kind: PiiKind::BankAccount,
                confidence: 0.6,
                start: 0,
                end: 9,
            },
            Candidate {
                kind: PiiKind::NationalId,
                confidence: 0.6,
                start: 0,
                end: 9,
            },
            Candidate {
                kind: PiiKind::Phone,
                confidence: 0.9,
                start: 20,
                end: 30,
            },
        ];
        let kept = dedupe(candidates);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].kind, PiiKind::NationalId);
        assert_eq!(kept[1].kind, PiiKind::Phone);
    }

    #[test]
    fn test_excerpt_masks_neighbouring_values() {
        let findings = scan("SSN 123-45-6789 and card 4111111111111111");
        assert_eq!(findings.len(), 2);
        for f in &findings {
            assert!(!f.excerpt.contains("123-45"), "excerpt: {}", f.excerpt);
            assert!(!f.excerpt.contains("411111"), "excerpt: {}", f.excerpt);
        }
    }

    #[test]
    fn test_document_scan_locations_and_severity() {
        let doc = DocumentText::new(vec![
            crate::types::Page::new(1, "Nothing here."),
            crate::types::Page::new(2, "email: bob@corp.io").with_region("img-1", "SSN 123-45-6789"),
        ]);
        let findings = rules().scan_document(&doc);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].location, Location::page(2));
        assert_eq!(findings[1].location, Location::region(2, "img-1"));
        assert_eq!(PiiSeverity::from_findings(&findings), PiiSeverity::High);
        assert!(summarize(&findings).contains("national_id x1"));
        assert_eq!(summarize(&[]), "No PII detected");
    }

    #[test]
    fn test_empty_text() {
        assert!(scan("").is_empty());
        assert!(scan("   ").is_empty());
    }
}
