//! Citation aggregation
//!
//! Merges evidence from the PII scanner, the safety scanner and model
//! assertions into one deterministic, bounded, redacted list.

use crate::adapter::ClassificationResult;
use crate::config::CitationConfig;
use crate::pii::PiiFinding;
use crate::redact::Redactor;
use crate::safety::SafetyReport;
use crate::types::{DocumentText, Location, clamp_unit};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Evidence source, declared in ordering priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationKind {
    Pii,
    Safety,
    Text,
    Image,
}

impl CitationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pii => "pii",
            Self::Safety => "safety",
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for CitationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A piece of evidence supporting the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub kind: CitationKind,
    pub location: Location,
    pub excerpt: String,
    pub relevance: f64,
    pub label: String,
}

/// Builds the final citation list for a run.
#[derive(Debug, Clone)]
pub struct CitationAggregator {
    max_citations: usize,
    redactor: Redactor,
}

impl CitationAggregator {
    pub fn new(cfg: &CitationConfig, redactor: Redactor) -> Self {
        Self {
            max_citations: cfg.max_citations,
            redactor,
        }
    }

    /// Merge, filter, re-redact, order and cap citations.
    pub fn aggregate(
        &self,
        doc: &DocumentText,
        pii: &[PiiFinding],
        safety: &SafetyReport,
        models: &[&ClassificationResult],
    ) -> Vec<Citation> {
        let pii_citations = pii.iter().map(|f| Citation {
            kind: CitationKind::Pii,
            location: f.location.clone(),
            excerpt: f.excerpt.clone(),
            relevance: clamp_unit(f.confidence),
            label: format!("{} ({})", f.kind, f.redacted),
        });

        let safety_citations = safety.findings.iter().flat_map(|finding| {
            finding.hits.iter().map(move |hit| Citation {
                kind: CitationKind::Safety,
                location: hit.location.clone(),
                excerpt: hit.excerpt.clone(),
                relevance: clamp_unit(finding.confidence),
                label: format!("{} ({}): {}", finding.kind, finding.severity, hit.pattern),
            })
        });

        let model_citations = models.iter().flat_map(|result| {
            result.citations.iter().map(move |c| Citation {
                kind: match c.kind {
                    CitationKind::Image => CitationKind::Image,
                    _ => CitationKind::Text,
                },
                location: Location {
                    page: c.page,
                    region: c.region.clone(),
                },
                excerpt: c.excerpt.clone(),
                relevance: clamp_unit(c.relevance.unwrap_or(result.confidence)),
                label: format!("{} model ({})", result.provenance, result.adapter),
            })
        });

        let mut dropped_out_of_bounds = 0usize;
        let mut dropped_unredactable = 0usize;
        let mut citations: Vec<Citation> = Vec::new();

        for mut citation in pii_citations.chain(safety_citations).chain(model_citations) {
            if !doc.contains(&citation.location) {
                dropped_out_of_bounds += 1;
                continue;
            }
            if self.redactor.exposes_raw(&citation.excerpt) {
                citation.excerpt = self.redactor.scrub(&citation.excerpt).into_owned();
                if citation.kind == CitationKind::Pii && self.redactor.exposes_raw(&citation.excerpt)
                {
                    dropped_unredactable += 1;
                    continue;
                }
            }
            let duplicate = citations.iter_mut().find(|c| {
                c.kind == citation.kind
                    && c.location == citation.location
                    && c.excerpt == citation.excerpt
            });
            match duplicate {
                Some(existing) => existing.relevance = existing.relevance.max(citation.relevance),
                None => citations.push(citation),
            }
        }

        if dropped_out_of_bounds > 0 || dropped_unredactable > 0 {
            tracing::debug!(
                dropped_out_of_bounds,
                dropped_unredactable,
                "Citations dropped during aggregation"
            );
        }

        citations.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then(a.kind.cmp(&b.kind))
                .then_with(|| a.location.cmp(&b.location))
                .then_with(|| a.excerpt.cmp(&b.excerpt))
        });
        if self.max_citations > 0 {
            citations.truncate(self.max_citations);
        }
        citations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ModelCitation, RawClassification};
    use crate::config::FusionConfig;
    use crate::types::{Page, Provenance};
    use pretty_assertions::assert_eq;

    fn aggregator(max: usize) -> CitationAggregator {
        CitationAggregator::new(
            &CitationConfig { max_citations: max },
            Redactor::new(4).expect("redactor"),
        )
    }

    fn model_result(citations: Vec<ModelCitation>) -> ClassificationResult {
        let mut raw = RawClassification::new("Confidential", 0.6, "r");
        raw.citations = citations;
        raw.validate(Provenance::Primary, "mock").expect("valid")
    }

    fn text_citation(page: u32, excerpt: &str, relevance: f64) -> ModelCitation {
        ModelCitation {
            kind: CitationKind::Text,
            page,
            region: None,
            excerpt: excerpt.to_string(),
            relevance: Some(relevance),
        }
    }

    #[test]
    fn test_ordering_and_kinds() {
        let doc = DocumentText::new(vec![
            Page::new(1, "Contains gore. SSN: 123-45-6789"),
            Page::new(2, "second page").with_region("img-1", "photo"),
        ]);
        let rules = FusionConfig::default().compile().expect("compile");
        let pii = rules.pii.scan_document(&doc);
        let safety = rules.safety.scan_document(&doc);
        let model = model_result(vec![
            text_citation(2, "second page", 0.8),
            ModelCitation {
                kind: CitationKind::Image,
                page: 2,
                region: Some("img-1".into()),
                excerpt: "photo".into(),
                relevance: Some(0.8),
            },
        ]);

        let citations = aggregator(50).aggregate(&doc, &pii, &safety, &[&model]);
        let kinds: Vec<CitationKind> = citations.iter().map(|c| c.kind).collect();
        // pii 0.8, text 0.8, image 0.8, safety 0.8: ties broken by kind priority
        assert_eq!(
            kinds,
            vec![
                CitationKind::Pii,
                CitationKind::Safety,
                CitationKind::Text,
                CitationKind::Image
            ]
        );
        assert!(citations[0].excerpt.contains("***-**-6789"));
    }

    #[test]
    fn test_out_of_bounds_dropped() {
        let doc = DocumentText::from_plain("one page");
        let model = model_result(vec![
            text_citation(1, "one page", 0.5),
            text_citation(7, "ghost", 0.9),
            ModelCitation {
                kind: CitationKind::Image,
                page: 1,
                region: Some("missing".into()),
                excerpt: String::new(),
                relevance: None,
            },
        ]);
        let citations = aggregator(50).aggregate(&doc, &[], &SafetyReport::default(), &[&model]);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].location, Location::page(1));
    }

    #[test]
    fn test_model_excerpts_are_re_redacted() {
        let doc = DocumentText::from_plain("x");
        let model = model_result(vec![text_citation(1, "SSN 123-45-6789 appears", 0.9)]);
        let citations = aggregator(50).aggregate(&doc, &[], &SafetyReport::default(), &[&model]);
        assert_eq!(citations[0].excerpt, "SSN ***-**-6789 appears");
    }

    #[test]
    fn test_cap_and_duplicates() {
        let doc = DocumentText::from_plain("x");
        let model = model_result(
            (0..10)
                .map(|i| text_citation(1, &format!("quote {i}"), f64::from(i) / 10.0))
                .chain(std::iter::once(text_citation(1, "quote 9", 0.95)))
                .collect(),
        );
        let citations = aggregator(3).aggregate(&doc, &[], &SafetyReport::default(), &[&model]);
        let excerpts: Vec<&str> = citations.iter().map(|c| c.excerpt.as_str()).collect();
        assert_eq!(excerpts, vec!["quote 9", "quote 8", "quote 7"]);
        assert_eq!(citations[0].relevance, 0.95);
    }

    #[test]
    fn test_missing_relevance_uses_result_confidence() {
        let doc = DocumentText::from_plain("x");
        let model = model_result(vec![ModelCitation {
            kind: CitationKind::Pii,
            page: 1,
            region: None,
            excerpt: "claimed".into(),
            relevance: None,
        }]);
        let citations = aggregator(0).aggregate(&doc, &[], &SafetyReport::default(), &[&model]);
        assert_eq!(citations[0].kind, CitationKind::Text);
        assert_eq!(citations[0].relevance, 0.6);
    }
}
