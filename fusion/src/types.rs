//! Shared domain types: categories, document pages, locations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sensitivity category, totally ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Public,
    Confidential,
    HighlySensitive,
    Unsafe,
}

impl Category {
    /// All categories in severity order
    pub fn all() -> [Self; 4] {
        [
            Self::Public,
            Self::Confidential,
            Self::HighlySensitive,
            Self::Unsafe,
        ]
    }

    /// Ordinal position on the severity scale (0..=3)
    pub fn severity(&self) -> u8 {
        match self {
            Self::Public => 0,
            Self::Confidential => 1,
            Self::HighlySensitive => 2,
            Self::Unsafe => 3,
        }
    }

    /// Largest possible ordinal distance between two categories
    pub const MAX_DISTANCE: u8 = 3;

    /// Ordinal distance on the severity scale
    pub fn distance(&self, other: Category) -> u8 {
        self.severity().abs_diff(other.severity())
    }

    /// The more severe of two categories
    pub fn more_severe(self, other: Category) -> Category {
        self.max(other)
    }

    /// Stable identifier used in serialized output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Confidential => "Confidential",
            Self::HighlySensitive => "HighlySensitive",
            Self::Unsafe => "Unsafe",
        }
    }

    /// Human-readable label used in prompts
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Confidential => "Confidential",
            Self::HighlySensitive => "Highly Sensitive",
            Self::Unsafe => "Unsafe",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Lenient parse: case-insensitive, ignores spaces, dashes and underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "public" => Ok(Self::Public),
            "confidential" => Ok(Self::Confidential),
            "highlysensitive" => Ok(Self::HighlySensitive),
            "unsafe" => Ok(Self::Unsafe),
            _ => Err(format!("unknown category: {s}")),
        }
    }
}

/// Which classification call produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Primary,
    Secondary,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a score into [0,1]; NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Document text
// ─────────────────────────────────────────────────────────────────────────────

/// Page/region reference inside a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    /// 1-based page number
    pub page: u32,
    /// Region identifier within the page (image or layout block)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Location {
    pub fn page(page: u32) -> Self {
        Self { page, region: None }
    }

    pub fn region(page: u32, region: impl Into<String>) -> Self {
        Self {
            page,
            region: Some(region.into()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "p{}#{region}", self.page),
            None => write!(f, "p{}", self.page),
        }
    }
}

/// Text extracted from a bounded region of a page (e.g. OCR of an image).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    #[serde(default)]
    pub text: String,
}

/// One page of extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub regions: Vec<Region>,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            regions: Vec::new(),
        }
    }

    pub fn with_region(mut self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.regions.push(Region {
            id: id.into(),
            text: text.into(),
        });
        self
    }
}

/// Extracted document text with its page map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentText {
    pub pages: Vec<Page>,
}

impl DocumentText {
    /// Page separator used by common text extractors
    pub const PAGE_BREAK: char = '\u{000C}';

    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    /// Single-page document
    pub fn from_plain(text: impl Into<String>) -> Self {
        Self {
            pages: vec![Page::new(1, text)],
        }
    }

    /// Split on form feeds into 1-based pages
    pub fn from_paged_text(text: &str) -> Self {
        let pages = text
            .split(Self::PAGE_BREAK)
            .enumerate()
            .map(|(idx, chunk)| Page::new(idx as u32 + 1, chunk))
            .collect();
        Self { pages }
    }

    /// Every text unit (page body and regions) with its location
    pub fn segments(&self) -> impl Iterator<Item = (Location, &str)> {
        self.pages.iter().flat_map(|page| {
            std::iter::once((Location::page(page.number), page.text.as_str())).chain(
                page.regions
                    .iter()
                    .map(|r| (Location::region(page.number, r.id.clone()), r.text.as_str())),
            )
        })
    }

    /// True when no page or region carries non-whitespace text
    pub fn is_blank(&self) -> bool {
        self.segments().all(|(_, text)| text.trim().is_empty())
    }

    /// Whether a location falls within the declared pages/regions
    pub fn contains(&self, location: &Location) -> bool {
        self.pages.iter().any(|page| {
            page.number == location.page
                && match &location.region {
                    None => true,
                    Some(region) => page.regions.iter().any(|r| &r.id == region),
                }
        })
    }
}

/// Claims made about the document by whoever submitted it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredContext {
    /// Submitter asserts the document is public
    #[serde(default)]
    pub claimed_public: bool,
}

impl DeclaredContext {
    pub fn claimed_public() -> Self {
        Self {
            claimed_public: true,
        }
    }
}
