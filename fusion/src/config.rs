//! Fusion configuration loading
//!
//! Loads configuration from `~/.config/docguard/fusion.toml` (or the
//! `DOCGUARD_CONFIG` env var). Every section has built-in defaults, so an
//! empty file is a valid configuration. The loaded value is validated and
//! compiled once into [`CompiledRules`], then shared read-only across runs.

use crate::errors::{FusionError, Result};
use crate::pii::{PiiKind, PiiRules};
use crate::redact::Redactor;
use crate::safety::{SafetyKind, SafetyRules, SafetySeverity};
use crate::types::Category;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the decision pipeline
#[derive(Debug, Deserialize, Clone)]
pub struct FusionConfig {
    /// PII scanner rules
    #[serde(default)]
    pub pii: PiiConfig,

    /// Content safety rules
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Dual-model agreement policy
    #[serde(default)]
    pub agreement: AgreementConfig,

    /// Human review triggers
    #[serde(default)]
    pub hitl: HitlConfig,

    /// Classification calls (dual verification, timeouts, retries)
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Citation aggregation
    #[serde(default)]
    pub citations: CitationConfig,

    /// Prompt rendering
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Category definitions handed to prompt assembly
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryDefinition>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            pii: PiiConfig::default(),
            safety: SafetyConfig::default(),
            agreement: AgreementConfig::default(),
            hitl: HitlConfig::default(),
            classification: ClassificationConfig::default(),
            citations: CitationConfig::default(),
            prompt: PromptConfig::default(),
            categories: default_categories(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PII
// ─────────────────────────────────────────────────────────────────────────────

/// PII scanner configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PiiConfig {
    /// Characters on each side of a match inspected for context keywords
    #[serde(default = "default_pii_context_window")]
    pub context_window: usize,

    /// Characters on each side of a match kept in the evidence excerpt
    #[serde(default = "default_excerpt_radius")]
    pub excerpt_radius: usize,

    /// Digits left visible at the end of a redacted value
    #[serde(default = "default_visible_suffix_digits")]
    pub visible_suffix_digits: usize,

    /// Findings below this confidence are discarded
    #[serde(default = "default_pii_min_confidence")]
    pub min_confidence: f64,

    /// Confidence added per corroborating keyword in the window
    #[serde(default = "default_corroborating_boost")]
    pub corroborating_boost: f64,

    /// Confidence removed per disclaiming keyword in the window
    #[serde(default = "default_disclaiming_penalty")]
    pub disclaiming_penalty: f64,

    /// Keywords that corroborate any PII subtype
    #[serde(default = "default_general_keywords")]
    pub general_keywords: Vec<String>,

    /// Keywords that suggest the value is illustrative, not real
    #[serde(default = "default_disclaiming_keywords")]
    pub disclaiming_keywords: Vec<String>,

    /// Subtype detectors
    #[serde(default = "default_pii_detectors")]
    pub detectors: Vec<PiiDetectorConfig>,
}

/// One PII subtype detector
#[derive(Debug, Deserialize, Clone)]
pub struct PiiDetectorConfig {
    pub kind: PiiKind,

    /// Confidence before context adjustment
    pub base_confidence: f64,

    /// Regular expressions; a named group `value` narrows the matched span
    pub patterns: Vec<String>,

    /// Subtype-specific corroborating keywords
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_pii_context_window() -> usize {
    50
}
fn default_excerpt_radius() -> usize {
    24
}
fn default_visible_suffix_digits() -> usize {
    4
}
fn default_pii_min_confidence() -> f64 {
    0.30
}
fn default_corroborating_boost() -> f64 {
    0.20
}
fn default_disclaiming_penalty() -> f64 {
    0.30
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn default_general_keywords() -> Vec<String> {
    strings(&["confidential", "private", "personal", "classified"])
}

fn default_disclaiming_keywords() -> Vec<String> {
    strings(&[
        "example",
        "sample",
        "dummy",
        "placeholder",
        "fake",
        "test",
        "xxx",
    ])
}

fn detector(
    kind: PiiKind,
    base_confidence: f64,
    patterns: &[&str],
    keywords: &[&str],
) -> PiiDetectorConfig {
    PiiDetectorConfig {
        kind,
        base_confidence,
        patterns: strings(patterns),
        keywords: strings(keywords),
    }
}

fn default_pii_detectors() -> Vec<PiiDetectorConfig> {
    vec![
        detector(
            PiiKind::NationalId,
            0.60,
            &[r"\b\d{3}-\d{2}-\d{4}\b", r"\b\d{3} \d{2} \d{4}\b"],
            &["social security", "ssn", "taxpayer id", "tin"],
        ),
        detector(
            PiiKind::NationalId,
            0.35,
            &[r"\b\d{9}\b"],
            &["social security", "ssn", "taxpayer id"],
        ),
        detector(
            PiiKind::PaymentCard,
            0.70,
            &[
                r"\b(?:4\d{3}|5[1-5]\d{2}|6011|3[47]\d{2})(?:[ -]?\d{4}){3}\b",
                r"\b3[47]\d{2}[ -]?\d{6}[ -]?\d{5}\b",
            ],
            &["card number", "credit card", "debit card", "payment", "visa", "mastercard"],
        ),
        detector(
            PiiKind::BankAccount,
            0.60,
            &[r"(?i)\b(?:account|acct\.?)\s*(?:no\.?|number)?\s*[#:]?\s*(?P<value>\d{8,17})\b"],
            &["bank", "routing", "iban", "deposit"],
        ),
        detector(
            PiiKind::Email,
            0.70,
            &[r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"],
            &["email", "e-mail", "contact"],
        ),
        detector(
            PiiKind::Phone,
            0.50,
            &[r"(?:\+1[ .-]?)?(?:\(\d{3}\)\s?|\b\d{3}[ .-])\d{3}[ .-]\d{4}\b"],
            &["phone", "tel", "mobile", "cell", "call"],
        ),
        detector(
            PiiKind::DriversLicense,
            0.40,
            &[r"(?i)\b(?:driver'?s?\s+licen[cs]e|DL)\s*(?:no\.?|number)?\s*[#:]?\s*(?P<value>[A-Z]{1,2}\d{6,8})\b"],
            &["license", "dmv"],
        ),
        detector(
            PiiKind::Passport,
            0.40,
            &[r"(?i)\bpassport\s*(?:no\.?|number)?\s*[#:]?\s*(?P<value>[A-Z]{1,2}\d{6,9})\b"],
            &["passport", "travel document", "nationality"],
        ),
        detector(
            PiiKind::DateOfBirth,
            0.60,
            &[r"(?i)\b(?:DOB|date of birth|birth date)\s*[:\s]\s*(?P<value>\d{1,2}[/-]\d{1,2}[/-]\d{2,4})\b"],
            &["born", "age"],
        ),
    ]
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            context_window: default_pii_context_window(),
            excerpt_radius: default_excerpt_radius(),
            visible_suffix_digits: default_visible_suffix_digits(),
            min_confidence: default_pii_min_confidence(),
            corroborating_boost: default_corroborating_boost(),
            disclaiming_penalty: default_disclaiming_penalty(),
            general_keywords: default_general_keywords(),
            disclaiming_keywords: default_disclaiming_keywords(),
            detectors: default_pii_detectors(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Safety
// ─────────────────────────────────────────────────────────────────────────────

/// Content safety configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SafetyConfig {
    /// Confidence of a flagged category before suppression penalties
    #[serde(default = "default_safety_base_confidence")]
    pub base_confidence: f64,

    /// Characters on each side of a hit inspected for negation/mitigation
    #[serde(default = "default_safety_context_window")]
    pub context_window: usize,

    /// Hit weight multiplier when a negation cue precedes the hit
    #[serde(default = "default_negation_multiplier")]
    pub negation_multiplier: f64,

    /// Hit weight multiplier in fictional, quoted or educational context
    #[serde(default = "default_mitigating_multiplier")]
    pub mitigating_multiplier: f64,

    /// Confidence removed when any contributing hit was suppressed
    #[serde(default = "default_suppression_penalty")]
    pub suppression_penalty: f64,

    #[serde(default = "default_negation_cues")]
    pub negation_cues: Vec<String>,

    #[serde(default = "default_mitigating_cues")]
    pub mitigating_cues: Vec<String>,

    #[serde(default = "default_safety_categories")]
    pub categories: Vec<SafetyCategoryConfig>,
}

/// One safety category with its pattern table
#[derive(Debug, Deserialize, Clone)]
pub struct SafetyCategoryConfig {
    pub kind: SafetyKind,

    /// Tier for patterns that do not declare their own
    pub severity: SafetySeverity,

    /// Weighted hit sum must exceed this to flag the category
    #[serde(default = "default_category_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub description: String,

    pub patterns: Vec<PatternSpec>,
}

/// A keyword (plain string) or a detailed pattern entry
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum PatternSpec {
    Keyword(String),
    Detailed {
        pattern: String,
        #[serde(default = "default_pattern_weight")]
        weight: f64,
        #[serde(default)]
        tier: Option<SafetySeverity>,
        /// Treat `pattern` as a regular expression instead of a literal phrase
        #[serde(default)]
        regex: bool,
    },
}

impl PatternSpec {
    pub fn pattern(&self) -> &str {
        match self {
            Self::Keyword(p) => p,
            Self::Detailed { pattern, .. } => pattern,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Self::Keyword(_) => default_pattern_weight(),
            Self::Detailed { weight, .. } => *weight,
        }
    }

    pub fn tier(&self) -> Option<SafetySeverity> {
        match self {
            Self::Keyword(_) => None,
            Self::Detailed { tier, .. } => *tier,
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Self::Detailed { regex: true, .. })
    }
}

fn default_safety_base_confidence() -> f64 {
    0.80
}
fn default_safety_context_window() -> usize {
    50
}
fn default_negation_multiplier() -> f64 {
    0.30
}
fn default_mitigating_multiplier() -> f64 {
    0.50
}
fn default_suppression_penalty() -> f64 {
    0.40
}
fn default_category_threshold() -> f64 {
    0.50
}
fn default_pattern_weight() -> f64 {
    1.0
}

fn default_negation_cues() -> Vec<String> {
    strings(&["no", "not", "never", "without", "free of", "zero"])
}

fn default_mitigating_cues() -> Vec<String> {
    strings(&[
        "education",
        "educational",
        "awareness",
        "prevention",
        "training",
        "security research",
        "academic",
        "news report",
        "fiction",
        "novel",
        "hypothetical",
    ])
}

fn keyword(p: &str) -> PatternSpec {
    PatternSpec::Keyword(p.to_string())
}

fn weighted(p: &str, weight: f64) -> PatternSpec {
    PatternSpec::Detailed {
        pattern: p.to_string(),
        weight,
        tier: None,
        regex: false,
    }
}

fn tiered(p: &str, tier: SafetySeverity) -> PatternSpec {
    PatternSpec::Detailed {
        pattern: p.to_string(),
        weight: default_pattern_weight(),
        tier: Some(tier),
        regex: false,
    }
}

fn weighted_regex(p: &str, weight: f64) -> PatternSpec {
    PatternSpec::Detailed {
        pattern: p.to_string(),
        weight,
        tier: None,
        regex: true,
    }
}

/// "minor" only counts next to sexual or explicit terms
const MINOR_IN_SEXUAL_CONTEXT: &str = r"\bminors?\b(?:\W+\w+){0,4}?\W+(?:sexual\w*|explicit|nude)\b|\b(?:sexual\w*|explicit|nude)\b(?:\W+\w+){0,4}?\W+minors?\b";

fn default_safety_categories() -> Vec<SafetyCategoryConfig> {
    use SafetySeverity::{Critical, High, Low, Medium};

    let category = |kind, severity, description: &str, patterns| SafetyCategoryConfig {
        kind,
        severity,
        threshold: default_category_threshold(),
        description: description.to_string(),
        patterns,
    };

    vec![
        category(
            SafetyKind::ChildSafety,
            Critical,
            "Content that may violate child safety",
            vec![
                keyword("child abuse"),
                keyword("child exploitation"),
                keyword("child pornography"),
                keyword("csam"),
                weighted("underage", 0.5),
                weighted_regex(MINOR_IN_SEXUAL_CONTEXT, 1.0),
            ],
        ),
        category(
            SafetyKind::HateSpeech,
            High,
            "Hate speech or discriminatory content",
            vec![
                keyword("hate speech"),
                keyword("racial slur"),
                keyword("racist"),
                keyword("sexist"),
                keyword("homophobic"),
                keyword("xenophobic"),
                weighted("discriminatory", 0.5),
            ],
        ),
        category(
            SafetyKind::Violence,
            High,
            "Violent or graphic content",
            vec![
                keyword("graphic violence"),
                keyword("gore"),
                keyword("torture"),
                keyword("violent death"),
                keyword("mass shooting"),
                keyword("terrorism"),
                weighted("brutal", 0.4),
                tiered("weapon schematic", Critical),
                tiered("bomb making", Critical),
            ],
        ),
        category(
            SafetyKind::Exploitation,
            High,
            "Exploitative content",
            vec![
                keyword("human trafficking"),
                keyword("forced labor"),
                keyword("sexual exploitation"),
                weighted("exploitation", 0.5),
                weighted("coercion", 0.5),
            ],
        ),
        category(
            SafetyKind::Criminal,
            Medium,
            "Criminal activity instructions",
            vec![
                keyword("how to make drugs"),
                keyword("illegal weapons"),
                keyword("fraud scheme"),
                keyword("money laundering"),
                keyword("identity theft"),
                keyword("hacking tutorial"),
                keyword("illegal activities"),
                weighted("break into", 0.5),
            ],
        ),
        category(
            SafetyKind::CyberThreat,
            Medium,
            "Cyber threat content",
            vec![
                keyword("malware"),
                keyword("ransomware"),
                keyword("exploit code"),
                keyword("zero-day"),
                keyword("cyber attack"),
                keyword("ddos"),
                keyword("botnet"),
                keyword("sql injection"),
                keyword("xss attack"),
                weighted("trojan", 0.5),
                weighted("backdoor", 0.5),
            ],
        ),
        category(
            SafetyKind::PoliticalMisinformation,
            Low,
            "Political misinformation",
            vec![
                keyword("election fraud"),
                keyword("fake news"),
                keyword("disinformation campaign"),
                weighted("conspiracy", 0.5),
                weighted("propaganda", 0.5),
            ],
        ),
    ]
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            base_confidence: default_safety_base_confidence(),
            context_window: default_safety_context_window(),
            negation_multiplier: default_negation_multiplier(),
            mitigating_multiplier: default_mitigating_multiplier(),
            suppression_penalty: default_suppression_penalty(),
            negation_cues: default_negation_cues(),
            mitigating_cues: default_mitigating_cues(),
            categories: default_safety_categories(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agreement / HITL / classification calls
// ─────────────────────────────────────────────────────────────────────────────

/// Dual-model agreement weights
#[derive(Debug, Deserialize, Clone)]
pub struct AgreementConfig {
    /// Weight of the category-agreement component
    #[serde(default = "default_category_weight")]
    pub category_weight: f64,

    /// Weight of the confidence-similarity component
    #[serde(default = "default_confidence_weight")]
    pub confidence_weight: f64,

    /// Composite agreement below this marks a conflict
    #[serde(default = "default_conflict_threshold")]
    pub conflict_threshold: f64,
}

fn default_category_weight() -> f64 {
    0.70
}
fn default_confidence_weight() -> f64 {
    0.30
}
fn default_conflict_threshold() -> f64 {
    0.90
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            category_weight: default_category_weight(),
            confidence_weight: default_confidence_weight(),
            conflict_threshold: default_conflict_threshold(),
        }
    }
}

/// Human-in-the-loop trigger thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct HitlConfig {
    /// Resolved confidence below this requires review
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,

    /// Top-two category scores within this margin count as a near tie
    #[serde(default = "default_near_tie_margin")]
    pub near_tie_margin: f64,
}

fn default_low_confidence_threshold() -> f64 {
    0.70
}
fn default_near_tie_margin() -> f64 {
    0.05
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: default_low_confidence_threshold(),
            near_tie_margin: default_near_tie_margin(),
        }
    }
}

/// Classification call settings
#[derive(Debug, Deserialize, Clone)]
pub struct ClassificationConfig {
    /// Invoke the secondary adapter when one is configured
    #[serde(default = "default_dual_verification")]
    pub dual_verification: bool,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f32,

    /// Randomize backoff delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_dual_verification() -> bool {
    true
}
fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> usize {
    3
}
fn default_initial_backoff_ms() -> u64 {
    200
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_backoff_multiplier() -> f32 {
    2.0
}
fn default_jitter() -> bool {
    true
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            dual_verification: default_dual_verification(),
            call_timeout_ms: default_call_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl ClassificationConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Citation aggregation settings
#[derive(Debug, Deserialize, Clone)]
pub struct CitationConfig {
    /// Maximum citations kept after ordering (0 = unlimited)
    #[serde(default = "default_max_citations")]
    pub max_citations: usize,
}

fn default_max_citations() -> usize {
    50
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            max_citations: default_max_citations(),
        }
    }
}

/// Prompt rendering settings
#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Document text beyond this many characters is truncated in the prompt
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
}

fn default_system_prompt() -> String {
    "You are a regulatory document classification expert. Classify the document into \
     exactly one sensitivity category, cite the evidence that supports the decision, \
     and never reproduce personal data verbatim."
        .to_string()
}
fn default_max_document_chars() -> usize {
    24_000
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_document_chars: default_max_document_chars(),
        }
    }
}

/// Definition of one sensitivity category for prompt assembly
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CategoryDefinition {
    pub category: Category,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_categories() -> Vec<CategoryDefinition> {
    let def = |category, description: &str, keywords: &[&str]| CategoryDefinition {
        category,
        description: description.to_string(),
        keywords: strings(keywords),
    };
    vec![
        def(
            Category::Public,
            "Content intended for public release: marketing material, product brochures, published reports.",
            &["brochure", "press release", "public", "marketing"],
        ),
        def(
            Category::Confidential,
            "Internal business content not meant for outside parties: internal memos, plans, non-public financials.",
            &["internal", "confidential", "proprietary", "do not distribute"],
        ),
        def(
            Category::HighlySensitive,
            "Content containing personal or regulated data: national IDs, payment cards, bank accounts, medical records.",
            &["ssn", "account number", "patient", "passport"],
        ),
        def(
            Category::Unsafe,
            "Content that violates safety policy: child safety, hate speech, violence, exploitation, criminal instructions.",
            &["violence", "exploitation", "malware"],
        ),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

impl FusionConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "DOCGUARD_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "fusion.toml";

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `DOCGUARD_CONFIG` environment variable
    /// 2. `~/.config/docguard/fusion.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "Fusion config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FusionError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: FusionConfig = toml::from_str(contents)
            .map_err(|e| FusionError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve the configuration file path
    pub fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("docguard")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let unit_fields = [
            ("pii.min_confidence", self.pii.min_confidence),
            ("pii.corroborating_boost", self.pii.corroborating_boost),
            ("pii.disclaiming_penalty", self.pii.disclaiming_penalty),
            ("safety.base_confidence", self.safety.base_confidence),
            ("safety.negation_multiplier", self.safety.negation_multiplier),
            ("safety.mitigating_multiplier", self.safety.mitigating_multiplier),
            ("safety.suppression_penalty", self.safety.suppression_penalty),
            ("agreement.conflict_threshold", self.agreement.conflict_threshold),
            ("hitl.low_confidence_threshold", self.hitl.low_confidence_threshold),
            ("hitl.near_tie_margin", self.hitl.near_tie_margin),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(FusionError::config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.pii.detectors.is_empty() {
            return Err(FusionError::config("pii.detectors must not be empty"));
        }
        for det in &self.pii.detectors {
            if det.patterns.is_empty() {
                return Err(FusionError::config(format!(
                    "pii detector {} has no patterns",
                    det.kind
                )));
            }
            if !(0.0..=1.0).contains(&det.base_confidence) {
                return Err(FusionError::config(format!(
                    "pii detector {} base_confidence must be within [0, 1]",
                    det.kind
                )));
            }
        }

        if self.safety.categories.is_empty() {
            return Err(FusionError::config("safety.categories must not be empty"));
        }
        for cat in &self.safety.categories {
            if cat.patterns.is_empty() {
                return Err(FusionError::config(format!(
                    "safety category {} has no patterns",
                    cat.kind
                )));
            }
            if cat.threshold < 0.0 {
                return Err(FusionError::config(format!(
                    "safety category {} threshold must not be negative",
                    cat.kind
                )));
            }
            if cat.patterns.iter().any(|p| p.weight() < 0.0) {
                return Err(FusionError::config(format!(
                    "safety category {} has a negative pattern weight",
                    cat.kind
                )));
            }
        }

        let weights = &self.agreement;
        if weights.category_weight < 0.0 || weights.confidence_weight < 0.0 {
            return Err(FusionError::config("agreement weights must not be negative"));
        }
        let weight_sum = weights.category_weight + weights.confidence_weight;
        if weight_sum <= 0.0 {
            return Err(FusionError::config("agreement weights must not both be zero"));
        }
        if (weight_sum - 1.0).abs() > 0.01 {
            tracing::warn!(
                weight_sum,
                "Agreement weights don't sum to 1.0, composite is normalized by their sum"
            );
        }

        for category in Category::all() {
            if self.category_definition(category).is_none() {
                return Err(FusionError::config(format!(
                    "missing category definition for {category}"
                )));
            }
        }

        if self.classification.backoff_multiplier < 1.0 {
            return Err(FusionError::config(
                "classification.backoff_multiplier must be at least 1.0",
            ));
        }
        if self.classification.call_timeout_ms == 0 {
            return Err(FusionError::config(
                "classification.call_timeout_ms must be positive",
            ));
        }

        Ok(())
    }

    /// Compile pattern tables into the immutable rule set shared by all runs
    pub fn compile(&self) -> Result<CompiledRules> {
        self.validate()?;
        let redactor = Redactor::new(self.pii.visible_suffix_digits)?;
        Ok(CompiledRules {
            pii: PiiRules::compile(&self.pii, redactor.clone())?,
            safety: SafetyRules::compile(&self.safety, redactor.clone())?,
            redactor,
        })
    }

    /// Definition for a category, if configured
    pub fn category_definition(&self, category: Category) -> Option<&CategoryDefinition> {
        self.categories.iter().find(|d| d.category == category)
    }
}

/// Compiled scanners, built once per process.
#[derive(Debug)]
pub struct CompiledRules {
    pub pii: PiiRules,
    pub safety: SafetyRules,
    pub redactor: Redactor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let cfg = FusionConfig::default();
        assert_eq!(cfg.agreement.conflict_threshold, 0.90);
        assert_eq!(cfg.hitl.low_confidence_threshold, 0.70);
        assert_eq!(cfg.pii.visible_suffix_digits, 4);
        assert!(cfg.classification.dual_verification);
        assert_eq!(cfg.categories.len(), 4);
        cfg.validate().expect("defaults validate");
    }

    #[test]
    fn test_defaults_compile() {
        let rules = FusionConfig::default().compile().expect("compile");
        assert!(!rules.pii.is_empty());
        assert!(!rules.safety.is_empty());
    }

    #[test]
    fn test_default_defines_every_category() {
        let cfg = FusionConfig::default();
        for category in Category::all() {
            assert!(cfg.category_definition(category).is_some(), "{category}");
        }
        let parsed = FusionConfig::parse("").expect("should parse");
        assert_eq!(cfg.categories, parsed.categories);
        assert_eq!(cfg.safety.categories.len(), parsed.safety.categories.len());
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let cfg = FusionConfig::parse("").expect("should parse");
        assert_eq!(cfg.agreement.category_weight, 0.70);
        assert_eq!(cfg.safety.categories.len(), 7);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            [agreement]
            conflict_threshold = 0.8

            [hitl]
            low_confidence_threshold = 0.6

            [classification]
            dual_verification = false
            max_retries = 1
        "#;

        let cfg = FusionConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.agreement.conflict_threshold, 0.8);
        assert_eq!(cfg.agreement.category_weight, 0.70);
        assert_eq!(cfg.hitl.low_confidence_threshold, 0.6);
        assert!(!cfg.classification.dual_verification);
        assert_eq!(cfg.classification.max_retries, 1);
    }

    #[test]
    fn test_parse_safety_table_with_mixed_patterns() {
        let toml = r#"
            [[safety.categories]]
            kind = "cyber_threat"
            severity = "medium"
            threshold = 0.9
            patterns = [
                "ransomware",
                { pattern = "botnet", weight = 0.5 },
                { pattern = "exploit\\s+kit", regex = true, tier = "high" },
            ]
        "#;

        let cfg = FusionConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.safety.categories.len(), 1);
        let cat = &cfg.safety.categories[0];
        assert_eq!(cat.kind, SafetyKind::CyberThreat);
        assert_eq!(cat.patterns[0], PatternSpec::Keyword("ransomware".into()));
        assert_eq!(cat.patterns[1].weight(), 0.5);
        assert!(cat.patterns[2].is_regex());
        assert_eq!(cat.patterns[2].tier(), Some(SafetySeverity::High));
        cfg.compile().expect("compiles");
    }

    #[test]
    fn test_threshold_out_of_range_is_fatal() {
        let err = FusionConfig::parse("[agreement]\nconflict_threshold = 1.5\n")
            .expect_err("should reject");
        assert_eq!(err.category(), crate::ErrorCategory::ConfigurationError);
    }

    #[test]
    fn test_invalid_regex_is_fatal() {
        let toml = r#"
            [[pii.detectors]]
            kind = "email"
            base_confidence = 0.5
            patterns = ["([unclosed"]
        "#;
        let cfg = FusionConfig::parse(toml).expect("parses before compile");
        assert!(cfg.compile().is_err());
    }

    #[test]
    fn test_missing_category_definition_is_fatal() {
        let toml = r#"
            [[categories]]
            category = "Public"
            description = "only one"
        "#;
        assert!(FusionConfig::parse(toml).is_err());
    }

    #[test]
    fn test_unknown_tier_is_fatal() {
        let toml = r#"
            [[safety.categories]]
            kind = "violence"
            severity = "apocalyptic"
            patterns = ["gore"]
        "#;
        assert!(FusionConfig::parse(toml).is_err());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fusion.toml");
        std::fs::write(&path, "[citations]\nmax_citations = 5\n").expect("write");

        let cfg = FusionConfig::load_from_path(&path).expect("load");
        assert_eq!(cfg.citations.max_citations, 5);

        let missing = FusionConfig::load_from_path(&dir.path().join("absent.toml"));
        assert!(missing.is_err());
    }
}
