//! `docguard` command-line front end
//!
//! ## Commands
//!
//! - `docguard classify <FILE>` - Run the full decision pipeline
//! - `docguard scan <FILE>` - Run only the PII and content safety scanners
//! - `docguard config check` - Validate and compile the configuration
//!
//! ## Exit Codes
//! - 0: Decision emitted, no review needed
//! - 1: Human review required
//! - 2: Blocked by content safety policy
//! - 3: Configuration or I/O error

pub mod classify_cmd;
pub mod config_cmd;

pub use classify_cmd::{ClassifyArgs, ScanArgs};
pub use config_cmd::ConfigCli;

use anyhow::Context;
use docguard_fusion::{DocumentText, FusionConfig};
use std::path::Path;

pub const EXIT_OK: i32 = 0;
pub const EXIT_REVIEW: i32 = 1;
pub const EXIT_BLOCKED: i32 = 2;
pub const EXIT_ERROR: i32 = 3;

/// Load configuration from an explicit path or the default resolution chain.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<FusionConfig> {
    match path {
        Some(path) => FusionConfig::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => FusionConfig::load().context("failed to load config"),
    }
}

/// Read a text file; form feeds separate pages.
pub fn read_document(path: &Path) -> anyhow::Result<DocumentText> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read document {}", path.display()))?;
    Ok(DocumentText::from_paged_text(&text))
}
