//! `docguard config` subcommands

use crate::{EXIT_ERROR, EXIT_OK};
use clap::{Parser, Subcommand};
use docguard_fusion::FusionConfig;
use owo_colors::OwoColorize;
use std::path::PathBuf;

/// Configuration utilities
#[derive(Debug, Parser)]
pub struct ConfigCli {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

impl ConfigCli {
    pub fn run(self) -> i32 {
        match self.command {
            ConfigSubcommand::Check(args) => run_check(args),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the configuration and compile every pattern table
    Check(CheckArgs),
}

#[derive(Debug, Parser)]
pub struct CheckArgs {
    /// Config file (default: $DOCGUARD_CONFIG, then ~/.config/docguard/fusion.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

/// Where the checked configuration came from.
#[derive(Debug)]
struct CheckReport {
    path: PathBuf,
    from_file: bool,
    outcome: Result<FusionConfig, String>,
}

fn check(args: &CheckArgs) -> CheckReport {
    let path = args
        .config
        .clone()
        .unwrap_or_else(FusionConfig::resolve_config_path);
    let from_file = path.exists();

    let loaded = if from_file || args.config.is_some() {
        FusionConfig::load_from_path(&path)
    } else {
        Ok(FusionConfig::default())
    };
    let outcome = loaded
        .and_then(|cfg| cfg.compile().map(|_| cfg))
        .map_err(|e| e.to_string());

    CheckReport {
        path,
        from_file,
        outcome,
    }
}

fn run_check(args: CheckArgs) -> i32 {
    let report = check(&args);
    if args.json {
        print_json(&report);
    } else {
        print_human(&report);
    }
    if report.outcome.is_ok() {
        EXIT_OK
    } else {
        EXIT_ERROR
    }
}

fn print_human(report: &CheckReport) {
    let source = if report.from_file {
        report.path.display().to_string()
    } else {
        format!("built-in defaults ({} not found)", report.path.display())
    };
    println!("\n Fusion config check\n");
    println!("Source: {source}");

    match &report.outcome {
        Ok(cfg) => {
            println!("PII detectors:       {}", cfg.pii.detectors.len());
            println!("Safety categories:   {}", cfg.safety.categories.len());
            println!(
                "Dual verification:   {}",
                if cfg.classification.dual_verification { "on" } else { "off" }
            );
            println!(
                "Conflict threshold:  {:.2}",
                cfg.agreement.conflict_threshold
            );
            println!(
                "Review threshold:    {:.2}",
                cfg.hitl.low_confidence_threshold
            );
            println!("\n{}", "Configuration valid".green());
        }
        Err(err) => {
            println!("\n{} {err}", "Configuration invalid:".red());
        }
    }
}

fn print_json(report: &CheckReport) {
    let output = match &report.outcome {
        Ok(cfg) => serde_json::json!({
            "path": report.path.display().to_string(),
            "from_file": report.from_file,
            "valid": true,
            "pii_detectors": cfg.pii.detectors.len(),
            "safety_categories": cfg.safety.categories.len(),
            "dual_verification": cfg.classification.dual_verification,
            "conflict_threshold": cfg.agreement.conflict_threshold,
            "low_confidence_threshold": cfg.hitl.low_confidence_threshold,
        }),
        Err(err) => serde_json::json!({
            "path": report.path.display().to_string(),
            "from_file": report.from_file,
            "valid": false,
            "error": err,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
}
