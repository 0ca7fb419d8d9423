use clap::{Parser, Subcommand};
use docguard_cli::{ClassifyArgs, ConfigCli, ScanArgs};
use tracing_subscriber::EnvFilter;

/// Document sensitivity classification with PII, content safety and
/// dual-model verification
#[derive(Debug, Parser)]
#[command(name = "docguard", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify a document and emit a decision record
    Classify(ClassifyArgs),

    /// Run only the PII and content safety scanners
    Scan(ScanArgs),

    /// Configuration utilities
    Config(ConfigCli),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Classify(args) => args.run().await,
        Command::Scan(args) => args.run(),
        Command::Config(cli) => cli.run(),
    };
    std::process::exit(code);
}
