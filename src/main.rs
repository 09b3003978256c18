use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lockscope::{Analyzer, DeadlockAnalysis, EventPayload, flush_logger, showcase};
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Full analysis as pretty-printed JSON
    Json,
    /// Remediation advice only
    Markdown,
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Lockscope - PostgreSQL Deadlock Analyzer With Visualization Support"
)]
struct Cli {
    /// Path to the deadlock report (plain log text, or a JSON event with --payload)
    input: PathBuf,

    /// Treat the input as a JSON event payload instead of raw log text
    #[arg(long)]
    payload: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Keep process blocks that have no query line
    #[arg(long)]
    lenient: bool,

    /// Longest cycle to enumerate
    #[arg(long, default_value_t = lockscope::DEFAULT_MAX_CYCLE_LENGTH)]
    max_cycle_length: usize,

    /// Write a JSON-lines event log; "{timestamp}" in the name is expanded
    #[arg(long)]
    log: Option<PathBuf>,

    /// Open the analysis in the web viewer at this URL
    #[arg(long, value_name = "VIEWER_URL")]
    showcase: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let input = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;

    let mut analyzer = Analyzer::new()
        .lenient_queries(cli.lenient)
        .max_cycle_length(cli.max_cycle_length);
    if let Some(log) = &cli.log {
        analyzer = analyzer.with_log(log);
    }
    let analyzer = analyzer.start()?;

    let result = if cli.payload {
        analyzer.analyze_json(&input)
    } else {
        analyzer.analyze(&EventPayload::from(input))
    };
    flush_logger().context("Failed to flush event log")?;

    let analysis: DeadlockAnalysis = result.context("Analysis failed")?;
    match cli.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&analysis)?),
        Format::Markdown => println!("{}", analysis.recommended_fix),
    }

    if let Some(viewer_url) = &cli.showcase {
        showcase(&analysis, viewer_url)?;
    }

    Ok(())
}
