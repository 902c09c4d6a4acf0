use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use nominal_miner::analysis::{ChatAnalyzer, PromptTemplate, TraceWriter};
use nominal_miner::config::{init_default_config, LoadedConfig, CONFIG_FILENAME, CONFIG_ENV};
use nominal_miner::lang::WhatlangDetector;
use nominal_miner::orchestrator::{Orchestrator, RunOptions, StopFlag};
use nominal_miner::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "nominal-miner")]
#[command(
    about = "Extract aligned sentence pairs from a spreadsheet and annotate their nominalizations via an LLM",
    long_about = None
)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input workbook (.xlsx) or delimited export (.csv/.tsv)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Results CSV (default: <input_stem>_analysis.csv); invalid pairs go to <stem>_invalid.csv
    #[arg(short, long, value_name = "CSV")]
    output: Option<PathBuf>,

    /// Config file path (default: $NOMINAL_MINER_CONFIG, then nominal-miner.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Valid pairs per batch (50..=2000)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Leading rows to skip
    #[arg(long)]
    skip_rows: Option<usize>,

    /// Expected source language code (e.g. en)
    #[arg(long)]
    source_lang: Option<String>,

    /// Analyze at most N valid pairs
    #[arg(long)]
    max_pairs: Option<usize>,

    /// Validate and batch only; write the invalid-pairs file, call no API
    #[arg(long)]
    dry_run: bool,

    /// Only warnings and errors on stderr
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.quiet);
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = match args.init_config_dir.clone() {
            Some(d) => d,
            None => std::env::current_dir().context("current dir")?,
        };
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let input = match args.input {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  nominal-miner <corpus.xlsx>\n\nTIPS:\n  - Run `nominal-miner --init-config` to write {CONFIG_FILENAME} and prompts/analysis.txt.\n  - Default config search: {CONFIG_FILENAME} (upwards), or set {CONFIG_ENV}.\n"
            );
            return Ok(());
        }
    };
    let output = match args.output {
        Some(p) => p,
        None => {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("output")
                .to_string();
            input.with_file_name(format!("{stem}_analysis.csv"))
        }
    };

    let mut loaded = LoadedConfig::discover(&input, args.config.clone())?;
    if loaded.path.exists() {
        progress.info(format!("config: {}", loaded.path.display()));
    } else {
        progress.info("config: built-in defaults");
    }
    let cfg = &mut loaded.app;
    if let Some(n) = args.batch_size {
        cfg.processing.batch_size = n;
    }
    if let Some(n) = args.skip_rows {
        cfg.file_structure.skip_rows = n;
    }
    if let Some(lang) = args.source_lang.clone() {
        cfg.file_structure.language.source = lang;
    }
    cfg.validate().context("invalid configuration")?;

    let cfg = &loaded.app;
    let detector = WhatlangDetector;
    let options = RunOptions {
        max_pairs: args.max_pairs,
        dry_run: args.dry_run,
        ..RunOptions::from_config(cfg)
    };

    let analyzer = if args.dry_run {
        None
    } else {
        let prompt = PromptTemplate::load(loaded.config_dir(), &cfg.prompts)?;
        let trace = if cfg.trace.enabled {
            let mut dir = PathBuf::from(&cfg.trace.dir);
            if dir.is_relative() {
                let base = output
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."));
                dir = base.join(dir);
            }
            TraceWriter::new(dir, true)?
        } else {
            TraceWriter::disabled()
        };
        Some(ChatAnalyzer::from_config(cfg, prompt, trace)?)
    };

    let mut orchestrator = Orchestrator::new(cfg, &detector, &progress).with_options(options);
    if let Some(a) = analyzer.as_ref() {
        orchestrator = orchestrator.with_analyzer(a);
    }
    let stop = StopFlag::new();
    stop.stop_on_signals()?;
    let summary = orchestrator.run(&input, &output, &stop)?;

    let r = &summary.reader;
    progress.info(format!(
        "rows read {}, skipped {}, dropped {} short / {} blank",
        r.rows_seen, r.rows_skipped, r.rows_dropped_short, r.rows_dropped_blank
    ));
    progress.info(format!(
        "{} batches: {} valid, {} invalid, {} analyzed, {} findings, {} failed calls",
        summary.batches,
        summary.valid,
        summary.invalid,
        summary.analyzed,
        summary.findings,
        summary.failed_calls
    ));
    if let Some(p) = summary.results_path.as_ref() {
        progress.info(format!("results: {}", p.display()));
    }
    if summary.invalid > 0 {
        progress.info(format!("invalid pairs: {}", summary.invalid_path.display()));
    }
    Ok(())
}
