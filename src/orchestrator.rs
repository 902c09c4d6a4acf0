use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::analysis::Analyzer;
use crate::config::AppConfig;
use crate::ir::{Batch, Finding};
use crate::lang::LanguageDetector;
use crate::output::{invalid_path_for, InvalidWriter, ResultWriter};
use crate::pipeline::BatchPipeline;
use crate::progress::ConsoleProgress;
use crate::sheet::{ReaderStats, Workbook};

/// Cooperative cancellation shared with whoever may interrupt a run.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sets the flag on Ctrl-C or SIGTERM so the run ends after the current pair and keeps its
    /// flushed output. Only one handler can be installed per process.
    pub fn stop_on_signals(&self) -> anyhow::Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("interrupt received; finishing the current pair");
            flag.stop();
        })
        .context("install signal handler")
    }
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Stop after this many valid pairs.
    pub max_pairs: Option<usize>,
    /// Classify only; write the invalid sidecar but call no analyzer.
    pub dry_run: bool,
    /// Pause after every `requests_per_pause` analysis calls (0 disables).
    pub requests_per_pause: usize,
    pub request_pause: Duration,
    pub batch_delay: Duration,
}

impl RunOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_pairs: None,
            dry_run: false,
            requests_per_pause: cfg.processing.requests_per_pause,
            request_pause: Duration::from_secs(1),
            batch_delay: Duration::from_secs(cfg.processing.delay_between_batches),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub valid: usize,
    pub invalid: usize,
    pub analyzed: usize,
    pub findings: usize,
    pub result_rows: usize,
    pub failed_calls: usize,
    pub stopped: bool,
    pub limit_reached: bool,
    pub reader: ReaderStats,
    pub results_path: Option<PathBuf>,
    pub invalid_path: PathBuf,
}

/// Drives one input file through the batch pipeline, the analyzer and the two writers.
pub struct Orchestrator<'a> {
    cfg: &'a AppConfig,
    detector: &'a dyn LanguageDetector,
    analyzer: Option<&'a dyn Analyzer>,
    progress: &'a ConsoleProgress,
    options: RunOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        cfg: &'a AppConfig,
        detector: &'a dyn LanguageDetector,
        progress: &'a ConsoleProgress,
    ) -> Self {
        Self {
            cfg,
            detector,
            analyzer: None,
            progress,
            options: RunOptions::from_config(cfg),
        }
    }

    pub fn with_analyzer(mut self, analyzer: &'a dyn Analyzer) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Results and invalid rows are appended and flushed after every batch, so an interrupted
    /// run keeps everything written so far. A read error mid-file ends the run with that error.
    pub fn run(&self, input: &Path, output: &Path, stop: &StopFlag) -> anyhow::Result<RunSummary> {
        let analyzer = match (self.options.dry_run, self.analyzer) {
            (true, _) => None,
            (false, Some(a)) => Some(a),
            (false, None) => bail!("no analyzer configured"),
        };

        let mut workbook =
            Workbook::open(input).with_context(|| format!("open input: {}", input.display()))?;
        let rows = workbook.rows(&self.cfg.file_structure)?;
        let pipeline = BatchPipeline::from_config(self.cfg, self.detector);

        let invalid_path = invalid_path_for(output);
        let mut invalid_out: Option<InvalidWriter> = None;
        let mut results_out = match analyzer {
            Some(_) => Some(ResultWriter::open(output)?),
            None => None,
        };

        let mut summary = RunSummary {
            results_path: results_out.as_ref().map(|w| w.path().to_path_buf()),
            invalid_path,
            ..RunSummary::default()
        };
        self.progress.info(format!(
            "processing {} (batch size {}, skip rows {})",
            input.display(),
            pipeline.batch_size(),
            self.cfg.file_structure.skip_rows
        ));

        let mut batches = pipeline.batches(rows);
        let mut requests = 0usize;
        loop {
            if stop.is_stopped() {
                summary.stopped = true;
                break;
            }
            let batch = match batches.next() {
                None => break,
                Some(Ok(batch)) => batch,
                Some(Err(err)) => {
                    if let Some(w) = invalid_out.as_mut() {
                        w.flush()?;
                    }
                    if let Some(w) = results_out.as_mut() {
                        w.flush()?;
                    }
                    return Err(err).with_context(|| format!("read input: {}", input.display()));
                }
            };
            if summary.batches > 0 && !self.options.batch_delay.is_zero() {
                std::thread::sleep(self.options.batch_delay);
            }
            summary.batches += 1;
            summary.valid += batch.valid.len();
            summary.invalid += batch.invalid.len();
            tracing::info!(
                batch = summary.batches,
                valid = batch.valid.len(),
                invalid = batch.invalid.len(),
                "batch ready"
            );

            if !batch.invalid.is_empty() {
                if invalid_out.is_none() {
                    invalid_out = Some(InvalidWriter::open(&summary.invalid_path)?);
                }
                if let Some(w) = invalid_out.as_mut() {
                    w.write_all(&batch.invalid)?;
                    w.flush()?;
                }
            }
            match (analyzer, results_out.as_mut()) {
                (Some(a), Some(w)) => {
                    self.analyze_batch(a, &batch, w, stop, &mut requests, &mut summary)?;
                    w.flush()?;
                }
                _ => self.count_dry_run(&batch, &mut summary),
            }

            self.progress.info(format!(
                "batch {}: {} valid, {} invalid (totals: {} analyzed, {} invalid)",
                summary.batches,
                batch.valid.len(),
                batch.invalid.len(),
                summary.analyzed,
                summary.invalid
            ));
            if summary.stopped || summary.limit_reached {
                break;
            }
        }

        summary.reader = batches.rows().stats();
        summary.result_rows = results_out.as_ref().map_or(0, |w| w.rows());
        if summary.stopped {
            self.progress.info("stopped; partial results kept");
        }
        tracing::info!(
            batches = summary.batches,
            valid = summary.valid,
            invalid = summary.invalid,
            analyzed = summary.analyzed,
            failed = summary.failed_calls,
            "run finished"
        );
        Ok(summary)
    }

    fn limit_hit(&self, summary: &RunSummary) -> bool {
        self.options
            .max_pairs
            .is_some_and(|max| summary.analyzed >= max)
    }

    fn count_dry_run(&self, batch: &Batch, summary: &mut RunSummary) {
        for _ in &batch.valid {
            if self.limit_hit(summary) {
                summary.limit_reached = true;
                return;
            }
            summary.analyzed += 1;
        }
    }

    fn analyze_batch(
        &self,
        analyzer: &dyn Analyzer,
        batch: &Batch,
        out: &mut ResultWriter,
        stop: &StopFlag,
        requests: &mut usize,
        summary: &mut RunSummary,
    ) -> anyhow::Result<()> {
        let total = batch.valid.len();
        for (i, pair) in batch.valid.iter().enumerate() {
            if stop.is_stopped() {
                summary.stopped = true;
                return Ok(());
            }
            if self.limit_hit(summary) {
                summary.limit_reached = true;
                return Ok(());
            }
            let every = self.options.requests_per_pause;
            if every > 0 && *requests > 0 && *requests % every == 0 {
                std::thread::sleep(self.options.request_pause);
            }
            *requests += 1;
            summary.analyzed += 1;

            let findings = match analyzer.analyze(pair) {
                Ok(f) => f,
                Err(err) => {
                    tracing::warn!(row = pair.row_number, error = %format!("{err:#}"), "analysis failed");
                    summary.failed_calls += 1;
                    Vec::new()
                }
            };
            summary.findings += findings.len();
            if findings.is_empty() {
                out.write(pair, &Finding::placeholder())?;
            } else {
                for f in &findings {
                    out.write(pair, f)?;
                }
            }
            self.progress
                .progress(&format!("batch {}", summary.batches), i + 1, total);
        }
        Ok(())
    }
}
