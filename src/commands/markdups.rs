//! Streaming duplicate marking command.
//!
//! Reads a qname-grouped SAM text stream, marks duplicate templates with the
//! 0x400 flag in a single pass, and writes a summary metrics file.
//!
//! # Algorithm
//!
//! 1. Forward header lines verbatim
//! 2. Batch consecutive records sharing a query name into templates
//! 3. Compute the template's 5'-soft-clip-corrected fingerprint
//! 4. Probe-and-insert the fingerprint in a shared Bloom filter
//! 5. The first occurrence passes unchanged; later occurrences are marked

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use clap::Parser;
use log::info;

use fgmark_lib::bloom::BloomFilter;
use fgmark_lib::logging::{OperationTimer, format_count};
use fgmark_lib::metrics::write_metrics;
use fgmark_lib::pipeline::{self, PipelineConfig};
use fgmark_lib::validation::{
    is_stdio_path, validate_at_least_one, validate_file_exists, validate_rate,
};

use crate::commands::command::Command;

/// Streaming duplicate marking command.
#[derive(Debug, Parser)]
#[command(
    name = "markdups",
    about = "Mark PCR duplicates on a qname-grouped SAM stream in a single pass",
    long_about = r#"
Marks PCR duplicates on a SAM text stream. Input must be qname-grouped
(all records of one query name contiguous), as emitted directly by most
aligners. The first template seen for each fingerprint is kept; later
templates with the same fingerprint get the duplicate flag (0x400) on every
record, secondary and supplementary alignments included.

Memory use is dominated by the Bloom filter, sized from the expected
template count and the target false positive rate, or capped explicitly
with --mem. A false positive marks a unique template as a duplicate, so
pick a rate you can live with; the default loses about one template per
million.

With more than one worker, output order across templates is not preserved.
Record order within a template always is.
"#
)]
pub struct MarkDuplicates {
    /// Expected number of templates in the input
    #[arg(short = 'n', long = "n-items", default_value_t = 1e9)]
    pub n_items: f64,

    /// Target false positive rate once n items are stored
    #[arg(short = 'p', long = "fp-rate", default_value_t = 1e-6)]
    pub fp_rate: f64,

    /// Bloom filter memory budget (e.g. "4GiB"); overrides the optimal
    /// sizing derived from n and p
    #[arg(short = 'm', long = "mem")]
    pub mem: Option<ByteSize>,

    /// Number of worker threads
    #[arg(short = 'w', long = "workers", default_value_t = 1)]
    pub workers: usize,

    /// Path for the summary metrics file (default: alongside the input)
    #[arg(long = "metrics")]
    pub metrics: Option<PathBuf>,

    /// Input SAM path; '-' or omitted reads standard input
    #[arg(long = "input", default_value = "-")]
    pub input: PathBuf,

    /// Output SAM path; '-' or omitted writes standard output
    #[arg(long = "output", default_value = "-")]
    pub output: PathBuf,
}

impl MarkDuplicates {
    /// The metrics path: explicit, or derived from the input path.
    #[must_use]
    pub fn metrics_path(&self) -> PathBuf {
        match &self.metrics {
            Some(path) => path.clone(),
            None if is_stdio_path(&self.input) => PathBuf::from("fgmark.metrics"),
            None => PathBuf::from(format!("{}.metrics", self.input.display())),
        }
    }

    fn validated_n(&self) -> Result<u64> {
        if !self.n_items.is_finite() || self.n_items < 1.0 {
            return Err(fgmark_lib::errors::FgmarkError::InvalidParameter {
                parameter: "n-items".to_string(),
                reason: format!("must be at least 1, got {}", self.n_items),
            }
            .into());
        }
        Ok(self.n_items as u64)
    }

    fn open_input(&self) -> Result<Box<dyn BufRead + Send>> {
        if is_stdio_path(&self.input) {
            Ok(Box::new(BufReader::new(std::io::stdin())))
        } else {
            validate_file_exists(&self.input, "input SAM")?;
            let file = File::open(&self.input)
                .with_context(|| format!("Failed to open input: {}", self.input.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
    }

    fn open_output(&self) -> Result<Box<dyn Write + Send>> {
        if is_stdio_path(&self.output) {
            Ok(Box::new(BufWriter::new(std::io::stdout())))
        } else {
            let file = File::create(&self.output)
                .with_context(|| format!("Failed to create output: {}", self.output.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
    }
}

impl Command for MarkDuplicates {
    fn execute(&self) -> Result<()> {
        let n = self.validated_n()?;
        validate_rate(self.fp_rate, "fp-rate")?;
        validate_at_least_one(self.workers as u64, "workers")?;

        let filter = match &self.mem {
            Some(mem) => BloomFilter::with_mem(n, self.fp_rate, mem.as_u64())?,
            None => BloomFilter::new(n, self.fp_rate)?,
        };
        info!(
            "Bloom filter initialized with n={}, p={:e}, m={}, k={}",
            filter.n(),
            filter.p(),
            filter.m(),
            filter.k()
        );
        info!("Input: {}", self.input.display());
        info!("Output: {}", self.output.display());
        info!("Workers: {}", self.workers);

        let input = self.open_input()?;
        let output = self.open_output()?;

        let timer = OperationTimer::new("Marking duplicates");
        let config = PipelineConfig { workers: self.workers, ..Default::default() };
        let metrics = pipeline::run(input, output, &filter, &config)?;

        let metrics_path = self.metrics_path();
        write_metrics(&metrics_path, &metrics, &filter)?;
        info!("Metrics written to {}", metrics_path.display());

        info!(
            "Marked {} of {} templates as duplicates ({:.2}% duplicate rate), {} unmapped",
            format_count(metrics.templates_marked_duplicate),
            format_count(metrics.templates),
            metrics.duplicate_rate() * 100.0,
            format_count(metrics.templates_unmapped)
        );
        info!("Estimated stored cardinality: {}", format_count(filter.count_estimate()));
        timer.log_completion(metrics.reads);

        Ok(())
    }
}
