//! Streaming reader/worker/writer pipeline.
//!
//! One reader thread tokenizes records and batches consecutive same-qname
//! groups; `W` worker threads fingerprint each group and consult the shared
//! Bloom filter; one writer thread emits the possibly-marked records. The
//! bounded channels provide backpressure, and channel disconnection is the
//! shutdown signal: the reader drops its sender at end of input, workers
//! drain until disconnect, the writer drains until every worker is done.
//!
//! Ordering: record order within a group is always preserved. With one
//! worker, batch order end to end equals input order. With more workers,
//! cross-batch output order is unspecified.
//!
//! A stage that fails stops consuming and returns its error through its join
//! handle; peers observe the closed channel, drain, and exit cleanly. The
//! first error is propagated to the caller.

use std::io::{BufRead, Write};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use crossbeam_queue::SegQueue;

use crate::bloom::BloomFilter;
use crate::errors::FgmarkError;
use crate::fingerprint::template_fingerprint;
use crate::metrics::MarkMetrics;
use crate::sam::SamRecord;

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// qname groups per work batch (the unit of parallelism).
    pub batch_groups: usize,
    /// Bounded queue capacity, in batches.
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { workers: 1, batch_groups: 50, queue_capacity: 1000 }
    }
}

/// A batch of qname groups.
type Batch = Vec<Vec<SamRecord>>;

/// Runs the full pipeline: header pass-through, then parallel duplicate
/// marking until end of input. Returns the merged run counters.
pub fn run<R, W>(
    mut input: R,
    mut output: W,
    filter: &BloomFilter,
    config: &PipelineConfig,
) -> Result<MarkMetrics>
where
    R: BufRead + Send,
    W: Write + Send,
{
    // The header is forwarded on the calling thread before any worker
    // starts, so records can never overtake it.
    let mut line_number: u64 = 0;
    let first_record = loop {
        let mut line = Vec::new();
        let n = input.read_until(b'\n', &mut line).context("reading input")?;
        if n == 0 {
            break None;
        }
        line_number += 1;
        trim_newline(&mut line);
        if line.first() == Some(&b'@') {
            output.write_all(&line).context("writing header")?;
            output.write_all(b"\n").context("writing header")?;
        } else {
            break Some(line);
        }
    };

    let Some(first_line) = first_record else {
        output.flush().context("flushing output")?;
        return Ok(MarkMetrics::default());
    };

    let worker_metrics: SegQueue<MarkMetrics> = SegQueue::new();
    let (work_tx, work_rx) = bounded::<Batch>(config.queue_capacity);
    let (out_tx, out_rx) = bounded::<Batch>(config.queue_capacity);

    std::thread::scope(|scope| -> Result<()> {
        let reader = scope.spawn({
            let batch_groups = config.batch_groups;
            move || read_groups(input, first_line, line_number, batch_groups, &work_tx)
        });

        let mut workers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let work_rx = work_rx.clone();
            let out_tx = out_tx.clone();
            let collected = &worker_metrics;
            workers.push(scope.spawn(move || mark_batches(&work_rx, &out_tx, filter, collected)));
        }
        drop(work_rx);
        drop(out_tx);

        let writer = scope.spawn(move || write_batches(&out_rx, &mut output));

        let reader_result = join_stage(reader, "reader");
        let worker_result: Result<()> =
            workers.into_iter().try_for_each(|handle| join_stage(handle, "worker"));
        let writer_result = join_stage(writer, "writer");

        reader_result?;
        worker_result?;
        writer_result
    })?;

    let mut merged = MarkMetrics::default();
    while let Some(metrics) = worker_metrics.pop() {
        merged.merge(&metrics);
    }
    Ok(merged)
}

fn join_stage(
    handle: std::thread::ScopedJoinHandle<'_, Result<()>>,
    stage: &str,
) -> Result<()> {
    handle.join().map_err(|_| anyhow!("{stage} thread panicked"))?
}

fn trim_newline(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}

fn parse_record(line: Vec<u8>, line_number: u64) -> Result<SamRecord> {
    SamRecord::parse(line).map_err(|e| {
        FgmarkError::InvalidRecord { line_number, reason: e.to_string() }.into()
    })
}

/// Reader stage: accumulates consecutive same-qname records into groups,
/// groups into batches, and enqueues completed batches.
fn read_groups<R: BufRead>(
    mut input: R,
    first_line: Vec<u8>,
    mut line_number: u64,
    batch_groups: usize,
    tx: &Sender<Batch>,
) -> Result<()> {
    let mut group: Vec<SamRecord> = vec![parse_record(first_line, line_number)?];
    let mut batch: Batch = Vec::with_capacity(batch_groups);

    loop {
        let mut line = Vec::new();
        let n = input.read_until(b'\n', &mut line).context("reading input")?;
        if n == 0 {
            break;
        }
        line_number += 1;
        trim_newline(&mut line);
        if line.is_empty() {
            return Err(FgmarkError::InvalidRecord {
                line_number,
                reason: "empty line".to_string(),
            }
            .into());
        }
        if line[0] == b'@' {
            return Err(FgmarkError::InvalidRecord {
                line_number,
                reason: "header line after records".to_string(),
            }
            .into());
        }

        let record = parse_record(line, line_number)?;
        if record.name() == group[0].name() {
            group.push(record);
        } else {
            batch.push(std::mem::replace(&mut group, vec![record]));
            if batch.len() == batch_groups {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_groups));
                if tx.send(full).is_err() {
                    // Downstream failed; its error is the one that matters.
                    return Ok(());
                }
            }
        }
    }

    batch.push(group);
    let _ = tx.send(batch);
    Ok(())
}

/// Worker stage: fingerprint each group, consult the filter once per
/// template, mark every record of duplicate templates.
fn mark_batches(
    work_rx: &Receiver<Batch>,
    out_tx: &Sender<Batch>,
    filter: &BloomFilter,
    collected: &SegQueue<MarkMetrics>,
) -> Result<()> {
    let mut metrics = MarkMetrics::default();
    for mut batch in work_rx.iter() {
        for group in &mut batch {
            if let Err(e) = mark_group(group, filter, &mut metrics) {
                collected.push(metrics);
                return Err(e);
            }
        }
        if out_tx.send(batch).is_err() {
            break;
        }
    }
    collected.push(metrics);
    Ok(())
}

fn mark_group(
    group: &mut [SamRecord],
    filter: &BloomFilter,
    metrics: &mut MarkMetrics,
) -> Result<()> {
    metrics.reads += group.len() as u64;
    for record in group.iter() {
        if record.is_secondary() {
            metrics.secondary_reads += 1;
        }
        if record.is_supplementary() {
            metrics.supplementary_reads += 1;
        }
    }

    match template_fingerprint(group)? {
        None => metrics.templates_unmapped += 1,
        Some(fingerprint) => {
            metrics.templates += 1;
            if !filter.add(&fingerprint) {
                // Probably seen: the whole group, secondaries and
                // supplementaries included, takes the duplicate flag.
                metrics.templates_marked_duplicate += 1;
                metrics.reads_marked_duplicate += group.len() as u64;
                for record in group.iter_mut() {
                    record.set_duplicate();
                }
            }
        }
    }
    Ok(())
}

/// Writer stage: drains output batches to the destination, preserving
/// record order within each batch.
fn write_batches<W: Write>(out_rx: &Receiver<Batch>, output: &mut W) -> Result<()> {
    for batch in out_rx.iter() {
        for group in &batch {
            for record in group {
                record.write_to(output).context("writing output")?;
            }
        }
    }
    output.flush().context("flushing output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::flags;

    const HEADER: &str = "@HD\tVN:1.6\tGO:query\n@SQ\tSN:chr1\tLN:100000\n";

    fn record_line(name: &str, flag: u16, rname: &str, pos: i64, cigar: &str) -> String {
        format!("{name}\t{flag}\t{rname}\t{pos}\t60\t{cigar}\t*\t0\t0\tACGT\tFFFF\n")
    }

    fn run_on(input: &str, workers: usize) -> (Vec<String>, MarkMetrics) {
        let filter = BloomFilter::new(10_000, 1e-6).unwrap();
        let config = PipelineConfig { workers, ..Default::default() };
        let mut output = Vec::new();
        let metrics = run(input.as_bytes(), &mut output, &filter, &config).unwrap();
        let text = String::from_utf8(output).unwrap();
        (text.lines().map(str::to_string).collect(), metrics)
    }

    fn flag_of(line: &str) -> u16 {
        line.split('\t').nth(1).unwrap().parse().unwrap()
    }

    #[test]
    fn test_empty_input() {
        let (lines, metrics) = run_on("", 1);
        assert!(lines.is_empty());
        assert_eq!(metrics.reads, 0);
    }

    #[test]
    fn test_header_only_passthrough() {
        let (lines, metrics) = run_on(HEADER, 1);
        assert_eq!(lines, vec!["@HD\tVN:1.6\tGO:query", "@SQ\tSN:chr1\tLN:100000"]);
        assert_eq!(metrics.reads, 0);
    }

    #[test]
    fn test_single_end_duplicate_marked() {
        let input = format!(
            "{HEADER}{}{}",
            record_line("q1", 0, "chr1", 100, "100M"),
            record_line("q2", 0, "chr1", 100, "100M"),
        );
        let (lines, metrics) = run_on(&input, 1);
        assert_eq!(flag_of(&lines[2]), 0);
        assert_eq!(flag_of(&lines[3]), 0x400);
        assert_eq!(metrics.templates, 2);
        assert_eq!(metrics.templates_marked_duplicate, 1);
        assert_eq!(metrics.reads, 2);
        assert_eq!(metrics.reads_marked_duplicate, 1);
    }

    #[test]
    fn test_soft_clip_equivalent_marked() {
        let input = format!(
            "{HEADER}{}{}",
            record_line("q1", 0, "chr1", 100, "10S90M"),
            record_line("q2", 0, "chr1", 95, "15S85M"),
        );
        let (lines, _) = run_on(&input, 1);
        assert_eq!(flag_of(&lines[2]), 0);
        assert_eq!(flag_of(&lines[3]), 0x400);
    }

    #[test]
    fn test_reverse_strand_equivalent_marked() {
        let input = format!(
            "{HEADER}{}{}",
            record_line("q1", 16, "chr1", 100, "90M10S"),
            record_line("q2", 16, "chr1", 110, "5S80M10S"),
        );
        let (lines, _) = run_on(&input, 1);
        assert_eq!(flag_of(&lines[2]), 16);
        assert_eq!(flag_of(&lines[3]), 16 | 0x400);
    }

    #[test]
    fn test_mate_order_invariance() {
        let f_r1 = flags::PAIRED | flags::FIRST_SEGMENT;
        let f_r2 = flags::PAIRED | flags::LAST_SEGMENT | flags::REVERSE;
        let input = format!(
            "{HEADER}{}{}{}{}",
            record_line("q1", f_r1, "chr1", 100, "100M"),
            record_line("q1", f_r2, "chr1", 250, "100M"),
            // Same template, emitted R2 first.
            record_line("q2", f_r2, "chr1", 250, "100M"),
            record_line("q2", f_r1, "chr1", 100, "100M"),
        );
        let (lines, metrics) = run_on(&input, 1);
        assert_eq!(flag_of(&lines[2]) & 0x400, 0);
        assert_eq!(flag_of(&lines[3]) & 0x400, 0);
        assert_eq!(flag_of(&lines[4]) & 0x400, 0x400);
        assert_eq!(flag_of(&lines[5]) & 0x400, 0x400);
        assert_eq!(metrics.templates, 2);
        assert_eq!(metrics.templates_marked_duplicate, 1);
    }

    #[test]
    fn test_unmapped_template_skipped() {
        let unmapped = flags::PAIRED | flags::UNMAPPED | flags::MATE_UNMAPPED;
        let input = format!(
            "{HEADER}{}{}",
            record_line("q1", unmapped | flags::FIRST_SEGMENT, "*", 0, "*"),
            record_line("q1", unmapped | flags::LAST_SEGMENT, "*", 0, "*"),
        );
        let (lines, metrics) = run_on(&input, 1);
        assert_eq!(flag_of(&lines[2]) & 0x400, 0);
        assert_eq!(flag_of(&lines[3]) & 0x400, 0);
        assert_eq!(metrics.templates, 0);
        assert_eq!(metrics.templates_unmapped, 1);
        assert_eq!(metrics.reads, 2);
    }

    #[test]
    fn test_secondary_rides_with_primary() {
        let input = format!(
            "{HEADER}{}{}{}",
            record_line("q1", 0, "chr1", 100, "100M"),
            record_line("q2", 0, "chr1", 100, "100M"),
            record_line("q2", flags::SECONDARY, "chr1", 5000, "100M"),
        );
        let (lines, metrics) = run_on(&input, 1);
        assert_eq!(flag_of(&lines[2]) & 0x400, 0);
        assert_eq!(flag_of(&lines[3]) & 0x400, 0x400);
        assert_eq!(flag_of(&lines[4]) & 0x400, 0x400);
        assert_eq!(metrics.secondary_reads, 1);
        assert_eq!(metrics.reads_marked_duplicate, 2);
    }

    #[test]
    fn test_single_worker_preserves_order() {
        let mut input = String::from(HEADER);
        for i in 0..500 {
            input.push_str(&record_line(&format!("q{i}"), 0, "chr1", 100 + i, "100M"));
        }
        let (lines, metrics) = run_on(&input, 1);
        assert_eq!(lines.len(), 502);
        for (i, line) in lines[2..].iter().enumerate() {
            assert!(line.starts_with(&format!("q{i}\t")));
        }
        assert_eq!(metrics.templates, 500);
        assert_eq!(metrics.templates_marked_duplicate, 0);
    }

    #[test]
    fn test_multi_worker_same_records_any_order() {
        let mut input = String::from(HEADER);
        // 200 distinct templates, each emitted twice in adjacent groups.
        for i in 0..200 {
            input.push_str(&record_line(&format!("a{i}"), 0, "chr1", 1000 + i, "50M"));
            input.push_str(&record_line(&format!("b{i}"), 0, "chr1", 1000 + i, "50M"));
        }
        let (lines, metrics) = run_on(&input, 4);
        assert_eq!(lines.len(), 402);
        assert_eq!(metrics.templates, 400);
        assert_eq!(metrics.templates_marked_duplicate, 200);

        // Each coordinate appears exactly twice, exactly one copy marked.
        let mut names: Vec<String> = Vec::new();
        for line in &lines[2..] {
            let fields: Vec<&str> = line.split('\t').collect();
            names.push(fields[0].to_string());
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 400);
        let marked = lines[2..].iter().filter(|l| flag_of(l) & 0x400 != 0).count();
        assert_eq!(marked, 200);
    }

    #[test]
    fn test_parse_error_is_fatal() {
        let filter = BloomFilter::new(1000, 1e-3).unwrap();
        let input = format!("{HEADER}q1\t0\tchr1\n");
        let mut output = Vec::new();
        let err =
            run(input.as_bytes(), &mut output, &filter, &PipelineConfig::default()).unwrap_err();
        let record_err = err.downcast_ref::<FgmarkError>().expect("structured error");
        assert!(matches!(record_err, FgmarkError::InvalidRecord { line_number: 3, .. }));
    }

    #[test]
    fn test_late_header_is_fatal() {
        let input = format!(
            "{HEADER}{}@SQ\tSN:chr2\tLN:5\n",
            record_line("q1", 0, "chr1", 100, "100M")
        );
        let filter = BloomFilter::new(1000, 1e-3).unwrap();
        let err = run(input.as_bytes(), &mut Vec::new(), &filter, &PipelineConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("header line after records"));
    }

    #[test]
    fn test_split_qname_group_is_fatal() {
        // The same read of one qname twice in a group is the detectable
        // form of unordered input.
        let input = format!(
            "{HEADER}{}{}",
            record_line("q1", 0, "chr1", 100, "100M"),
            record_line("q1", 0, "chr1", 300, "100M"),
        );
        let filter = BloomFilter::new(1000, 1e-3).unwrap();
        let err = run(input.as_bytes(), &mut Vec::new(), &filter, &PipelineConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("qname-grouped"));
    }

    #[test]
    fn test_duplicates_across_batch_boundaries() {
        // Batches of one group each force every duplicate decision through
        // the shared filter rather than batch-local state.
        let filter = BloomFilter::new(1000, 1e-6).unwrap();
        let config = PipelineConfig { workers: 1, batch_groups: 1, queue_capacity: 2 };
        let mut input = String::from(HEADER);
        for i in 0..20 {
            input.push_str(&record_line(&format!("q{i}"), 0, "chr1", 42, "10M"));
        }
        let mut output = Vec::new();
        let metrics = run(input.as_bytes(), &mut output, &filter, &config).unwrap();
        assert_eq!(metrics.templates, 20);
        assert_eq!(metrics.templates_marked_duplicate, 19);
    }
}
