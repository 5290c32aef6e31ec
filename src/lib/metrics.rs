//! Run counters and the summary metrics file.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::bloom::BloomFilter;

/// Monotonic counters accumulated per worker and merged at shutdown.
#[derive(Debug, Default, Clone)]
pub struct MarkMetrics {
    /// Templates fingerprinted and tested against the filter.
    pub templates: u64,
    /// Templates marked as duplicates.
    pub templates_marked_duplicate: u64,
    /// Templates skipped because no primary alignment was mapped.
    pub templates_unmapped: u64,
    /// Records processed.
    pub reads: u64,
    /// Records emitted with the duplicate flag newly set.
    pub reads_marked_duplicate: u64,
    /// Secondary alignment records passed through.
    pub secondary_reads: u64,
    /// Supplementary alignment records passed through.
    pub supplementary_reads: u64,
}

impl MarkMetrics {
    /// Merge another `MarkMetrics` into this one.
    pub fn merge(&mut self, other: &MarkMetrics) {
        self.templates += other.templates;
        self.templates_marked_duplicate += other.templates_marked_duplicate;
        self.templates_unmapped += other.templates_unmapped;
        self.reads += other.reads;
        self.reads_marked_duplicate += other.reads_marked_duplicate;
        self.secondary_reads += other.secondary_reads;
        self.supplementary_reads += other.supplementary_reads;
    }

    /// Fraction of fingerprinted templates marked duplicate.
    #[must_use]
    pub fn duplicate_rate(&self) -> f64 {
        if self.templates == 0 {
            0.0
        } else {
            self.templates_marked_duplicate as f64 / self.templates as f64
        }
    }
}

/// Writes the summary metrics file: one `key<TAB>value` pair per line,
/// covering the run counters, the filter sizing `(n, p, m, k)`, the stored
/// cardinality estimate and the implied post-fill false positive rate.
pub fn write_metrics(path: &Path, metrics: &MarkMetrics, filter: &BloomFilter) -> Result<()> {
    let mut out = std::io::BufWriter::new(
        std::fs::File::create(path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?,
    );
    write_pairs(&mut out, metrics, filter)
        .with_context(|| format!("Failed to write metrics: {}", path.display()))?;
    Ok(())
}

fn write_pairs<W: Write>(out: &mut W, metrics: &MarkMetrics, filter: &BloomFilter) -> std::io::Result<()> {
    writeln!(out, "templates\t{}", metrics.templates)?;
    writeln!(out, "templates_marked_duplicate\t{}", metrics.templates_marked_duplicate)?;
    writeln!(out, "templates_unmapped\t{}", metrics.templates_unmapped)?;
    writeln!(out, "reads\t{}", metrics.reads)?;
    writeln!(out, "reads_marked_duplicate\t{}", metrics.reads_marked_duplicate)?;
    writeln!(out, "secondary_reads\t{}", metrics.secondary_reads)?;
    writeln!(out, "supplementary_reads\t{}", metrics.supplementary_reads)?;
    writeln!(out, "n_items\t{}", filter.n())?;
    writeln!(out, "fp_rate\t{:e}", filter.p())?;
    writeln!(out, "m_bits\t{}", filter.m())?;
    writeln!(out, "k_hashes\t{}", filter.k())?;
    writeln!(out, "count_estimate\t{}", filter.count_estimate())?;
    writeln!(out, "fpr_estimate\t{:e}", filter.fpr_estimate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_merge() {
        let mut a = MarkMetrics { templates: 10, templates_marked_duplicate: 2, ..Default::default() };
        let b = MarkMetrics {
            templates: 20,
            templates_marked_duplicate: 5,
            reads: 40,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.templates, 30);
        assert_eq!(a.templates_marked_duplicate, 7);
        assert_eq!(a.reads, 40);
    }

    #[test]
    fn test_duplicate_rate() {
        let metrics =
            MarkMetrics { templates: 100, templates_marked_duplicate: 25, ..Default::default() };
        assert!((metrics.duplicate_rate() - 0.25).abs() < 1e-9);
        assert!((MarkMetrics::default().duplicate_rate()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_write_metrics_file() {
        let filter = BloomFilter::new(1000, 0.001).unwrap();
        filter.add(b"one");
        filter.add(b"two");
        let metrics = MarkMetrics {
            templates: 2,
            templates_marked_duplicate: 1,
            reads: 4,
            ..Default::default()
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.metrics");
        write_metrics(&path, &metrics, &filter).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let pairs: HashMap<&str, &str> = content
            .lines()
            .map(|l| {
                let (k, v) = l.split_once('\t').expect("key/value line");
                (k, v)
            })
            .collect();
        assert_eq!(pairs["templates"], "2");
        assert_eq!(pairs["templates_marked_duplicate"], "1");
        assert_eq!(pairs["reads"], "4");
        assert_eq!(pairs["n_items"], "1000");
        assert_eq!(pairs["fp_rate"], "1e-3");
        assert_eq!(pairs["count_estimate"], "2");
        assert!(pairs.contains_key("m_bits"));
        assert!(pairs.contains_key("k_hashes"));
        assert!(pairs.contains_key("fpr_estimate"));
    }
}
