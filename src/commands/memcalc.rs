//! Bloom filter memory diagnostic.

use anyhow::Result;
use bytesize::ByteSize;
use clap::Parser;
use log::info;

use fgmark_lib::bloom::BloomFilter;
use fgmark_lib::validation::validate_rate;

use crate::commands::command::Command;

/// Bloom filter memory diagnostic.
#[derive(Debug, Parser)]
#[command(
    name = "memcalc",
    about = "Print Bloom filter memory requirements and hash count",
    long_about = r#"
Prints the Bloom filter memory and number of hash functions k for N_ITEMS
stored at target false positive rate FP_RATE.

Compare the values of mem and k:
  fgmark memcalc 1000000000 1e-6       # calculate minimum mem required
  fgmark memcalc 1000000000 1e-6 4GiB  # specify 4GiB

k is very sensitive to mem near the minimum: allowing roughly 1.25x the
minimum mem about halves k, and fewer hash evaluations per record means
better throughput.
"#
)]
pub struct MemCalc {
    /// Number of items to store
    #[arg(value_name = "N_ITEMS")]
    pub n_items: f64,

    /// Target false positive rate when n items are stored
    #[arg(value_name = "FP_RATE")]
    pub fp_rate: f64,

    /// Memory to allow for the filter, e.g. "4GiB"; the memory-optimal
    /// (minimum) value is calculated when omitted
    #[arg(value_name = "MEM")]
    pub mem: Option<ByteSize>,
}

impl Command for MemCalc {
    fn execute(&self) -> Result<()> {
        if !self.n_items.is_finite() || self.n_items < 1.0 {
            return Err(fgmark_lib::errors::FgmarkError::InvalidParameter {
                parameter: "N_ITEMS".to_string(),
                reason: format!("must be at least 1, got {}", self.n_items),
            }
            .into());
        }
        validate_rate(self.fp_rate, "FP_RATE")?;
        let n = self.n_items as u64;

        let (m, k) = match &self.mem {
            Some(mem) => BloomFilter::m_k_mem(n, self.fp_rate, mem.as_u64())?,
            None => BloomFilter::m_k_min(n, self.fp_rate),
        };
        let bytes = m.div_ceil(8);

        info!("n={}; p={:e}", n, self.fp_rate);
        println!("mem={} ({bytes} bytes); k={k}", ByteSize(bytes));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgmark_lib::errors::FgmarkError;

    #[test]
    fn test_minimum_memory_runs() {
        let cmd = MemCalc { n_items: 1e6, fp_rate: 1e-6, mem: None };
        assert!(cmd.execute().is_ok());
    }

    #[test]
    fn test_infeasible_memory_is_usage_error() {
        let cmd = MemCalc { n_items: 1e9, fp_rate: 1e-6, mem: Some(ByteSize(1024)) };
        let err = cmd.execute().unwrap_err();
        let err = err.downcast_ref::<FgmarkError>().expect("structured error");
        assert!(matches!(err, FgmarkError::NoMemorySolution { .. }));
        assert!(err.is_usage());
    }

    #[test]
    fn test_bad_rate_rejected() {
        let cmd = MemCalc { n_items: 1e6, fp_rate: 0.0, mem: None };
        assert!(cmd.execute().is_err());
    }
}
