//! Custom error types for fgmark operations.

use thiserror::Error;

/// Result type alias for fgmark operations
pub type Result<T> = std::result::Result<T, FgmarkError>;

/// Error type for fgmark operations
#[derive(Error, Debug)]
pub enum FgmarkError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// The requested memory cannot satisfy the target (n, p)
    #[error(
        "No solution for mem={mem} bytes with n={n} p={p} k<={kmax}; \
         minimum memory for these targets is {min_mem} bytes"
    )]
    NoMemorySolution {
        /// Requested memory in bytes
        mem: u64,
        /// Expected item count
        n: u64,
        /// Target false positive rate
        p: f64,
        /// Largest hash count considered
        kmax: u32,
        /// Minimum feasible memory in bytes
        min_mem: u64,
    },

    /// Malformed or out-of-contract input record
    #[error("Invalid record at line {line_number}: {reason}")]
    InvalidRecord {
        /// 1-based line number in the input stream
        line_number: u64,
        /// Explanation of the problem
        reason: String,
    },

    /// File format or existence error
    #[error("Invalid {file_type} '{path}': {reason}")]
    InvalidFileFormat {
        /// Type of file (e.g., "input SAM", "metrics output")
        file_type: String,
        /// Path to the file
        path: String,
        /// Explanation of the problem
        reason: String,
    },
}

impl FgmarkError {
    /// True for errors that should be reported as invalid usage (exit 2)
    /// rather than runtime failures (exit 1).
    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(self, FgmarkError::InvalidParameter { .. } | FgmarkError::NoMemorySolution { .. })
    }
}
