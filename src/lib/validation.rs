//! Input validation utilities
//!
//! Common validation for command-line parameters and file paths with
//! consistent, structured error messages.

use std::path::Path;

use crate::errors::{FgmarkError, Result};

/// True when the path denotes standard input/output (`-`).
#[must_use]
pub fn is_stdio_path<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().as_os_str() == "-"
}

/// Validate that a file exists
///
/// # Errors
///
/// Returns an error if the file does not exist
///
/// # Example
/// ```
/// use fgmark_lib::validation::validate_file_exists;
///
/// let result = validate_file_exists("/nonexistent/file.sam", "input SAM");
/// assert!(result.is_err());
/// ```
pub fn validate_file_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Err(FgmarkError::InvalidFileFormat {
            file_type: description.to_string(),
            path: path_ref.display().to_string(),
            reason: "File does not exist".to_string(),
        });
    }
    Ok(())
}

/// Validate that a value is at least 1.
///
/// # Errors
///
/// Returns an [`FgmarkError::InvalidParameter`] when the value is zero.
pub fn validate_at_least_one(value: u64, parameter: &str) -> Result<()> {
    if value == 0 {
        return Err(FgmarkError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Validate a probability lies strictly between 0 and 1.
///
/// # Errors
///
/// Returns an [`FgmarkError::InvalidParameter`] otherwise.
pub fn validate_rate(value: f64, parameter: &str) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(FgmarkError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: format!("must be in (0, 1), got {value}"),
        });
    }
    Ok(())
}
