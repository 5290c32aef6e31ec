#![deny(unsafe_code)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args
)]

//! # fgmark - streaming duplicate marking library
//!
//! Core functionality for marking PCR duplicates on a qname-grouped SAM text
//! stream in a single pass, using a Bloom filter keyed by template
//! fingerprints.
//!
//! ## Overview
//!
//! - **[`bloom`]** - probabilistic set with analytic sizing and atomic,
//!   lock-free insertion
//! - **[`fingerprint`]** - canonical template keys from 5'-clip-corrected
//!   reference coordinates
//! - **[`sam`]** - minimal SAM record tokenizer and pass-through emitter
//! - **[`pipeline`]** - reader/worker/writer streaming pipeline
//! - **[`metrics`]** - run counters and the summary metrics file
//!
//! ## Utilities
//!
//! - **[`errors`]** - structured error types
//! - **[`logging`]** - formatting helpers and operation timing
//! - **[`validation`]** - parameter and file validation

pub mod bloom;
pub mod errors;
pub mod fingerprint;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod sam;
pub mod validation;
