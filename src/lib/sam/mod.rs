//! Minimal SAM text record handling.
//!
//! The duplicate-marking contract is pass-through: every output byte equals
//! the input byte except the flag field of marked records. So instead of a
//! full alignment model, a record here keeps its original line and the byte
//! spans of the few fields the pipeline inspects (qname, flag, rname, pos,
//! cigar). Emission splices a new flag into the original bytes only when the
//! record was actually marked.

use anyhow::{Result, bail};
use std::io::Write;

/// SAM flag bits.
pub mod flags {
    /// Template has multiple segments (paired).
    pub const PAIRED: u16 = 0x1;
    /// Each segment properly aligned.
    pub const PROPER_PAIR: u16 = 0x2;
    /// Segment unmapped.
    pub const UNMAPPED: u16 = 0x4;
    /// Next segment in the template unmapped.
    pub const MATE_UNMAPPED: u16 = 0x8;
    /// Sequence reverse complemented.
    pub const REVERSE: u16 = 0x10;
    /// Next segment reverse complemented.
    pub const MATE_REVERSE: u16 = 0x20;
    /// First segment in the template.
    pub const FIRST_SEGMENT: u16 = 0x40;
    /// Last segment in the template.
    pub const LAST_SEGMENT: u16 = 0x80;
    /// Secondary alignment.
    pub const SECONDARY: u16 = 0x100;
    /// Not passing filters.
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate.
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment.
    pub const SUPPLEMENTARY: u16 = 0x800;
}

/// One parsed alignment line.
///
/// Owns the original line bytes (without the trailing newline). The flag is
/// the only mutable field; everything else is read-only spans into the line.
#[derive(Debug, Clone)]
pub struct SamRecord {
    line: Vec<u8>,
    name_end: usize,
    flag_span: (usize, usize),
    rname_span: (usize, usize),
    cigar_span: (usize, usize),
    pos: i64,
    flags: u16,
    original_flags: u16,
}

impl SamRecord {
    /// Parses one record line (no trailing newline).
    ///
    /// # Errors
    ///
    /// Fails when fewer than 11 mandatory fields are present or the flag or
    /// position field is not numeric.
    pub fn parse(line: Vec<u8>) -> Result<Self> {
        let mut spans: Vec<(usize, usize)> = Vec::with_capacity(11);
        let mut start = 0;
        for (i, &b) in line.iter().enumerate() {
            if b == b'\t' {
                spans.push((start, i));
                start = i + 1;
                if spans.len() == 11 {
                    break;
                }
            }
        }
        if spans.len() < 11 {
            // The final mandatory field may be terminated by end of line.
            spans.push((start, line.len()));
        }
        if spans.len() < 11 {
            bail!("expected at least 11 fields, found {}", spans.len());
        }

        let flags = parse_int::<u16>(&line[spans[1].0..spans[1].1], "flag")?;
        let pos = parse_int::<i64>(&line[spans[3].0..spans[3].1], "position")?;
        if pos < 0 {
            bail!("position must be non-negative, got {pos}");
        }
        if spans[0].1 == 0 {
            bail!("empty query name");
        }

        Ok(Self {
            name_end: spans[0].1,
            flag_span: spans[1],
            rname_span: spans[2],
            cigar_span: spans[5],
            pos,
            flags,
            original_flags: flags,
            line,
        })
    }

    /// Query name bytes.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.line[..self.name_end]
    }

    /// Current flag value, including any duplicate marking applied.
    #[must_use]
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Reference name bytes (`*` when unavailable).
    #[must_use]
    pub fn rname(&self) -> &[u8] {
        &self.line[self.rname_span.0..self.rname_span.1]
    }

    /// 1-based leftmost mapped position; 0 when unavailable.
    #[must_use]
    pub fn pos(&self) -> i64 {
        self.pos
    }

    /// Raw cigar bytes (`*` when unavailable).
    #[must_use]
    pub fn cigar(&self) -> &[u8] {
        &self.line[self.cigar_span.0..self.cigar_span.1]
    }

    /// Sets the duplicate bit (0x400).
    pub fn set_duplicate(&mut self) {
        self.flags |= flags::DUPLICATE;
    }

    /// Writes the record plus newline. Unmarked records are emitted
    /// byte-identical to the input; marked records differ only in the flag
    /// field.
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        if self.flags == self.original_flags {
            out.write_all(&self.line)?;
        } else {
            out.write_all(&self.line[..self.flag_span.0])?;
            write!(out, "{}", self.flags)?;
            out.write_all(&self.line[self.flag_span.1..])?;
        }
        out.write_all(b"\n")
    }

    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.flags & flags::PAIRED != 0
    }

    #[must_use]
    pub fn is_unmapped(&self) -> bool {
        self.flags & flags::UNMAPPED != 0
    }

    #[must_use]
    pub fn is_mate_unmapped(&self) -> bool {
        self.flags & flags::MATE_UNMAPPED != 0
    }

    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.flags & flags::REVERSE != 0
    }

    #[must_use]
    pub fn is_first_segment(&self) -> bool {
        self.flags & flags::FIRST_SEGMENT != 0
    }

    #[must_use]
    pub fn is_last_segment(&self) -> bool {
        self.flags & flags::LAST_SEGMENT != 0
    }

    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.flags & flags::SECONDARY != 0
    }

    #[must_use]
    pub fn is_supplementary(&self) -> bool {
        self.flags & flags::SUPPLEMENTARY != 0
    }

    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.flags & flags::DUPLICATE != 0
    }
}

fn parse_int<T: std::str::FromStr>(bytes: &[u8], what: &str) -> Result<T> {
    let s = std::str::from_utf8(bytes).map_err(|_| anyhow::anyhow!("non-ASCII {what} field"))?;
    s.parse::<T>().map_err(|_| anyhow::anyhow!("non-numeric {what} field: '{s}'"))
}

/// The cigar properties needed for 5'-clip-corrected coordinates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CigarSummary {
    /// Length of the first operation when it is a soft clip, else 0.
    pub leading_soft_clip: i64,
    /// Length of the last operation when it is a soft clip, else 0.
    pub trailing_soft_clip: i64,
    /// Total length of reference-consuming operations (M, D, N, =, X).
    pub reference_length: i64,
}

/// Scans a cigar string once. `*` yields the zero summary.
///
/// # Errors
///
/// Fails on operation characters outside `MIDNSHP=X` or lengths without an
/// operation.
pub fn summarize_cigar(cigar: &[u8]) -> Result<CigarSummary> {
    if cigar == b"*" {
        return Ok(CigarSummary::default());
    }
    let mut summary = CigarSummary::default();
    let mut len: i64 = 0;
    let mut have_len = false;
    let mut first = true;
    let mut last_op = (b'?', 0i64);
    for &b in cigar {
        if b.is_ascii_digit() {
            len = len * 10 + i64::from(b - b'0');
            have_len = true;
        } else {
            if !have_len {
                bail!("cigar operation '{}' without a length", b as char);
            }
            match b {
                b'M' | b'D' | b'N' | b'=' | b'X' => summary.reference_length += len,
                b'I' | b'S' | b'H' | b'P' => {}
                other => bail!("invalid cigar operation '{}'", other as char),
            }
            if first && b == b'S' {
                summary.leading_soft_clip = len;
            }
            first = false;
            last_op = (b, len);
            len = 0;
            have_len = false;
        }
    }
    if have_len {
        bail!("cigar ends in a length with no operation");
    }
    if last_op.0 == b'S' {
        summary.trailing_soft_clip = last_op.1;
    }
    Ok(summary)
}
