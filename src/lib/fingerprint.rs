//! Canonical template fingerprints.
//!
//! A template's fingerprint is derived from the 5'-soft-clip-corrected
//! reference coordinates and strands of its primary alignments, so that PCR
//! copies that differ only in soft-clipped bases (or in read1/read2 emission
//! order) collide on the same key. Secondary and supplementary alignments
//! never contribute to the key; they inherit the primary's duplicate
//! decision downstream.

use anyhow::{Result, bail};
use bstr::BString;

use crate::sam::{SamRecord, summarize_cigar};

// Leading tag byte per template shape, so a single-end template, a fully
// mapped pair and a half-mapped pair can never collide in key space.
const TAG_SINGLE: u8 = 0x01;
const TAG_PAIR: u8 = 0x02;
const TAG_HALF_MAPPED: u8 = 0x03;

/// One 5'-clip-corrected fragment end: reference name, unclipped coordinate
/// and strand. The derived ordering (name, then coordinate, then forward
/// before reverse) is the canonical pair order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadEnd {
    /// Reference sequence name.
    pub rname: BString,
    /// Unclipped 5' reference coordinate (1-based; may go below 1 when the
    /// clip extends past the start of the reference).
    pub pos: i64,
    /// True for the reverse strand.
    pub reverse: bool,
}

impl ReadEnd {
    /// Computes the unclipped 5' end of a mapped record.
    ///
    /// Forward strand: `pos - leading_soft_clip`. Reverse strand:
    /// `pos + reference_length + trailing_soft_clip - 1`, the unclipped
    /// position of the rightmost (5') base.
    pub fn of(record: &SamRecord) -> Result<Self> {
        let cigar = summarize_cigar(record.cigar())?;
        let pos = if record.is_reverse() {
            record.pos() + cigar.reference_length + cigar.trailing_soft_clip - 1
        } else {
            record.pos() - cigar.leading_soft_clip
        };
        Ok(Self { rname: BString::from(record.rname()), pos, reverse: record.is_reverse() })
    }

    fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.rname);
        buf.push(0);
        buf.extend_from_slice(&self.pos.to_le_bytes());
        buf.push(if self.reverse { b'R' } else { b'F' });
    }
}

/// Derives the canonical fingerprint for one qname group, or `None` when the
/// template has no mapped primary alignment and is not eligible for
/// duplicate marking.
///
/// # Errors
///
/// Fails on an unparseable cigar or when the group carries more than one
/// primary alignment in the same read slot, which is what a split or
/// unordered qname group looks like.
pub fn template_fingerprint(group: &[SamRecord]) -> Result<Option<Vec<u8>>> {
    let mut r1: Option<&SamRecord> = None;
    let mut r2: Option<&SamRecord> = None;
    for record in group {
        if record.is_secondary() || record.is_supplementary() {
            continue;
        }
        let slot = if !record.is_paired() || record.is_first_segment() { &mut r1 } else { &mut r2 };
        if slot.is_some() {
            bail!(
                "multiple primary alignments for the same read of '{}'; \
                 input must be qname-grouped",
                String::from_utf8_lossy(record.name())
            );
        }
        *slot = Some(record);
    }

    let mapped: Vec<&SamRecord> =
        [r1, r2].into_iter().flatten().filter(|r| !r.is_unmapped()).collect();

    match mapped[..] {
        [] => Ok(None),
        [single] => {
            let mate_known_unmapped = (r1.is_some() && r2.is_some())
                || (single.is_paired() && single.is_mate_unmapped());
            let tag = if mate_known_unmapped { TAG_HALF_MAPPED } else { TAG_SINGLE };
            let end = ReadEnd::of(single)?;
            let mut buf = Vec::with_capacity(32);
            buf.push(tag);
            end.serialize_into(&mut buf);
            Ok(Some(buf))
        }
        [a, b] => {
            let mut lo = ReadEnd::of(a)?;
            let mut hi = ReadEnd::of(b)?;
            if hi < lo {
                std::mem::swap(&mut lo, &mut hi);
            }
            let mut buf = Vec::with_capacity(64);
            buf.push(TAG_PAIR);
            lo.serialize_into(&mut buf);
            hi.serialize_into(&mut buf);
            Ok(Some(buf))
        }
        _ => unreachable!("at most two primary alignments"),
    }
}
