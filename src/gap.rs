//! Gap model utilities.
//!
//! A gap model is the ordered list of gap runs that turns an ungapped
//! sequence into its aligned row. Offsets are in aligned (gapped)
//! coordinates: a run `(offset, len)` means the aligned row has `len` gap
//! characters starting at column `offset`. Runs are sorted, never overlap
//! and never have zero length. Trailing gaps are not stored; rows are padded
//! to the alignment length when rendered.

use std::fmt;

/// Gap character used in aligned rows.
pub const GAP_CHAR: u8 = b'-';

/// Returns true for bytes treated as gaps in aligned input.
pub fn is_gap(byte: u8) -> bool {
    byte == GAP_CHAR || byte == b'.'
}

/// One run of consecutive gap columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GapRun {
    /// First gap column in aligned coordinates
    pub offset: usize,
    /// Number of gap columns
    pub len: usize,
}

impl GapRun {
    pub fn new(offset: usize, len: usize) -> Self {
        GapRun { offset, len }
    }

    /// Column right after the run (exclusive end).
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

impl fmt::Display for GapRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.offset, self.len)
    }
}

impl From<(usize, usize)> for GapRun {
    fn from((offset, len): (usize, usize)) -> Self {
        GapRun { offset, len }
    }
}

/// Ordered list of gap runs applied to an ungapped sequence.
pub type GapModel = Vec<GapRun>;

/// Splits an aligned row into its ungapped bytes and gap model.
///
/// Trailing gaps are dropped from the model.
pub fn gaps_from_aligned(aligned: &[u8]) -> (Vec<u8>, GapModel) {
    let mut sequence = Vec::with_capacity(aligned.len());
    let mut gaps: GapModel = Vec::new();

    for (col, &byte) in aligned.iter().enumerate() {
        if is_gap(byte) {
            match gaps.last_mut() {
                Some(run) if run.end() == col => run.len += 1,
                _ => gaps.push(GapRun::new(col, 1)),
            }
        } else {
            sequence.push(byte);
        }
    }

    if let Some(last) = gaps.last() {
        if last.end() == aligned.len() {
            gaps.pop();
        }
    }

    (sequence, gaps)
}

/// Renders the aligned row, padded with gaps up to `length` columns.
pub fn render(sequence: &[u8], gaps: &[GapRun], length: usize) -> Vec<u8> {
    let mut row = Vec::with_capacity(length.max(row_length(sequence.len(), gaps)));
    let mut seq_pos = 0;

    for run in gaps {
        let take = run.offset.saturating_sub(row.len());
        let take = take.min(sequence.len() - seq_pos);
        row.extend_from_slice(&sequence[seq_pos..seq_pos + take]);
        seq_pos += take;
        row.extend(std::iter::repeat(GAP_CHAR).take(run.len));
    }
    row.extend_from_slice(&sequence[seq_pos..]);

    if row.len() < length {
        row.resize(length, GAP_CHAR);
    }
    row
}

/// Total number of gap columns in the model.
pub fn gaps_length(gaps: &[GapRun]) -> usize {
    gaps.iter().map(|run| run.len).sum()
}

/// Aligned length of a row without trailing padding.
pub fn row_length(ungapped_len: usize, gaps: &[GapRun]) -> usize {
    ungapped_len + gaps_length(gaps)
}

/// Updates the model for `count` gap columns inserted at column `pos`.
///
/// Insertion next to or inside an existing run extends that run; otherwise
/// a new run is created. Every run after the insertion point is shifted.
pub fn insert_gaps(gaps: &mut GapModel, pos: usize, count: usize) {
    debug_assert!(count > 0, "Invalid gap count: {count}");
    if count == 0 {
        return;
    }

    let shift_from = match gaps.iter().position(|run| pos <= run.end()) {
        Some(i) if gaps[i].offset <= pos => {
            gaps[i].len += count;
            i + 1
        }
        Some(i) => {
            gaps.insert(i, GapRun::new(pos, count));
            i + 1
        }
        None => {
            gaps.push(GapRun::new(pos, count));
            gaps.len()
        }
    };

    for run in &mut gaps[shift_from..] {
        run.offset += count;
    }
}

/// Updates the model for the column range `[pos, pos + count)` removed.
///
/// Runs inside the range disappear, runs crossing a border are clipped and
/// runs after the range are shifted left.
pub fn remove_columns(gaps: &mut GapModel, pos: usize, count: usize) {
    let region_end = pos + count;
    let mut updated = Vec::with_capacity(gaps.len());

    for run in gaps.iter() {
        let run_end = run.end();
        if run_end < pos {
            updated.push(*run);
        } else if run_end <= region_end {
            if run.offset < pos {
                updated.push(GapRun::new(run.offset, pos - run.offset));
            }
        } else if run.offset < pos {
            updated.push(GapRun::new(run.offset, run.len - count));
        } else if run.offset < region_end {
            updated.push(GapRun::new(pos, run_end - region_end));
        } else {
            updated.push(GapRun::new(run.offset - count, run.len));
        }
    }

    *gaps = updated;
}

/// Merges runs that touch each other into a single run.
pub fn merge_consecutive(gaps: &mut GapModel) {
    let mut merged: GapModel = Vec::with_capacity(gaps.len());
    for run in gaps.drain(..) {
        match merged.last_mut() {
            Some(prev) if prev.end() == run.offset => prev.len += run.len,
            Some(prev) => {
                debug_assert!(
                    prev.end() < run.offset,
                    "Incorrect gap model during merging consecutive gaps: {prev} then {run}"
                );
                merged.push(run);
            }
            None => merged.push(run),
        }
    }
    *gaps = merged;
}

/// Replacement model for a row whose model goes from `old` to `new`.
///
/// `None` means the row is unchanged and needs no write.
pub fn diff(old: &[GapRun], new: &[GapRun]) -> Option<GapModel> {
    if old == new {
        None
    } else {
        Some(new.to_vec())
    }
}
