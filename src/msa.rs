//! Multiple sequence alignment value types.
//!
//! An [`Msa`] is a snapshot: an ordered list of rows, each made of ungapped
//! sequence bytes plus a gap model. The live, observable alignment lives in
//! [`crate::object::MsaObject`]; aligners and reconciliation work on
//! snapshots.

use crate::error::{ReconcileError, Result};
use crate::gap::{self, GapModel, GapRun};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

static NEXT_ROW_ID: AtomicI64 = AtomicI64::new(1);

/// Stable row identifier.
///
/// Survives reordering and gap changes; ids minted by [`RowId::next`] are
/// unique for the lifetime of the process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(pub i64);

impl RowId {
    /// Mints a fresh, never used id.
    pub fn next() -> Self {
        RowId(NEXT_ROW_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence alphabet of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alphabet {
    /// DNA/RNA including IUPAC ambiguity codes
    Nucleotide,
    /// Protein sequences
    Amino,
    /// Anything else
    #[default]
    Raw,
}

impl Alphabet {
    /// Guesses the alphabet from ungapped sequence bytes.
    pub fn detect(sequence: &[u8]) -> Self {
        const NUCLEOTIDE: &[u8] = b"ACGTUNRYSWKMBDHV";
        const AMINO: &[u8] = b"ACDEFGHIKLMNPQRSTVWYBZXJOU*";

        let upper = || sequence.iter().map(|b| b.to_ascii_uppercase());
        if upper().all(|b| NUCLEOTIDE.contains(&b)) {
            Alphabet::Nucleotide
        } else if upper().all(|b| AMINO.contains(&b)) {
            Alphabet::Amino
        } else {
            Alphabet::Raw
        }
    }

    /// Smallest alphabet able to hold sequences of both alphabets.
    pub fn common(self, other: Alphabet) -> Alphabet {
        match (self, other) {
            (a, b) if a == b => a,
            (Alphabet::Raw, _) | (_, Alphabet::Raw) => Alphabet::Raw,
            _ => Alphabet::Amino,
        }
    }
}

/// A column range of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub len: usize,
}

impl Region {
    pub fn new(start: usize, len: usize) -> Self {
        Region { start, len }
    }

    /// Exclusive end column.
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 1-based inclusive, as shown to users
        write!(f, "{}..{}", self.start + 1, self.end())
    }
}

/// One row of an alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsaRow {
    pub id: RowId,
    pub name: String,
    sequence: Vec<u8>,
    gaps: GapModel,
}

impl MsaRow {
    /// Creates a row from ungapped bytes and a gap model.
    pub fn new(id: RowId, name: impl Into<String>, sequence: Vec<u8>, gaps: GapModel) -> Self {
        MsaRow {
            id,
            name: name.into(),
            sequence,
            gaps,
        }
    }

    /// Creates a row from aligned bytes.
    pub fn from_aligned(id: RowId, name: impl Into<String>, aligned: &[u8]) -> Self {
        let (sequence, gaps) = gap::gaps_from_aligned(aligned);
        MsaRow::new(id, name, sequence, gaps)
    }

    /// Ungapped sequence bytes.
    pub fn ungapped(&self) -> &[u8] {
        &self.sequence
    }

    pub fn gap_model(&self) -> &[GapRun] {
        &self.gaps
    }

    pub fn set_gap_model(&mut self, gaps: GapModel) {
        self.gaps = gaps;
    }

    /// Aligned length without trailing padding.
    pub fn row_length(&self) -> usize {
        gap::row_length(self.sequence.len(), &self.gaps)
    }

    /// Aligned bytes padded to `length` columns.
    pub fn aligned(&self, length: usize) -> Vec<u8> {
        gap::render(&self.sequence, &self.gaps, length)
    }

    /// Exactly `len` aligned columns starting at `start`.
    pub fn aligned_window(&self, start: usize, len: usize) -> Vec<u8> {
        let mut full = self.aligned(start + len);
        full.truncate(start + len);
        full.split_off(start)
    }
}

/// A multiple sequence alignment snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Msa {
    pub name: String,
    pub alphabet: Alphabet,
    rows: Vec<MsaRow>,
}

impl Msa {
    pub fn new(name: impl Into<String>, alphabet: Alphabet) -> Self {
        Msa {
            name: name.into(),
            alphabet,
            rows: Vec::new(),
        }
    }

    /// Builds an alignment from `(name, aligned bytes)` pairs with fresh ids.
    pub fn from_aligned<N, S>(name: &str, rows: impl IntoIterator<Item = (N, S)>) -> Self
    where
        N: Into<String>,
        S: AsRef<[u8]>,
    {
        let mut msa = Msa::new(name, Alphabet::Raw);
        let mut alphabet: Option<Alphabet> = None;
        for (row_name, aligned) in rows {
            let row = MsaRow::from_aligned(RowId::next(), row_name, aligned.as_ref());
            let detected = Alphabet::detect(row.ungapped());
            alphabet = Some(alphabet.map_or(detected, |a| a.common(detected)));
            msa.rows.push(row);
        }
        msa.alphabet = alphabet.unwrap_or_default();
        msa
    }

    /// Appends a row given as aligned bytes, minting a fresh id.
    pub fn add_row(&mut self, name: impl Into<String>, aligned: &[u8]) -> RowId {
        let id = RowId::next();
        self.rows.push(MsaRow::from_aligned(id, name, aligned));
        id
    }

    /// Appends a prepared row.
    pub fn push_row(&mut self, row: MsaRow) {
        debug_assert!(
            self.row_index_by_id(row.id).is_none(),
            "Duplicate row id {} in alignment '{}'",
            row.id,
            self.name
        );
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[MsaRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [MsaRow] {
        &mut self.rows
    }

    pub fn row(&self, index: usize) -> Option<&MsaRow> {
        self.rows.get(index)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns: the longest row without padding.
    pub fn length(&self) -> usize {
        self.rows.iter().map(MsaRow::row_length).max().unwrap_or(0)
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.rows.iter().map(|r| r.id).collect()
    }

    pub fn row_names(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.name.as_str()).collect()
    }

    /// Position of the row with the given id, `None` when absent.
    pub fn row_index_by_id(&self, id: RowId) -> Option<usize> {
        self.rows.iter().position(|r| r.id == id)
    }

    /// Map from row id to its current position.
    pub fn index_map(&self) -> HashMap<RowId, usize> {
        self.rows.iter().enumerate().map(|(i, r)| (r.id, i)).collect()
    }

    /// Aligned bytes of every row, padded to the alignment length.
    pub fn aligned_rows(&self) -> Vec<Vec<u8>> {
        let length = self.length();
        self.rows.iter().map(|r| r.aligned(length)).collect()
    }

    /// Column sub-alignment keeping row ids and names.
    pub fn mid(&self, region: Region) -> Result<Msa> {
        let length = self.length();
        if region.len == 0 || region.end() > length {
            return Err(ReconcileError::InvalidRegion(format!(
                "{region} is outside of alignment with {length} columns"
            )));
        }
        let rows = self
            .rows
            .iter()
            .map(|r| MsaRow::from_aligned(r.id, r.name.clone(), &r.aligned_window(region.start, region.len)))
            .collect();
        Ok(Msa {
            name: self.name.clone(),
            alphabet: self.alphabet,
            rows,
        })
    }

    /// Appends `other` column-wise: row `i` of `other` continues row `i`.
    pub fn append_columns(&mut self, other: &Msa) -> Result<()> {
        if other.row_count() != self.row_count() {
            return Err(ReconcileError::UnexpectedRowCount {
                expected: self.row_count(),
                actual: other.row_count(),
            });
        }
        let length = self.length();
        let other_length = other.length();
        for (row, tail) in self.rows.iter_mut().zip(other.rows.iter()) {
            let mut aligned = row.aligned(length);
            aligned.extend(tail.aligned(other_length));
            let (sequence, gaps) = gap::gaps_from_aligned(&aligned);
            row.sequence = sequence;
            row.gaps = gaps;
        }
        Ok(())
    }

    /// Reorders rows to follow `order`, which must be a permutation of the ids.
    pub fn reorder(&mut self, order: &[RowId]) -> Result<()> {
        if order.len() != self.rows.len() {
            return Err(ReconcileError::InvalidRowOrder(format!(
                "{} ids given for {} rows",
                order.len(),
                self.rows.len()
            )));
        }
        let mut slots: Vec<Option<MsaRow>> = self.rows.drain(..).map(Some).collect();
        let index = slots
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (r.id, i)))
            .collect::<HashMap<_, _>>();

        let mut reordered = Vec::with_capacity(order.len());
        for id in order {
            match index.get(id).and_then(|&i| slots[i].take()) {
                Some(row) => reordered.push(row),
                None => {
                    // Restore what was taken before failing
                    let mut restored: Vec<MsaRow> = reordered;
                    restored.extend(slots.into_iter().flatten());
                    restored.sort_by_key(|r| index[&r.id]);
                    self.rows = restored;
                    return Err(ReconcileError::InvalidRowOrder(format!(
                        "row {id} is missing or repeated"
                    )));
                }
            }
        }
        self.rows = reordered;
        Ok(())
    }

    /// Removes the row with the given id.
    pub fn remove_row(&mut self, id: RowId) -> Result<MsaRow> {
        let index = self
            .row_index_by_id(id)
            .ok_or(ReconcileError::RowNotFound(id.0))?;
        Ok(self.rows.remove(index))
    }
}

impl fmt::Display for Msa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let length = self.length();
        for row in &self.rows {
            let aligned = row.aligned(length);
            writeln!(f, "{}\t{}", row.name, String::from_utf8_lossy(&aligned))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Msa {
        Msa::from_aligned("sample", [("a", "AC-GT"), ("b", "-ACGT"), ("c", "ACG")])
    }

    #[test]
    fn test_length_is_longest_row() {
        let msa = sample();
        assert_eq!(msa.length(), 5);
        assert_eq!(msa.row(2).unwrap().aligned(msa.length()), b"ACG--".to_vec());
        assert_eq!(msa.alphabet, Alphabet::Nucleotide);
    }

    #[test]
    fn test_row_lookup_by_id() {
        let msa = sample();
        let ids = msa.row_ids();
        assert_eq!(msa.row_index_by_id(ids[1]), Some(1));
        assert_eq!(msa.row_index_by_id(RowId(-1)), None);
    }

    #[test]
    fn test_mid_keeps_ids() {
        let msa = sample();
        let sub = msa.mid(Region::new(1, 3)).unwrap();
        assert_eq!(sub.row_ids(), msa.row_ids());
        assert_eq!(
            sub.aligned_rows(),
            vec![b"C-G".to_vec(), b"ACG".to_vec(), b"CG-".to_vec()]
        );
        assert!(msa.mid(Region::new(3, 5)).is_err());
        assert!(msa.mid(Region::new(0, 0)).is_err());
    }

    #[test]
    fn test_append_columns() {
        let mut left = Msa::from_aligned("l", [("a", "A-"), ("b", "AC")]);
        let right = Msa::from_aligned("r", [("a", "-G"), ("b", "TT")]);
        left.append_columns(&right).unwrap();
        assert_eq!(left.aligned_rows(), vec![b"A--G".to_vec(), b"ACTT".to_vec()]);

        let short = Msa::from_aligned("s", [("a", "A")]);
        assert!(left.append_columns(&short).is_err());
    }

    #[test]
    fn test_reorder() {
        let mut msa = sample();
        let ids = msa.row_ids();
        msa.reorder(&[ids[2], ids[0], ids[1]]).unwrap();
        assert_eq!(msa.row_names(), vec!["c", "a", "b"]);

        let before = msa.clone();
        assert!(msa.reorder(&[ids[0], ids[0], ids[1]]).is_err());
        assert_eq!(msa, before);
        assert!(msa.reorder(&[ids[0]]).is_err());
    }

    #[test]
    fn test_alphabet_common() {
        assert_eq!(Alphabet::detect(b"ACGT"), Alphabet::Nucleotide);
        assert_eq!(Alphabet::detect(b"MKLV"), Alphabet::Amino);
        assert_eq!(Alphabet::detect(b"AC1"), Alphabet::Raw);
        assert_eq!(Alphabet::Nucleotide.common(Alphabet::Amino), Alphabet::Amino);
        assert_eq!(Alphabet::Raw.common(Alphabet::Amino), Alphabet::Raw);
    }
}
