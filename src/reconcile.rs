//! Reconciliation of aligner results with the live alignment.
//!
//! An external aligner works on a detached copy of the alignment and may
//! reorder rows, move gaps and, for profile operations, add rows. The
//! functions here translate its output into changes keyed by stable row
//! ids, and apply them to the live object in a single modification step.

use crate::error::{ReconcileError, Result};
use crate::gap::{self, GapModel, GAP_CHAR};
use crate::msa::{Msa, MsaRow, RowId};
use crate::object::{MsaAccess, UserModStep};
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};

/// Replacement gap models keyed by stable row id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapModelDiff(BTreeMap<RowId, GapModel>);

impl GapModelDiff {
    pub fn new() -> Self {
        GapModelDiff::default()
    }

    pub fn insert(&mut self, id: RowId, model: GapModel) {
        self.0.insert(id, model);
    }

    pub fn get(&self, id: RowId) -> Option<&GapModel> {
        self.0.get(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowId, &GapModel)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<RowId, GapModel> {
        &self.0
    }

    /// Rows whose staged model differs from the live one.
    pub fn changed_rows<A: MsaAccess + ?Sized>(&self, live: &A) -> Vec<RowId> {
        self.0
            .iter()
            .filter(|(id, model)| {
                live.gap_model(**id)
                    .map_or(true, |current| gap::diff(current, model).is_some())
            })
            .map(|(id, _)| *id)
            .collect()
    }
}

impl FromIterator<(RowId, GapModel)> for GapModelDiff {
    fn from_iter<T: IntoIterator<Item = (RowId, GapModel)>>(iter: T) -> Self {
        GapModelDiff(iter.into_iter().collect())
    }
}

/// New row order as a sequence of stable ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOrderDiff(Vec<RowId>);

impl RowOrderDiff {
    pub fn new(order: Vec<RowId>) -> Self {
        RowOrderDiff(order)
    }

    pub fn ids(&self) -> &[RowId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn same_residues(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn same_column_char(a: u8, b: u8) -> bool {
    (gap::is_gap(a) && gap::is_gap(b)) || a.eq_ignore_ascii_case(&b)
}

/// Maps aligner output rows back to input rows.
///
/// Returns one input index per result row, followed by the indices of
/// input rows the result lacks (non-stable mode only).
pub fn row_correspondence(
    input: &Msa,
    result: &Msa,
    output_ids: &[usize],
    stable: bool,
) -> Result<Vec<usize>> {
    let n = input.row_count();
    let m = result.row_count();

    if stable {
        if m != n {
            return Err(ReconcileError::UnexpectedRowCount {
                expected: n,
                actual: m,
            });
        }
        for (i, (in_row, out_row)) in input.rows().iter().zip(result.rows()).enumerate() {
            if !same_residues(in_row.ungapped(), out_row.ungapped()) {
                return Err(ReconcileError::AlignerFailed(format!(
                    "row {} ('{}') changed its residues in stable mode",
                    i, in_row.name
                )));
            }
        }
        return Ok((0..n).collect());
    }

    if m > n {
        return Err(ReconcileError::UnexpectedRowCount {
            expected: n,
            actual: m,
        });
    }

    let mut used = vec![false; n];
    let mut mapping = Vec::with_capacity(m);
    for (pos, out_row) in result.rows().iter().enumerate() {
        let candidate = output_ids.get(pos).copied().unwrap_or(pos);
        let matches = |i: usize| {
            i < n && !used[i] && same_residues(input.rows()[i].ungapped(), out_row.ungapped())
        };
        let index = if matches(candidate) {
            Some(candidate)
        } else {
            (0..n).find(|&i| matches(i))
        };
        match index {
            Some(i) => {
                used[i] = true;
                mapping.push(i);
            }
            None => {
                return Err(ReconcileError::AlignerFailed(format!(
                    "result row '{}' does not match any input row",
                    out_row.name
                )))
            }
        }
    }

    // Rows the aligner dropped go last and lose their gaps
    for (i, _) in used.iter().enumerate().filter(|(_, used)| !**used) {
        debug!("Input row {i} missing from aligner output");
        mapping.push(i);
    }
    Ok(mapping)
}

/// Turns an align/refine result into gap and order changes.
///
/// In stable mode rows correspond by position. Otherwise `output_ids[i]` is
/// the input index of result row `i` (falling back to `i`, then to the
/// first unused input row with the same residues), and input rows missing
/// from the result are appended at the end with an empty gap model. The order diff
/// is `None` when the id order is unchanged.
pub fn reconcile_align_result(
    input: &Msa,
    result: &Msa,
    output_ids: &[usize],
    stable: bool,
) -> Result<(GapModelDiff, Option<RowOrderDiff>)> {
    if result.is_empty() && !input.is_empty() {
        return Err(ReconcileError::EmptyResult);
    }

    let mapping = row_correspondence(input, result, output_ids, stable)?;
    if mapping.len() != input.row_count() {
        return Err(ReconcileError::UnexpectedRowCount {
            expected: input.row_count(),
            actual: mapping.len(),
        });
    }

    let mut gaps = GapModelDiff::new();
    let mut order = Vec::with_capacity(mapping.len());
    for (pos, &input_index) in mapping.iter().enumerate() {
        let id = input.rows()[input_index].id;
        let model = result
            .row(pos)
            .map(|row| row.gap_model().to_vec())
            .unwrap_or_default();
        gaps.insert(id, model);
        order.push(id);
    }

    let order_diff = if order == input.row_ids() {
        None
    } else {
        Some(RowOrderDiff::new(order))
    };
    debug!(
        "Reconciled {} rows of '{}', reordered: {}",
        gaps.len(),
        input.name,
        order_diff.is_some()
    );
    Ok((gaps, order_diff))
}

/// Builds the alignment to install after adding a profile.
///
/// The aligner output must hold the input rows followed by the profile
/// rows, in that order and with unchanged residues. Input rows keep their
/// ids and names; profile rows keep theirs unless an id is already taken,
/// in which case a fresh one is minted.
pub fn reconcile_profile_merge(input: &Msa, profile: &Msa, result: &Msa) -> Result<Msa> {
    let expected = input.row_count() + profile.row_count();
    if result.row_count() != expected {
        return Err(ReconcileError::ProfileMergeFailed {
            expected,
            actual: result.row_count(),
        });
    }

    let length = result.length();
    let mut merged = Msa::new(input.name.clone(), input.alphabet.common(profile.alphabet));
    let mut taken: HashSet<RowId> = HashSet::with_capacity(expected);

    let sources = input.rows().iter().chain(profile.rows());
    for (i, (source, out_row)) in sources.zip(result.rows()).enumerate() {
        if !same_residues(source.ungapped(), out_row.ungapped()) {
            return Err(ReconcileError::AlignerFailed(format!(
                "result row {} does not hold the residues of '{}'",
                i, source.name
            )));
        }
        let id = if taken.contains(&source.id) {
            RowId::next()
        } else {
            source.id
        };
        taken.insert(id);
        merged.push_row(MsaRow::from_aligned(
            id,
            source.name.clone(),
            &out_row.aligned(length),
        ));
    }
    Ok(merged)
}

/// Where the columns of a one-row profile result came from.
struct ColumnMap {
    /// Result column of every master column, `None` if the aligner dropped it
    matched: Vec<Option<usize>>,
    /// Result columns inserted before master column `j` (index `L` = after)
    inserted: Vec<Vec<usize>>,
}

fn map_columns(master: &[Vec<u8>], length: usize, result: &[Vec<u8>]) -> Result<ColumnMap> {
    let n = master.len();
    let result_len = result.first().map_or(0, Vec::len);
    let master_gap = |j: usize| master.iter().all(|row| gap::is_gap(row[j]));

    let mut map = ColumnMap {
        matched: vec![None; length],
        inserted: vec![Vec::new(); length + 1],
    };
    let mut ptr = 0;
    for c in 0..result_len {
        loop {
            if ptr < length && (0..n).all(|r| same_column_char(result[r][c], master[r][ptr])) {
                map.matched[ptr] = Some(c);
                ptr += 1;
                break;
            }
            if (0..n).all(|r| gap::is_gap(result[r][c])) {
                map.inserted[ptr].push(c);
                break;
            }
            if ptr < length && master_gap(ptr) {
                // Aligner dropped an all-gap master column
                ptr += 1;
                continue;
            }
            return Err(ReconcileError::AlignerFailed(format!(
                "profile result changed master column {}",
                ptr + 1
            )));
        }
    }
    while ptr < length {
        if !master_gap(ptr) {
            return Err(ReconcileError::AlignerFailed(format!(
                "profile result lost master column {}",
                ptr + 1
            )));
        }
        ptr += 1;
    }
    Ok(map)
}

/// Merges per-row profile results into one alignment.
///
/// `per_row[k]` is the aligner output for `profile` row `k` aligned against
/// `master`: the master rows (possibly with extra gap columns) followed by
/// that one row. Master columns stay shared; columns an aligner inserted
/// for one row get their own slots, gapped in every other row.
pub fn merge_profile_rows(master: &Msa, profile: &Msa, per_row: &[Msa]) -> Result<Msa> {
    let n = master.row_count();
    if per_row.len() != profile.row_count() {
        return Err(ReconcileError::ProfileMergeFailed {
            expected: profile.row_count(),
            actual: per_row.len(),
        });
    }

    let length = master.length();
    let master_rows = master.aligned_rows();
    let mut maps = Vec::with_capacity(per_row.len());
    let mut aligned_results = Vec::with_capacity(per_row.len());
    for result in per_row {
        if result.row_count() != n + 1 {
            return Err(ReconcileError::ProfileMergeFailed {
                expected: n + 1,
                actual: result.row_count(),
            });
        }
        let aligned = result.aligned_rows();
        maps.push(map_columns(&master_rows, length, &aligned[..n])?);
        aligned_results.push(aligned);
    }

    let mut merged = Msa::new(master.name.clone(), master.alphabet.common(profile.alphabet));
    for (row, aligned) in master.rows().iter().zip(&master_rows) {
        let mut out = Vec::new();
        for j in 0..=length {
            for map in &maps {
                out.extend(std::iter::repeat(GAP_CHAR).take(map.inserted[j].len()));
            }
            if j < length {
                out.push(aligned[j]);
            }
        }
        merged.push_row(MsaRow::from_aligned(row.id, row.name.clone(), &out));
    }

    for (k, (source, aligned)) in profile.rows().iter().zip(&aligned_results).enumerate() {
        let new_row = &aligned[n];
        let mut out = Vec::new();
        for j in 0..=length {
            for (other, map) in maps.iter().enumerate() {
                if other == k {
                    out.extend(map.inserted[j].iter().map(|&c| new_row[c]));
                } else {
                    out.extend(std::iter::repeat(GAP_CHAR).take(map.inserted[j].len()));
                }
            }
            if j < length {
                out.push(maps[k].matched[j].map_or(GAP_CHAR, |c| new_row[c]));
            }
        }
        let row = MsaRow::from_aligned(source.id, source.name.clone(), &out);
        if !same_residues(row.ungapped(), source.ungapped()) {
            return Err(ReconcileError::AlignerFailed(format!(
                "profile row '{}' changed its residues",
                source.name
            )));
        }
        merged.push_row(row);
    }
    Ok(merged)
}

/// Applies staged gap and order changes as one modification step.
///
/// Everything is validated before the first write; a locked object or an
/// invalid diff leaves the alignment untouched.
pub fn apply_diff<A: MsaAccess + ?Sized>(
    live: &mut A,
    gaps: &GapModelDiff,
    order: Option<&RowOrderDiff>,
) -> Result<()> {
    if live.is_state_locked() {
        return Err(ReconcileError::ObjectIsStateLocked);
    }
    if let Some(id) = gaps.iter().map(|(id, _)| *id).find(|id| live.row_index_by_id(*id).is_none()) {
        return Err(ReconcileError::RowNotFound(id.0));
    }
    if let Some(order) = order {
        let current: HashSet<RowId> = live.row_ids().into_iter().collect();
        let proposed: HashSet<RowId> = order.ids().iter().copied().collect();
        if order.len() != current.len() || proposed != current {
            return Err(ReconcileError::InvalidRowOrder(format!(
                "{} ids do not match the {} rows of the alignment",
                order.len(),
                current.len()
            )));
        }
    }

    let mut step = UserModStep::begin(live)?;
    step.set_gap_models(gaps.as_map())?;
    if let Some(order) = order {
        step.set_row_order(order.ids())?;
    }
    info!(
        "Applied alignment result: {} gap models, reordered: {}",
        gaps.len(),
        order.is_some()
    );
    Ok(())
}

/// Installs a merged alignment as one modification step.
pub fn apply_merge<A: MsaAccess + ?Sized>(live: &mut A, merged: Msa) -> Result<()> {
    if live.is_state_locked() {
        return Err(ReconcileError::ObjectIsStateLocked);
    }
    let rows = merged.row_count();
    let mut step = UserModStep::begin(live)?;
    step.set_alignment(merged)?;
    info!("Applied merged alignment with {rows} rows");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::GapRun;

    #[test]
    fn test_non_stable_mapping_uses_output_ids() {
        let input = Msa::from_aligned("in", [("a", "AAC"), ("b", "GT")]);
        let result = Msa::from_aligned("out", [("x", "-GT"), ("y", "AAC")]);
        let (gaps, order) = reconcile_align_result(&input, &result, &[1, 0], false).unwrap();
        let ids = input.row_ids();
        assert_eq!(gaps.get(ids[1]), Some(&vec![GapRun::new(0, 1)]));
        assert_eq!(gaps.get(ids[0]), Some(&Vec::new()));
        assert_eq!(order.unwrap().ids(), &[ids[1], ids[0]]);
    }

    #[test]
    fn test_non_stable_falls_back_to_content() {
        let input = Msa::from_aligned("in", [("a", "AAC"), ("b", "GT")]);
        let result = Msa::from_aligned("out", [("x", "G-T"), ("y", "AAC")]);
        let (_, order) = reconcile_align_result(&input, &result, &[], false).unwrap();
        let ids = input.row_ids();
        assert_eq!(order.unwrap().ids(), &[ids[1], ids[0]]);
    }

    #[test]
    fn test_missing_rows_restored_as_gap_rows() {
        let input = Msa::from_aligned("in", [("a", "A-C"), ("b", "GT"), ("c", "TTT")]);
        let result = Msa::from_aligned("out", [("c", "TTT"), ("a", "AC-")]);
        let (gaps, order) = reconcile_align_result(&input, &result, &[2, 0], false).unwrap();
        let ids = input.row_ids();
        assert_eq!(gaps.len(), 3);
        assert_eq!(gaps.get(ids[1]), Some(&Vec::new()));
        assert_eq!(order.unwrap().ids(), &[ids[2], ids[0], ids[1]]);
    }

    #[test]
    fn test_result_with_foreign_row_is_rejected() {
        let input = Msa::from_aligned("in", [("a", "AC")]);
        let result = Msa::from_aligned("out", [("a", "GG")]);
        assert!(matches!(
            reconcile_align_result(&input, &result, &[], false),
            Err(ReconcileError::AlignerFailed(_))
        ));
    }

    #[test]
    fn test_profile_merge_keeps_ids() {
        let input = Msa::from_aligned("in", [("a", "AC"), ("b", "AG")]);
        let profile = Msa::from_aligned("p", [("p1", "ACG")]);
        let result = Msa::from_aligned("out", [("1", "A-C"), ("2", "A-G"), ("3", "ACG")]);
        let merged = reconcile_profile_merge(&input, &profile, &result).unwrap();
        let mut expected_ids = input.row_ids();
        expected_ids.extend(profile.row_ids());
        assert_eq!(merged.row_ids(), expected_ids);
        assert_eq!(merged.row_names(), vec!["a", "b", "p1"]);
        assert_eq!(merged.rows()[0].gap_model(), &[GapRun::new(1, 1)]);
    }

    #[test]
    fn test_profile_merge_row_count() {
        let input = Msa::from_aligned("in", [("a", "AC")]);
        let profile = Msa::from_aligned("p", [("p1", "ACG")]);
        let result = Msa::from_aligned("out", [("1", "AC")]);
        let err = reconcile_profile_merge(&input, &profile, &result).unwrap_err();
        assert_eq!(err.to_string(), "Failed to apply the result of Muscle");
    }

    #[test]
    fn test_profile_merge_rejects_reordered_result() {
        let input = Msa::from_aligned("in", [("a", "AAAA"), ("b", "CCCC")]);
        let profile = Msa::from_aligned("p", [("p1", "GGGG")]);
        let result = Msa::from_aligned("out", [("p1", "GGGG"), ("a", "AAAA"), ("b", "CCCC")]);
        assert!(matches!(
            reconcile_profile_merge(&input, &profile, &result),
            Err(ReconcileError::AlignerFailed(_))
        ));
    }

    #[test]
    fn test_merge_profile_rows_gives_insertions_own_columns() {
        let master = Msa::from_aligned("m", [("m1", "AC"), ("m2", "AG")]);
        let profile = Msa::from_aligned("p", [("p1", "ATC"), ("p2", "AGC")]);
        let per_row = vec![
            Msa::from_aligned("r1", [("m1", "A-C"), ("m2", "A-G"), ("p1", "ATC")]),
            Msa::from_aligned("r2", [("m1", "AC-"), ("m2", "AG-"), ("p2", "AGC")]),
        ];
        let merged = merge_profile_rows(&master, &profile, &per_row).unwrap();
        assert_eq!(
            merged.aligned_rows(),
            vec![
                b"A-C-".to_vec(),
                b"A-G-".to_vec(),
                b"ATC-".to_vec(),
                b"A-GC".to_vec(),
            ]
        );
        assert_eq!(merged.rows()[2].id, profile.rows()[0].id);
        assert_eq!(merged.rows()[0].id, master.rows()[0].id);
    }

    #[test]
    fn test_merge_profile_rows_rejects_changed_master() {
        let master = Msa::from_aligned("m", [("m1", "AC")]);
        let profile = Msa::from_aligned("p", [("p1", "AC")]);
        let per_row = vec![Msa::from_aligned("r1", [("m1", "CA"), ("p1", "AC")])];
        assert!(merge_profile_rows(&master, &profile, &per_row).is_err());
    }
}
