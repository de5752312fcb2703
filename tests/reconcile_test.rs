//! Reconciliation of aligner output with a live alignment.

use msa_reconcile::reconcile::{
    apply_diff, apply_merge, reconcile_align_result, reconcile_profile_merge,
};
use msa_reconcile::{
    Alphabet, GapModelDiff, GapRun, ModificationEvent, Msa, MsaAccess, MsaObject, MsaRow,
    ReconcileError, RowId, RowOrderDiff,
};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver};

fn rows_with_ids(rows: &[(i64, &str)]) -> Msa {
    let mut msa = Msa::new("input", Alphabet::Nucleotide);
    for (id, aligned) in rows {
        msa.push_row(MsaRow::from_aligned(RowId(*id), format!("row{id}"), aligned.as_bytes()));
    }
    msa
}

fn observed(object: &mut MsaObject) -> Receiver<ModificationEvent> {
    let (tx, rx) = channel();
    object.subscribe(tx);
    rx
}

#[test]
fn test_stable_result_keeps_order() {
    let input = rows_with_ids(&[(10, "ACGT"), (11, "ACGT")]);
    let result = Msa::from_aligned("out", [("x", "AC-GT"), ("y", "ACGT")]);

    let (gaps, order) = reconcile_align_result(&input, &result, &[], true).unwrap();

    let expected: GapModelDiff = [
        (RowId(10), vec![GapRun::new(2, 1)]),
        (RowId(11), Vec::new()),
    ]
    .into_iter()
    .collect();
    assert_eq!(gaps, expected);
    assert_eq!(order, None);
}

#[test]
fn test_short_result_is_rejected() {
    let input = rows_with_ids(&[(10, "ACGT"), (11, "ACGT")]);
    let result = Msa::from_aligned("out", [("x", "AC-GT")]);

    let err = reconcile_align_result(&input, &result, &[], true).unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::UnexpectedRowCount {
            expected: 2,
            actual: 1
        }
    ));
    assert_eq!(
        err.to_string(),
        "Unexpected number of rows in the result multiple alignment!"
    );
}

#[test]
fn test_locked_object_is_left_untouched() {
    let mut object = MsaObject::new(rows_with_ids(&[(10, "ACGT"), (11, "A-CGT")]));
    let events = observed(&mut object);
    let _lock = object.lock_state("other task");
    let before = object.snapshot();

    let gaps: GapModelDiff = [(RowId(10), vec![GapRun::new(1, 2)])].into_iter().collect();
    let order = RowOrderDiff::new(vec![RowId(11), RowId(10)]);
    let err = apply_diff(&mut object, &gaps, Some(&order)).unwrap_err();

    assert_eq!(err.kind(), "object_is_state_locked");
    assert_eq!(err.to_string(), "object_is_state_locked");
    assert_eq!(object.snapshot(), before);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_reordered_result_applies_in_one_step() {
    let mut object = MsaObject::new(Msa::from_aligned(
        "live",
        [("a", "AAAC"), ("b", "GGT"), ("c", "TTTT")],
    ));
    let input = object.snapshot();
    let ids = input.row_ids();
    let events = observed(&mut object);

    // Aligner output order: c, a, b
    let result = Msa::from_aligned("out", [("c", "TTTT-"), ("a", "AAA-C"), ("b", "G-G-T")]);
    let (gaps, order) = reconcile_align_result(&input, &result, &[2, 0, 1], false).unwrap();
    let order = order.expect("order changed");
    assert_eq!(order.ids(), &[ids[2], ids[0], ids[1]]);

    apply_diff(&mut object, &gaps, Some(&order)).unwrap();

    assert_eq!(object.row_ids(), vec![ids[2], ids[0], ids[1]]);
    assert_eq!(
        object.msa().aligned_rows(),
        vec![b"TTTT-".to_vec(), b"AAA-C".to_vec(), b"G-G-T".to_vec()]
    );

    let event = events.try_recv().unwrap();
    assert!(event.info.row_list_changed);
    assert!(event.info.row_content_changed);
    assert_eq!(event.version, object.version());
    assert!(events.try_recv().is_err(), "one event per step");

    let before: HashSet<RowId> = ids.into_iter().collect();
    let after: HashSet<RowId> = object.row_ids().into_iter().collect();
    assert_eq!(before, after);
}

#[test]
fn test_unchanged_order_raises_no_row_list_change() {
    let mut object = MsaObject::new(Msa::from_aligned("live", [("a", "ACGT"), ("b", "AGT")]));
    let input = object.snapshot();
    let events = observed(&mut object);

    let result = Msa::from_aligned("out", [("a", "ACGT"), ("b", "A-GT")]);
    let (gaps, order) = reconcile_align_result(&input, &result, &[0, 1], false).unwrap();
    assert!(order.is_none());
    apply_diff(&mut object, &gaps, order.as_ref()).unwrap();

    let event = events.try_recv().unwrap();
    assert!(!event.info.row_list_changed);
    assert_eq!(event.info.modified_row_ids, vec![input.row_ids()[1]]);
}

#[test]
fn test_identical_result_raises_no_event() {
    let mut object = MsaObject::new(Msa::from_aligned("live", [("a", "AC-GT"), ("b", "ACCGT")]));
    let input = object.snapshot();
    let events = observed(&mut object);

    let (gaps, order) = reconcile_align_result(&input, &input, &[], true).unwrap();
    assert_eq!(gaps.len(), 2);
    assert!(gaps.changed_rows(&object).is_empty());
    apply_diff(&mut object, &gaps, order.as_ref()).unwrap();

    assert!(events.try_recv().is_err());
    assert_eq!(object.version(), 0);
}

#[test]
fn test_diff_for_unknown_row_changes_nothing() {
    let mut object = MsaObject::new(rows_with_ids(&[(10, "ACGT"), (11, "ACGT")]));
    let before = object.snapshot();
    let gaps: GapModelDiff = [
        (RowId(10), vec![GapRun::new(0, 1)]),
        (RowId(99), Vec::new()),
    ]
    .into_iter()
    .collect();

    assert!(matches!(
        apply_diff(&mut object, &gaps, None),
        Err(ReconcileError::RowNotFound(99))
    ));
    assert_eq!(object.snapshot(), before);
}

#[test]
fn test_profile_merge_adds_profile_ids() {
    let mut object = MsaObject::new(Msa::from_aligned("live", [("a", "ACGT"), ("b", "AGT")]));
    let input = object.snapshot();
    let profile = Msa::from_aligned("profile", [("p1", "ACCGT"), ("p2", "AC-GT")]);
    let result = Msa::from_aligned(
        "out",
        [("a", "AC-GT"), ("b", "A--GT"), ("p1", "ACCGT"), ("p2", "AC-GT")],
    );

    let merged = reconcile_profile_merge(&input, &profile, &result).unwrap();
    assert_eq!(merged.row_count(), input.row_count() + profile.row_count());

    let mut expected_ids = input.row_ids();
    expected_ids.extend(profile.row_ids());
    assert_eq!(merged.row_ids(), expected_ids);

    apply_merge(&mut object, merged).unwrap();
    assert_eq!(object.msa().row_names(), vec!["a", "b", "p1", "p2"]);
    assert_eq!(object.msa().length(), 5);
}

#[test]
fn test_profile_merge_with_wrong_row_count() {
    let input = Msa::from_aligned("live", [("a", "ACGT")]);
    let profile = Msa::from_aligned("profile", [("p1", "ACGT"), ("p2", "ACGT")]);
    let result = Msa::from_aligned("out", [("a", "ACGT"), ("p1", "ACGT")]);

    let err = reconcile_profile_merge(&input, &profile, &result).unwrap_err();
    assert_eq!(err.kind(), "profile_merge_failed");
    assert_eq!(err.to_string(), "Failed to apply the result of Muscle");
}
