//! Row grouping behaviour on a live alignment object.

use msa_reconcile::grouping::compute_groups;
use msa_reconcile::{
    lock_object, Msa, MsaAccess, MsaObject, RowGroupingEngine, RowOrderMode, UpdateOutcome,
};
use pretty_assertions::assert_eq;
use std::sync::mpsc::channel;

fn three_rows() -> Msa {
    Msa::from_aligned("groups", [("s1", "AC-GT"), ("s2", "ACGT"), ("s3", "TTTT")])
}

#[test]
fn test_identical_rows_share_a_collapsed_group() {
    let msa = three_rows();
    let ids = msa.row_ids();

    let groups = compute_groups(msa.rows());
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].row_ids, vec![ids[0], ids[1]]);
    assert_eq!(groups[1].row_ids, vec![ids[2]]);
    assert!(groups.iter().all(|g| g.collapsed));
}

#[test]
fn test_expanded_group_stays_expanded_when_anchor_survives() {
    let object = MsaObject::shared(three_rows());
    let (tx, rx) = channel();
    lock_object(&object).subscribe(tx);

    let mut engine = RowGroupingEngine::default();
    let ids = {
        let obj = lock_object(&object);
        engine.activate(RowOrderMode::SequenceContent, &*obj);
        obj.row_ids()
    };
    engine.model_mut().toggle(0);
    assert!(!engine.model().groups()[0].collapsed);

    lock_object(&object).set_row_content(ids[1], b"TTTA").unwrap();
    let event = rx.try_recv().unwrap();

    let obj = lock_object(&object);
    let outcome = engine.update(&event.info, &*obj, RowOrderMode::SequenceContent);
    assert_eq!(outcome, UpdateOutcome::Regrouped);

    let groups = engine.model().groups();
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[0].row_ids, vec![ids[0]]);
    assert!(!groups[0].collapsed);
    assert_eq!(groups[1].row_ids, vec![ids[1]]);
    assert!(groups[1].collapsed);
    assert_eq!(groups[2].row_ids, vec![ids[2]]);
    assert!(groups[2].collapsed);
}

#[test]
fn test_grouping_is_idempotent() {
    let msa = Msa::from_aligned(
        "idem",
        [("a", "AC"), ("b", "GG"), ("c", "A-C"), ("d", "GG-"), ("e", "T")],
    );
    let first = compute_groups(msa.rows());
    let second = compute_groups(msa.rows());
    assert_eq!(first, second);
}

#[test]
fn test_same_group_iff_same_residues() {
    let sequences = ["ACGT", "AC-GT", "acgt", "TTTT", "ACG", "", "-", "TTTT--"];
    let msa = Msa::from_aligned("pairs", sequences.iter().enumerate().map(|(i, s)| (format!("r{i}"), *s)));
    let groups = compute_groups(msa.rows());

    let group_of = |row: usize| groups.iter().position(|g| g.rows.contains(&row)).unwrap();
    for a in 0..msa.row_count() {
        for b in 0..msa.row_count() {
            let same_content = msa.rows()[a].ungapped() == msa.rows()[b].ungapped();
            assert_eq!(group_of(a) == group_of(b), same_content, "rows {a} and {b}");
        }
    }
    let members: usize = groups.iter().map(|g| g.len()).sum();
    assert_eq!(members, msa.row_count());
}

#[test]
fn test_free_groups_fall_back_on_row_list_change() {
    let object = MsaObject::shared(three_rows());
    let (tx, rx) = channel();
    lock_object(&object).subscribe(tx);

    let mut engine = RowGroupingEngine::default();
    engine
        .set_free_groups(&*lock_object(&object), &[vec!["s3", "s1"], vec!["s2"]])
        .unwrap();
    assert!(engine.model().groups()[0].collapsed);
    assert!(!engine.model().groups()[1].collapsed);

    // Content edits keep free groups
    let id = lock_object(&object).row_ids()[0];
    lock_object(&object).set_row_content(id, b"GGGG").unwrap();
    let event = rx.try_recv().unwrap();
    let outcome = engine.update(&event.info, &*lock_object(&object), RowOrderMode::Free);
    assert_eq!(outcome, UpdateOutcome::Kept);

    lock_object(&object).remove_row(id).unwrap();
    let event = rx.try_recv().unwrap();
    let outcome = engine.update(&event.info, &*lock_object(&object), RowOrderMode::Free);
    assert_eq!(outcome, UpdateOutcome::FallbackToOriginal);
}

#[test]
fn test_unknown_free_group_name_is_rejected() {
    let object = MsaObject::new(three_rows());
    let mut engine = RowGroupingEngine::new(&object);
    let err = engine
        .set_free_groups(&object, &[vec!["s1", "missing"]])
        .unwrap_err();
    assert!(err.to_string().contains("missing"));
}

#[test]
fn test_original_mode_resets_to_identity() {
    let object = MsaObject::new(three_rows());
    let mut engine = RowGroupingEngine::new(&object);
    engine.activate(RowOrderMode::SequenceContent, &object);
    assert_eq!(engine.model().group_count(), 2);

    let info = msa_reconcile::ModificationInfo::row_list();
    assert_eq!(
        engine.update(&info, &object, RowOrderMode::Original),
        UpdateOutcome::Reset
    );
    assert_eq!(engine.model().group_count(), 3);
    assert!(engine.model().groups().iter().all(|g| !g.collapsed));
    assert_eq!(engine.model().view_row_count(), 3);
}
