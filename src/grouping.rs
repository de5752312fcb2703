//! Row grouping and collapsing.
//!
//! Rows whose ungapped residues are identical can be folded into one
//! collapsible group in the editor. [`RowGroupingEngine`] keeps the
//! [`CollapseModel`] in sync with the alignment after every modification,
//! according to the row order mode chosen by the user.

use crate::error::{ReconcileError, Result};
use crate::msa::{MsaRow, RowId};
use crate::object::{MsaAccess, ModificationInfo};
use log::{debug, info};
use std::collections::{HashMap, HashSet};

/// How rows are ordered and grouped in the view. Owned by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowOrderMode {
    /// Alignment order, one row per group
    #[default]
    Original,
    /// Groups defined from outside, e.g. by a tree view
    Free,
    /// Rows with equal ungapped content share a group
    SequenceContent,
}

/// A set of rows shown as one foldable block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollapsibleGroup {
    /// Row positions in the alignment, in view order
    pub rows: Vec<usize>,
    /// Stable ids parallel to `rows`
    pub row_ids: Vec<RowId>,
    pub collapsed: bool,
}

impl CollapsibleGroup {
    pub fn new(rows: Vec<usize>, row_ids: Vec<RowId>, collapsed: bool) -> Self {
        assert_eq!(
            rows.len(),
            row_ids.len(),
            "Group rows and row ids must be parallel"
        );
        assert!(!rows.is_empty(), "Collapsible group must not be empty");
        CollapsibleGroup {
            rows,
            row_ids,
            collapsed,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Id of the group's first member, used to carry expansion state.
    pub fn first_row_id(&self) -> RowId {
        self.row_ids[0]
    }

    /// Rows the group occupies in the view.
    pub fn view_len(&self) -> usize {
        if self.collapsed {
            1
        } else {
            self.rows.len()
        }
    }
}

/// Partitions rows into groups of identical ungapped content.
///
/// Groups are emitted in the order of their first member; members keep
/// their relative order. Rows are bucketed by their ungapped bytes, so each
/// row is looked up once and never compared with itself. All groups start
/// collapsed.
pub fn compute_groups(rows: &[MsaRow]) -> Vec<CollapsibleGroup> {
    let mut groups: Vec<CollapsibleGroup> = Vec::new();
    let mut by_content: HashMap<&[u8], usize> = HashMap::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        match by_content.get(row.ungapped()) {
            Some(&group) => {
                groups[group].rows.push(index);
                groups[group].row_ids.push(row.id);
            }
            None => {
                by_content.insert(row.ungapped(), groups.len());
                groups.push(CollapsibleGroup::new(vec![index], vec![row.id], true));
            }
        }
    }
    groups
}

/// Collapse state of the whole view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollapseModel {
    groups: Vec<CollapsibleGroup>,
}

impl CollapseModel {
    /// Identity partition: one expanded group per row.
    pub fn reset(&mut self, row_ids: &[RowId]) {
        self.groups = row_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| CollapsibleGroup::new(vec![i], vec![id], false))
            .collect();
    }

    /// Replaces all groups.
    pub fn update(&mut self, groups: Vec<CollapsibleGroup>) {
        self.groups = groups;
    }

    pub fn groups(&self) -> &[CollapsibleGroup] {
        &self.groups
    }

    pub fn group(&self, index: usize) -> Option<&CollapsibleGroup> {
        self.groups.get(index)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Flips one group between collapsed and expanded.
    pub fn toggle(&mut self, group_index: usize) {
        let group_count = self.groups.len();
        let group = self
            .groups
            .get_mut(group_index)
            .unwrap_or_else(|| panic!("Group index {group_index} out of range ({group_count})"));
        group.collapsed = !group.collapsed;
    }

    pub fn has_groups_with_multiple_rows(&self) -> bool {
        self.groups.iter().any(|g| g.len() > 1)
    }

    /// Ids of all rows covered by the model.
    pub fn all_row_ids(&self) -> HashSet<RowId> {
        self.groups
            .iter()
            .flat_map(|g| g.row_ids.iter().copied())
            .collect()
    }

    /// Number of rows visible in the view.
    pub fn view_row_count(&self) -> usize {
        self.groups.iter().map(CollapsibleGroup::view_len).sum()
    }

    /// Alignment row shown at the given view row.
    pub fn row_index_by_view_row(&self, view_row: usize) -> Option<usize> {
        let mut first_view_row = 0;
        for group in &self.groups {
            let view_len = group.view_len();
            if view_row < first_view_row + view_len {
                return Some(group.rows[view_row - first_view_row]);
            }
            first_view_row += view_len;
        }
        None
    }

    /// View row showing the given alignment row; a hidden member of a
    /// collapsed group maps to the group's head.
    pub fn view_row_by_row_index(&self, row_index: usize) -> Option<usize> {
        let mut first_view_row = 0;
        for group in &self.groups {
            if let Some(pos) = group.rows.iter().position(|&r| r == row_index) {
                return Some(if group.collapsed {
                    first_view_row
                } else {
                    first_view_row + pos
                });
            }
            first_view_row += group.view_len();
        }
        None
    }

    /// Group containing the given alignment row.
    pub fn group_index_by_row_index(&self, row_index: usize) -> Option<usize> {
        self.groups.iter().position(|g| g.rows.contains(&row_index))
    }
}

/// Result of [`RowGroupingEngine::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The modification did not affect rows
    Unchanged,
    /// The model was reset to the identity partition
    Reset,
    /// Free groups still match the alignment
    Kept,
    /// Groups were recomputed from row content
    Regrouped,
    /// Free groups no longer match the rows; the caller should switch to
    /// [`RowOrderMode::Original`]
    FallbackToOriginal,
}

/// Keeps a [`CollapseModel`] in sync with an alignment.
#[derive(Debug, Clone, Default)]
pub struct RowGroupingEngine {
    model: CollapseModel,
}

impl RowGroupingEngine {
    /// Engine starting with the identity partition of `msa`.
    pub fn new<A: MsaAccess + ?Sized>(msa: &A) -> Self {
        let mut engine = RowGroupingEngine::default();
        engine.model.reset(&msa.row_ids());
        engine
    }

    pub fn model(&self) -> &CollapseModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut CollapseModel {
        &mut self.model
    }

    /// Reacts to an alignment modification.
    pub fn update<A: MsaAccess + ?Sized>(
        &mut self,
        modification: &ModificationInfo,
        msa: &A,
        mode: RowOrderMode,
    ) -> UpdateOutcome {
        if !modification.row_content_changed && !modification.row_list_changed {
            return UpdateOutcome::Unchanged;
        }

        match mode {
            RowOrderMode::Original => {
                self.model.reset(&msa.row_ids());
                UpdateOutcome::Reset
            }
            RowOrderMode::Free => {
                let current: HashSet<RowId> = msa.row_ids().into_iter().collect();
                if self.model.all_row_ids() == current {
                    UpdateOutcome::Kept
                } else {
                    info!("Free row groups no longer match the alignment rows");
                    UpdateOutcome::FallbackToOriginal
                }
            }
            RowOrderMode::SequenceContent => {
                self.regroup_by_content(msa);
                UpdateOutcome::Regrouped
            }
        }
    }

    /// Recomputes content groups, keeping expanded groups expanded.
    ///
    /// A new group is expanded only if its first member was the first member
    /// of a group that was expanded before. When expanded `{1, 2}` splits into
    /// `{1}` and `{2}`, only `{1}` stays expanded.
    pub fn regroup_by_content<A: MsaAccess + ?Sized>(&mut self, msa: &A) {
        let expanded_before: HashSet<RowId> = self
            .model
            .groups()
            .iter()
            .filter(|g| !g.collapsed)
            .map(CollapsibleGroup::first_row_id)
            .collect();

        let mut groups = compute_groups(msa.rows());
        for group in &mut groups {
            group.collapsed = !expanded_before.contains(&group.first_row_id());
        }
        debug!(
            "Regrouped {} rows into {} groups",
            msa.rows().len(),
            groups.len()
        );
        self.model.update(groups);
    }

    /// Applies a mode chosen by the user.
    ///
    /// Entering content mode starts from freshly collapsed groups; entering
    /// the original mode resets to the identity partition. Free groups are
    /// set with [`RowGroupingEngine::set_free_groups`].
    pub fn activate<A: MsaAccess + ?Sized>(&mut self, mode: RowOrderMode, msa: &A) {
        match mode {
            RowOrderMode::Original => self.model.reset(&msa.row_ids()),
            RowOrderMode::SequenceContent => {
                self.model.update(Vec::new());
                self.regroup_by_content(msa);
            }
            RowOrderMode::Free => {}
        }
    }

    /// Installs externally defined groups given by row names.
    ///
    /// Groups with more than one member start collapsed. The caller switches
    /// its mode to [`RowOrderMode::Free`] on success.
    pub fn set_free_groups<A, S>(&mut self, msa: &A, named_groups: &[Vec<S>]) -> Result<()>
    where
        A: MsaAccess + ?Sized,
        S: AsRef<str>,
    {
        let rows = msa.rows();
        let mut groups = Vec::with_capacity(named_groups.len());
        for names in named_groups {
            let mut indices = Vec::with_capacity(names.len());
            let mut ids = Vec::with_capacity(names.len());
            for name in names {
                let name = name.as_ref();
                let index = rows.iter().position(|r| r.name == name).ok_or_else(|| {
                    ReconcileError::InvalidRowOrder(format!("Row is not found: {name}"))
                })?;
                indices.push(index);
                ids.push(rows[index].id);
            }
            if indices.is_empty() {
                continue;
            }
            let collapsed = indices.len() > 1;
            groups.push(CollapsibleGroup::new(indices, ids, collapsed));
        }
        self.model.update(groups);
        Ok(())
    }
}
