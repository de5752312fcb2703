//! The live, observable alignment object.
//!
//! [`MsaObject`] owns the alignment an editor session shows. All structural
//! changes go through it: they are rejected while a state lock is held, and
//! they are grouped by user modification steps so observers receive one
//! [`ModificationEvent`] per step no matter how many changes it contains.

use crate::error::{ReconcileError, Result};
use crate::gap::{self, GapModel, GapRun};
use crate::msa::{Msa, MsaRow, RowId};
use log::{debug, trace};
use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Shared handle to a live alignment object.
pub type SharedMsa = Arc<Mutex<MsaObject>>;

/// Non-owning handle used by background tasks.
pub type WeakMsa = Weak<Mutex<MsaObject>>;

/// Locks the object mutex, recovering the data from a poisoned lock.
pub fn lock_object(shared: &Mutex<MsaObject>) -> MutexGuard<'_, MsaObject> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What a modification step changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModificationInfo {
    /// Residues or gaps of at least one row changed
    pub row_content_changed: bool,
    /// Rows were added, removed or reordered
    pub row_list_changed: bool,
    /// The number of columns changed
    pub alignment_length_changed: bool,
    /// Rows touched by the step, in first-touch order
    pub modified_row_ids: Vec<RowId>,
}

impl ModificationInfo {
    pub fn content(ids: impl IntoIterator<Item = RowId>) -> Self {
        ModificationInfo {
            row_content_changed: true,
            modified_row_ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn row_list() -> Self {
        ModificationInfo {
            row_list_changed: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.row_content_changed
            && !self.row_list_changed
            && !self.alignment_length_changed
            && self.modified_row_ids.is_empty()
    }

    /// Folds another change into this one.
    pub fn merge(&mut self, other: ModificationInfo) {
        self.row_content_changed |= other.row_content_changed;
        self.row_list_changed |= other.row_list_changed;
        self.alignment_length_changed |= other.alignment_length_changed;
        for id in other.modified_row_ids {
            if !self.modified_row_ids.contains(&id) {
                self.modified_row_ids.push(id);
            }
        }
    }
}

/// Notification delivered to observers at the end of a modification step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationEvent {
    /// Object version after the step
    pub version: u64,
    pub info: ModificationInfo,
}

/// Token proving ownership of a state lock.
#[derive(Debug, PartialEq, Eq)]
pub struct StateLock {
    id: u64,
    reason: String,
}

impl StateLock {
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Access interface the reconciler and grouping engine use.
pub trait MsaAccess {
    /// Rows in current order.
    fn rows(&self) -> &[MsaRow];

    /// Position of a row, `None` when the id is unknown.
    fn row_index_by_id(&self, id: RowId) -> Option<usize>;

    /// Gap model of a row.
    fn gap_model(&self, id: RowId) -> Option<&[GapRun]>;

    /// Replaces gap models of the given rows.
    fn set_gap_models(&mut self, models: &BTreeMap<RowId, GapModel>) -> Result<()>;

    /// Reorders rows; `order` must be a permutation of the current ids.
    fn set_row_order(&mut self, order: &[RowId]) -> Result<()>;

    /// Replaces the whole alignment.
    fn set_alignment(&mut self, msa: Msa) -> Result<()>;

    /// Opens a user modification step; steps nest.
    fn begin_user_mod_step(&mut self) -> Result<()>;

    /// Closes the innermost step, notifying observers when the outermost ends.
    fn end_user_mod_step(&mut self);

    fn is_state_locked(&self) -> bool;

    fn lock_state(&mut self, reason: &str) -> StateLock;

    fn unlock_state(&mut self, lock: StateLock);

    /// Stable ids in current order.
    fn row_ids(&self) -> Vec<RowId> {
        self.rows().iter().map(|r| r.id).collect()
    }
}

/// Scoped user modification step; ends the step when dropped.
pub struct UserModStep<'a, A: MsaAccess + ?Sized> {
    target: &'a mut A,
}

impl<'a, A: MsaAccess + ?Sized> UserModStep<'a, A> {
    pub fn begin(target: &'a mut A) -> Result<Self> {
        target.begin_user_mod_step()?;
        Ok(UserModStep { target })
    }
}

impl<A: MsaAccess + ?Sized> Deref for UserModStep<'_, A> {
    type Target = A;

    fn deref(&self) -> &A {
        self.target
    }
}

impl<A: MsaAccess + ?Sized> DerefMut for UserModStep<'_, A> {
    fn deref_mut(&mut self) -> &mut A {
        self.target
    }
}

impl<A: MsaAccess + ?Sized> Drop for UserModStep<'_, A> {
    fn drop(&mut self) {
        self.target.end_user_mod_step();
    }
}

/// The live alignment of an editor session.
#[derive(Debug)]
pub struct MsaObject {
    msa: Msa,
    index: HashMap<RowId, usize>,
    version: u64,
    locks: Vec<(u64, String)>,
    next_lock_id: u64,
    step_depth: usize,
    pending: ModificationInfo,
    observers: Vec<Sender<ModificationEvent>>,
}

impl MsaObject {
    pub fn new(msa: Msa) -> Self {
        let index = msa.index_map();
        MsaObject {
            msa,
            index,
            version: 0,
            locks: Vec::new(),
            next_lock_id: 1,
            step_depth: 0,
            pending: ModificationInfo::default(),
            observers: Vec::new(),
        }
    }

    /// Wraps the object in a shared handle.
    pub fn shared(msa: Msa) -> SharedMsa {
        Arc::new(Mutex::new(MsaObject::new(msa)))
    }

    /// Current modification counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.msa.name
    }

    /// Read-only view of the alignment.
    pub fn msa(&self) -> &Msa {
        &self.msa
    }

    /// Detached copy of the current alignment.
    pub fn snapshot(&self) -> Msa {
        self.msa.clone()
    }

    pub fn row_count(&self) -> usize {
        self.msa.row_count()
    }

    /// Registers an observer for modification events.
    pub fn subscribe(&mut self, observer: Sender<ModificationEvent>) {
        self.observers.push(observer);
    }

    /// Reasons of all locks currently held.
    pub fn lock_reasons(&self) -> Vec<&str> {
        self.locks.iter().map(|(_, reason)| reason.as_str()).collect()
    }

    /// Appends a row from aligned bytes.
    pub fn add_row(&mut self, name: &str, aligned: &[u8]) -> Result<RowId> {
        self.ensure_unlocked()?;
        let length = self.msa.length();
        let id = self.msa.add_row(name, aligned);
        self.rebuild_index();
        let mut info = ModificationInfo::row_list();
        info.alignment_length_changed = self.msa.length() != length;
        info.modified_row_ids.push(id);
        self.record(info);
        Ok(id)
    }

    /// Removes a row; its id is never reused.
    pub fn remove_row(&mut self, id: RowId) -> Result<()> {
        self.ensure_unlocked()?;
        let length = self.msa.length();
        self.msa.remove_row(id)?;
        self.rebuild_index();
        let mut info = ModificationInfo::row_list();
        info.alignment_length_changed = self.msa.length() != length;
        info.modified_row_ids.push(id);
        self.record(info);
        Ok(())
    }

    /// Replaces the residues and gaps of one row.
    pub fn set_row_content(&mut self, id: RowId, aligned: &[u8]) -> Result<()> {
        self.ensure_unlocked()?;
        let index = self.index_of(id)?;
        let length = self.msa.length();
        let name = self.msa.rows()[index].name.clone();
        self.msa.rows_mut()[index] = MsaRow::from_aligned(id, name, aligned);
        let mut info = ModificationInfo::content([id]);
        info.alignment_length_changed = self.msa.length() != length;
        self.record(info);
        Ok(())
    }

    /// Inserts gap columns into one row at aligned position `pos`.
    pub fn insert_gaps(&mut self, id: RowId, pos: usize, count: usize) -> Result<()> {
        self.ensure_unlocked()?;
        let index = self.index_of(id)?;
        let length = self.msa.length();
        let row = &mut self.msa.rows_mut()[index];
        let mut gaps = row.gap_model().to_vec();
        gap::insert_gaps(&mut gaps, pos, count);
        row.set_gap_model(gaps);
        let mut info = ModificationInfo::content([id]);
        info.alignment_length_changed = self.msa.length() != length;
        self.record(info);
        Ok(())
    }

    /// Removes a column range that is a gap in every row.
    pub fn remove_gap_columns(&mut self, pos: usize, count: usize) -> Result<()> {
        self.ensure_unlocked()?;
        let all_gaps = self.msa.rows().iter().all(|row| {
            row.aligned_window(pos, count)
                .into_iter()
                .all(gap::is_gap)
        });
        if !all_gaps {
            return Err(ReconcileError::InvalidRegion(format!(
                "columns {}..{} contain residues",
                pos + 1,
                pos + count
            )));
        }

        let length = self.msa.length();
        let mut touched = Vec::new();
        for row in self.msa.rows_mut() {
            let mut gaps = row.gap_model().to_vec();
            gap::remove_columns(&mut gaps, pos, count);
            gap::merge_consecutive(&mut gaps);
            if let Some(updated) = gap::diff(row.gap_model(), &gaps) {
                row.set_gap_model(updated);
                touched.push(row.id);
            }
        }
        if !touched.is_empty() {
            let mut info = ModificationInfo::content(touched);
            info.alignment_length_changed = self.msa.length() != length;
            self.record(info);
        }
        Ok(())
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.is_state_locked() {
            debug!(
                "Rejecting modification of '{}': locked by {:?}",
                self.msa.name,
                self.lock_reasons()
            );
            return Err(ReconcileError::ObjectIsStateLocked);
        }
        Ok(())
    }

    fn index_of(&self, id: RowId) -> Result<usize> {
        self.index
            .get(&id)
            .copied()
            .ok_or(ReconcileError::RowNotFound(id.0))
    }

    fn rebuild_index(&mut self) {
        self.index = self.msa.index_map();
    }

    /// Queues a change; emits right away when no step is open.
    fn record(&mut self, info: ModificationInfo) {
        self.pending.merge(info);
        if self.step_depth == 0 {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.version += 1;
        let event = ModificationEvent {
            version: self.version,
            info: std::mem::take(&mut self.pending),
        };
        trace!("'{}' modified: {:?}", self.msa.name, event);
        self.observers
            .retain(|observer| observer.send(event.clone()).is_ok());
    }
}

impl MsaAccess for MsaObject {
    fn rows(&self) -> &[MsaRow] {
        self.msa.rows()
    }

    fn row_index_by_id(&self, id: RowId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    fn gap_model(&self, id: RowId) -> Option<&[GapRun]> {
        self.row_index_by_id(id)
            .map(|i| self.msa.rows()[i].gap_model())
    }

    fn set_gap_models(&mut self, models: &BTreeMap<RowId, GapModel>) -> Result<()> {
        self.ensure_unlocked()?;
        // Validate everything before touching a single row
        let indices = models
            .keys()
            .map(|&id| self.index_of(id))
            .collect::<Result<Vec<_>>>()?;

        let length = self.msa.length();
        let mut touched = Vec::new();
        for (index, (id, model)) in indices.into_iter().zip(models) {
            let row = &mut self.msa.rows_mut()[index];
            if let Some(updated) = gap::diff(row.gap_model(), model) {
                row.set_gap_model(updated);
                touched.push(*id);
            }
        }
        if !touched.is_empty() {
            let mut info = ModificationInfo::content(touched);
            info.alignment_length_changed = self.msa.length() != length;
            self.record(info);
        }
        Ok(())
    }

    fn set_row_order(&mut self, order: &[RowId]) -> Result<()> {
        self.ensure_unlocked()?;
        if order == self.msa.row_ids().as_slice() {
            return Ok(());
        }
        self.msa.reorder(order)?;
        self.rebuild_index();
        self.record(ModificationInfo::row_list());
        Ok(())
    }

    fn set_alignment(&mut self, msa: Msa) -> Result<()> {
        self.ensure_unlocked()?;
        let length = self.msa.length();
        let ids: Vec<RowId> = msa.row_ids();
        self.msa = msa;
        self.rebuild_index();
        let mut info = ModificationInfo::content(ids);
        info.row_list_changed = true;
        info.alignment_length_changed = self.msa.length() != length;
        self.record(info);
        Ok(())
    }

    fn begin_user_mod_step(&mut self) -> Result<()> {
        self.ensure_unlocked()?;
        self.step_depth += 1;
        Ok(())
    }

    fn end_user_mod_step(&mut self) {
        debug_assert!(self.step_depth > 0, "Unbalanced user modification step");
        self.step_depth = self.step_depth.saturating_sub(1);
        if self.step_depth == 0 {
            self.flush();
        }
    }

    fn is_state_locked(&self) -> bool {
        !self.locks.is_empty()
    }

    fn lock_state(&mut self, reason: &str) -> StateLock {
        let id = self.next_lock_id;
        self.next_lock_id += 1;
        self.locks.push((id, reason.to_string()));
        debug!("'{}' locked: {reason}", self.msa.name);
        StateLock {
            id,
            reason: reason.to_string(),
        }
    }

    fn unlock_state(&mut self, lock: StateLock) {
        let before = self.locks.len();
        self.locks.retain(|(id, _)| *id != lock.id);
        debug_assert!(self.locks.len() < before, "Unknown state lock '{}'", lock.reason);
        debug!("'{}' unlocked: {}", self.msa.name, lock.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn object() -> MsaObject {
        MsaObject::new(Msa::from_aligned("obj", [("a", "AC-GT"), ("b", "ACGT"), ("c", "TT")]))
    }

    #[test]
    fn test_mutation_rejected_while_locked() {
        let mut obj = object();
        let lock = obj.lock_state("test");
        assert!(obj.is_state_locked());
        let id = obj.row_ids()[0];
        assert!(matches!(obj.remove_row(id), Err(ReconcileError::ObjectIsStateLocked)));
        assert!(matches!(obj.begin_user_mod_step(), Err(ReconcileError::ObjectIsStateLocked)));
        assert_eq!(obj.row_count(), 3);
        obj.unlock_state(lock);
        assert!(!obj.is_state_locked());
        obj.remove_row(id).unwrap();
        assert_eq!(obj.row_count(), 2);
        assert_eq!(obj.row_index_by_id(id), None);
    }

    #[test]
    fn test_step_emits_single_event() {
        let mut obj = object();
        let (tx, rx) = channel();
        obj.subscribe(tx);
        let ids = obj.row_ids();

        {
            let mut step = UserModStep::begin(&mut obj).unwrap();
            let mut models = BTreeMap::new();
            models.insert(ids[1], vec![GapRun::new(0, 1)]);
            step.set_gap_models(&models).unwrap();
            step.set_row_order(&[ids[2], ids[1], ids[0]]).unwrap();
            assert!(rx.try_recv().is_err());
        }

        let event = rx.try_recv().unwrap();
        assert_eq!(event.version, 1);
        assert!(event.info.row_content_changed);
        assert!(event.info.row_list_changed);
        assert_eq!(event.info.modified_row_ids, vec![ids[1]]);
        assert!(rx.try_recv().is_err());
        assert_eq!(obj.row_index_by_id(ids[2]), Some(0));
    }

    #[test]
    fn test_unchanged_writes_emit_nothing() {
        let mut obj = object();
        let (tx, rx) = channel();
        obj.subscribe(tx);
        let ids = obj.row_ids();

        let mut models = BTreeMap::new();
        models.insert(ids[0], obj.gap_model(ids[0]).unwrap().to_vec());
        obj.set_gap_models(&models).unwrap();
        obj.set_row_order(&ids).unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(obj.version(), 0);
    }

    #[test]
    fn test_set_gap_models_validates_first() {
        let mut obj = object();
        let ids = obj.row_ids();
        let before = obj.snapshot();
        let mut models = BTreeMap::new();
        models.insert(ids[0], vec![GapRun::new(0, 3)]);
        models.insert(RowId(-5), Vec::new());
        assert!(obj.set_gap_models(&models).is_err());
        assert_eq!(obj.snapshot(), before);
    }

    #[test]
    fn test_insert_and_remove_gap_columns() {
        let mut obj = MsaObject::new(Msa::from_aligned("g", [("a", "A-C"), ("b", "AGC")]));
        let ids = obj.row_ids();
        obj.insert_gaps(ids[0], 0, 1).unwrap();
        obj.insert_gaps(ids[1], 0, 1).unwrap();
        assert_eq!(obj.msa().aligned_rows(), vec![b"-A-C".to_vec(), b"-AGC".to_vec()]);

        assert!(obj.remove_gap_columns(1, 1).is_err());
        obj.remove_gap_columns(0, 1).unwrap();
        assert_eq!(obj.msa().aligned_rows(), vec![b"A-C".to_vec(), b"AGC".to_vec()]);
        assert_eq!(obj.version(), 3);
    }
}
