//! An editing session: a live alignment plus its row grouping view state.
//!
//! The session listens to the object's modification events and keeps the
//! collapse model in sync with the current row order mode, switching back
//! to the original order when free groups stop matching the rows.

use crate::aligner::Aligner;
use crate::config::AlignConfig;
use crate::error::Result;
use crate::grouping::{CollapseModel, RowGroupingEngine, RowOrderMode, UpdateOutcome};
use crate::msa::Msa;
use crate::object::{lock_object, ModificationEvent, ModificationInfo, MsaObject, SharedMsa};
use crate::task::{AlignObjectTask, TaskResult};
use log::{debug, info};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;

pub struct EditorSession {
    object: SharedMsa,
    events: Receiver<ModificationEvent>,
    grouping: RowGroupingEngine,
    mode: RowOrderMode,
}

impl EditorSession {
    /// Opens a session on a new live object.
    pub fn new(msa: Msa) -> Self {
        EditorSession::attach(MsaObject::shared(msa))
    }

    /// Opens a session on an existing object.
    pub fn attach(object: SharedMsa) -> Self {
        let (tx, events) = channel();
        let grouping = {
            let mut guard = lock_object(&object);
            guard.subscribe(tx);
            RowGroupingEngine::new(&*guard)
        };
        EditorSession {
            object,
            events,
            grouping,
            mode: RowOrderMode::Original,
        }
    }

    pub fn object(&self) -> &SharedMsa {
        &self.object
    }

    pub fn mode(&self) -> RowOrderMode {
        self.mode
    }

    pub fn collapse_model(&self) -> &CollapseModel {
        self.grouping.model()
    }

    /// Switches between content grouping and the original order.
    ///
    /// Does nothing when the mode is already active.
    pub fn toggle_sequence_row_order(&mut self, by_sequence: bool) {
        let mode = if by_sequence {
            RowOrderMode::SequenceContent
        } else {
            RowOrderMode::Original
        };
        if mode == self.mode {
            return;
        }
        info!("Row order mode: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        let object = lock_object(&self.object);
        self.grouping.activate(mode, &*object);
    }

    /// Regroups by content again, keeping expanded groups expanded.
    pub fn refresh_sequence_row_order(&mut self) {
        if self.mode == RowOrderMode::SequenceContent {
            let object = lock_object(&self.object);
            self.grouping.regroup_by_content(&*object);
        }
    }

    /// Installs groups given by row names and enters free mode.
    pub fn enable_free_row_order<S: AsRef<str>>(&mut self, groups: &[Vec<S>]) -> Result<()> {
        let object = lock_object(&self.object);
        self.grouping.set_free_groups(&*object, groups)?;
        self.mode = RowOrderMode::Free;
        Ok(())
    }

    /// Collapses or expands one group.
    pub fn toggle_group(&mut self, group_index: usize) {
        self.grouping.model_mut().toggle(group_index);
    }

    /// Applies pending modification events to the collapse model.
    pub fn sync(&mut self) -> Vec<UpdateOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            debug!("Syncing view with version {}", event.version);
            outcomes.push(self.apply_modification(&event.info));
        }
        outcomes
    }

    fn apply_modification(&mut self, info: &ModificationInfo) -> UpdateOutcome {
        let object = lock_object(&self.object);
        let outcome = self.grouping.update(info, &*object, self.mode);
        if outcome == UpdateOutcome::FallbackToOriginal {
            self.mode = RowOrderMode::Original;
            self.grouping.activate(RowOrderMode::Original, &*object);
        }
        outcome
    }

    /// Runs an alignment task on the session's object and syncs the view.
    pub fn align(&mut self, config: AlignConfig, aligner: Arc<dyn Aligner>) -> TaskResult {
        let result = AlignObjectTask::new(&self.object, config, aligner).execute();
        self.sync();
        result
    }
}
