//! Alignment tasks.
//!
//! [`AlignTask`] runs one aligner operation on a detached alignment.
//! [`AlignObjectTask`] binds it to a live object: it locks the object while
//! the aligner runs and applies the reconciled result in one modification
//! step. [`ProfileToProfileTask`] aligns profile rows one by one against a
//! master alignment on a bounded worker pool.

use crate::aligner::Aligner;
use crate::config::{AlignConfig, AlignOp};
use crate::error::{ReconcileError, Result};
use crate::fasta;
use crate::msa::{Msa, MsaRow, Region};
use crate::object::{lock_object, MsaAccess, SharedMsa, StateLock, WeakMsa};
use crate::pool::run_bounded;
use crate::reconcile::{
    apply_diff, apply_merge, merge_profile_rows, reconcile_align_result, reconcile_profile_merge,
    row_correspondence, GapModelDiff, RowOrderDiff,
};
use crate::status::OpStatus;
use crate::timeout::run_with_budget;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;

/// Reason recorded on the state lock held while aligning.
pub const ALIGN_LOCK_REASON: &str = "Muscle lock";

/// Align or refine result before reconciliation.
#[derive(Debug, Clone)]
pub struct AlignOutcome {
    /// Snapshot the aligner worked on
    pub input: Msa,
    /// Full-width result rows in aligner output order
    pub result: Msa,
    /// Input index of every result row
    pub output_ids: Vec<usize>,
}

/// What an [`AlignTask`] produced.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    /// New gaps and order for the existing rows
    Aligned(AlignOutcome),
    /// A new alignment holding the input and profile rows
    Merged(Msa),
}

/// What was applied to the live object.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    Applied {
        gap_diff: GapModelDiff,
        order_diff: Option<RowOrderDiff>,
    },
    Merged(Msa),
}

/// Final state of an object-bound task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    Success(TaskPayload),
    Error { kind: &'static str, message: String },
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success(_))
    }

    /// Error kind, `None` on success.
    pub fn error_kind(&self) -> Option<&'static str> {
        match self {
            TaskResult::Success(_) => None,
            TaskResult::Error { kind, .. } => Some(*kind),
        }
    }

    pub fn payload(&self) -> Option<&TaskPayload> {
        match self {
            TaskResult::Success(payload) => Some(payload),
            TaskResult::Error { .. } => None,
        }
    }
}

impl From<ReconcileError> for TaskResult {
    fn from(error: ReconcileError) -> Self {
        TaskResult::Error {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<Result<TaskPayload>> for TaskResult {
    fn from(result: Result<TaskPayload>) -> Self {
        match result {
            Ok(payload) => TaskResult::Success(payload),
            Err(error) => error.into(),
        }
    }
}

/// One aligner operation on a detached alignment.
pub struct AlignTask {
    input: Msa,
    config: AlignConfig,
    aligner: Arc<dyn Aligner>,
    status: OpStatus,
}

impl AlignTask {
    pub fn new(input: Msa, config: AlignConfig, aligner: Arc<dyn Aligner>) -> Result<Self> {
        config.validate()?;
        if let Some(region) = config.region {
            let length = input.length();
            if region.end() > length {
                return Err(ReconcileError::InvalidRegion(format!(
                    "{region} is outside of alignment with {length} columns"
                )));
            }
        }
        Ok(AlignTask {
            input,
            config,
            aligner,
            status: OpStatus::new(),
        })
    }

    /// Shares an existing status, e.g. one owned by a parent task.
    pub fn with_status(mut self, status: OpStatus) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> &OpStatus {
        &self.status
    }

    pub fn input(&self) -> &Msa {
        &self.input
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Runs the configured operation, honouring cancellation and `max_secs`.
    pub fn run(&self) -> Result<TaskOutput> {
        self.status.check()?;
        info!(
            "{:?} started for '{}' ({} rows)",
            self.config.op,
            self.input.name,
            self.input.row_count()
        );
        let output = run_with_budget(&self.status, self.config.max_secs, |status| self.run_op(status))?;
        self.status.check()?;
        info!("{:?} finished for '{}'", self.config.op, self.input.name);
        Ok(output)
    }

    fn profile(&self) -> Result<&Msa> {
        self.config.profile.as_ref().ok_or_else(|| {
            ReconcileError::InvalidConfig(format!("{:?} requires a profile", self.config.op))
        })
    }

    fn run_op(&self, status: &OpStatus) -> Result<TaskOutput> {
        match self.config.op {
            AlignOp::Align | AlignOp::Refine => self.align_rows(status).map(TaskOutput::Aligned),
            AlignOp::AddUnalignedToProfile => {
                let profile = self.profile()?;
                let result = self
                    .aligner
                    .add_unaligned_to_profile(&self.input, profile, &self.config, status)?;
                reconcile_profile_merge(&self.input, profile, &result).map(TaskOutput::Merged)
            }
            AlignOp::ProfileToProfile => {
                let profile = self.profile()?;
                let result = self
                    .aligner
                    .align_profiles(&self.input, profile, &self.config, status)?;
                reconcile_profile_merge(&self.input, profile, &result).map(TaskOutput::Merged)
            }
        }
    }

    fn call_aligner(&self, input: &Msa, status: &OpStatus) -> Result<(Msa, Vec<usize>)> {
        let output = if self.config.op == AlignOp::Refine {
            self.aligner.refine(input, &self.config, status)?
        } else {
            self.aligner.align(input, &self.config, status)?
        };
        status.check()?;
        if output.alignment.is_empty() && !input.is_empty() {
            return Err(ReconcileError::EmptyResult);
        }
        Ok((output.alignment, output.output_ids))
    }

    fn align_rows(&self, status: &OpStatus) -> Result<AlignOutcome> {
        let length = self.input.length();
        let region = self
            .config
            .region
            .filter(|r| !(r.start == 0 && r.len == length));

        let Some(region) = region else {
            let (result, output_ids) = self.call_aligner(&self.input, status)?;
            return Ok(AlignOutcome {
                input: self.input.clone(),
                result,
                output_ids,
            });
        };

        debug!("Aligning columns {region} of '{}'", self.input.name);
        let sub = self.input.mid(region)?;
        let (sub_result, output_ids) = self.call_aligner(&sub, status)?;
        let mapping = row_correspondence(&sub, &sub_result, &output_ids, self.config.stable_mode)?;
        let result = self.splice(region, &sub, &sub_result, &mapping)?;
        Ok(AlignOutcome {
            input: self.input.clone(),
            result,
            output_ids: mapping,
        })
    }

    /// Puts the untouched columns around an aligned region back.
    ///
    /// Rows the aligner dropped keep their original region content.
    fn splice(&self, region: Region, sub: &Msa, sub_result: &Msa, mapping: &[usize]) -> Result<Msa> {
        let mut middle = Msa::new(self.input.name.clone(), self.input.alphabet);
        for (pos, &i) in mapping.iter().enumerate() {
            let source = &sub.rows()[i];
            middle.push_row(match sub_result.row(pos) {
                Some(row) => MsaRow::new(
                    source.id,
                    source.name.clone(),
                    row.ungapped().to_vec(),
                    row.gap_model().to_vec(),
                ),
                None => source.clone(),
            });
        }

        let tail = self.input.length() - region.end();
        let mut result = self.columns(0, region.start, mapping);
        result.append_columns(&middle)?;
        result.append_columns(&self.columns(region.end(), tail, mapping))?;
        Ok(result)
    }

    /// Input columns `start..start + len` with rows in `mapping` order.
    fn columns(&self, start: usize, len: usize, mapping: &[usize]) -> Msa {
        let mut part = Msa::new(self.input.name.clone(), self.input.alphabet);
        for &i in mapping {
            let source = &self.input.rows()[i];
            part.push_row(MsaRow::from_aligned(
                source.id,
                source.name.clone(),
                &source.aligned_window(start, len),
            ));
        }
        part
    }
}

/// An alignment task bound to a live object.
///
/// Call [`prepare`](Self::prepare), [`run`](Self::run) and
/// [`report`](Self::report) in order, or [`execute`](Self::execute) for
/// all three. The state lock taken by `prepare` is released by `report`,
/// or on drop when the task is abandoned.
pub struct AlignObjectTask {
    object: WeakMsa,
    config: AlignConfig,
    aligner: Arc<dyn Aligner>,
    status: OpStatus,
    lock: Option<StateLock>,
    task: Option<AlignTask>,
    output: Option<Result<TaskOutput>>,
}

impl AlignObjectTask {
    pub fn new(object: &SharedMsa, config: AlignConfig, aligner: Arc<dyn Aligner>) -> Self {
        AlignObjectTask::from_weak(Arc::downgrade(object), config, aligner)
    }

    pub fn from_weak(object: WeakMsa, config: AlignConfig, aligner: Arc<dyn Aligner>) -> Self {
        AlignObjectTask {
            object,
            config,
            aligner,
            status: OpStatus::new(),
            lock: None,
            task: None,
            output: None,
        }
    }

    /// Handle for cancelling the task from another thread.
    pub fn status(&self) -> &OpStatus {
        &self.status
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Whether the task currently holds its state lock.
    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    /// Snapshots the object and locks it.
    pub fn prepare(&mut self) -> Result<()> {
        let shared = self.object.upgrade().ok_or(ReconcileError::ObjectRemoved)?;
        let mut object = lock_object(&shared);
        if object.is_state_locked() {
            return Err(ReconcileError::ObjectIsStateLocked);
        }
        let task = AlignTask::new(object.snapshot(), self.config.clone(), Arc::clone(&self.aligner))?
            .with_status(self.status.clone());
        self.lock = Some(object.lock_state(ALIGN_LOCK_REASON));
        self.task = Some(task);
        Ok(())
    }

    /// Runs the aligner without touching the object.
    pub fn run(&mut self) {
        if let Some(task) = &self.task {
            self.output = Some(task.run());
        }
    }

    /// Releases the lock and applies the result.
    pub fn report(&mut self) -> TaskResult {
        let result = self.apply();
        match &result {
            Ok(_) => info!("Alignment result applied"),
            Err(e) => warn!("Alignment result not applied: {e}"),
        }
        result.into()
    }

    /// Runs the whole task lifecycle.
    pub fn execute(mut self) -> TaskResult {
        if let Err(e) = self.prepare() {
            return e.into();
        }
        self.run();
        self.report()
    }

    fn apply(&mut self) -> Result<TaskPayload> {
        let Some(lock) = self.lock.take() else {
            return Err(match self.output.take() {
                Some(Err(e)) => e,
                _ => ReconcileError::ObjectChanged,
            });
        };
        let shared = self.object.upgrade().ok_or(ReconcileError::ObjectRemoved)?;

        // One guard from unlock through apply
        let mut object = lock_object(&shared);
        object.unlock_state(lock);

        let output = self.output.take().unwrap_or(Err(ReconcileError::Cancelled))?;
        self.status.check()?;
        if object.is_state_locked() {
            return Err(ReconcileError::ObjectIsStateLocked);
        }

        match output {
            TaskOutput::Aligned(outcome) => {
                let (gap_diff, order_diff) = reconcile_align_result(
                    &outcome.input,
                    &outcome.result,
                    &outcome.output_ids,
                    self.config.stable_mode,
                )?;
                apply_diff(&mut *object, &gap_diff, order_diff.as_ref())?;
                Ok(TaskPayload::Applied {
                    gap_diff,
                    order_diff,
                })
            }
            TaskOutput::Merged(merged) => {
                apply_merge(&mut *object, merged.clone())?;
                Ok(TaskPayload::Merged(merged))
            }
        }
    }
}

impl Drop for AlignObjectTask {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            if let Some(shared) = self.object.upgrade() {
                debug!("Releasing abandoned {} state lock", lock.reason());
                lock_object(&shared).unlock_state(lock);
            }
        }
    }
}

/// What a file added to an alignment holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileMode {
    /// Sequences added one by one, ignoring their gaps
    SequencesToProfile,
    /// An alignment aligned as a whole against the object
    ProfileToProfile,
}

/// Creates the object task adding the contents of a FASTA file.
pub fn add_to_profile_task(
    object: &SharedMsa,
    path: &Path,
    mode: ProfileMode,
    config: AlignConfig,
    aligner: Arc<dyn Aligner>,
) -> Result<AlignObjectTask> {
    let profile = fasta::read_msa(path)?;
    if profile.is_empty() {
        let what = match mode {
            ProfileMode::SequencesToProfile => "sequences",
            ProfileMode::ProfileToProfile => "alignment",
        };
        return Err(ReconcileError::InvalidConfig(format!(
            "No {what} found in file {}",
            path.display()
        )));
    }
    let op = match mode {
        ProfileMode::SequencesToProfile => AlignOp::AddUnalignedToProfile,
        ProfileMode::ProfileToProfile => AlignOp::ProfileToProfile,
    };
    let config = AlignConfig {
        op,
        profile: Some(profile),
        region: None,
        ..config
    };
    config.validate()?;
    Ok(AlignObjectTask::new(object, config, aligner))
}

/// Aligns every profile row separately against a master alignment.
pub struct ProfileToProfileTask {
    master: Msa,
    profile: Msa,
    config: AlignConfig,
    aligner: Arc<dyn Aligner>,
    status: OpStatus,
}

impl ProfileToProfileTask {
    pub fn new(master: Msa, profile: Msa, config: AlignConfig, aligner: Arc<dyn Aligner>) -> Self {
        ProfileToProfileTask {
            master,
            profile,
            config,
            aligner,
            status: OpStatus::new(),
        }
    }

    pub fn status(&self) -> &OpStatus {
        &self.status
    }

    /// Runs one aligner job per profile row, at most `num_threads` at a time.
    pub fn run(&self) -> Result<Msa> {
        self.status.check()?;
        let threads = self.config.effective_threads();
        info!(
            "Aligning {} profile rows against '{}' on {threads} threads",
            self.profile.row_count(),
            self.master.name
        );

        let singles: Vec<Msa> = self
            .profile
            .rows()
            .iter()
            .map(|row| {
                let mut single = Msa::new(self.profile.name.clone(), self.profile.alphabet);
                single.push_row(MsaRow::new(row.id, row.name.clone(), row.ungapped().to_vec(), Vec::new()));
                single
            })
            .collect();

        let per_row = run_bounded(singles, threads, &self.status, |index, single| {
            debug!("Aligning profile row {index}");
            self.aligner
                .align_profiles(&self.master, &single, &self.config, &self.status)
        })?;
        self.status.check()?;
        merge_profile_rows(&self.master, &self.profile, &per_row)
    }
}
