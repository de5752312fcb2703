//! # msa-reconcile: live alignment editing around an external aligner
//!
//! This library holds the non-visual core of a multiple sequence alignment
//! editor: a live, lockable alignment object, row grouping for the view,
//! and the reconciliation of external aligner results back into the live
//! alignment.
//!
//! ## Overview
//!
//! msa-reconcile allows you to:
//! - Keep rows addressable by stable ids while gaps, order and content change
//! - Group rows with identical residues into collapsible blocks
//! - Run MUSCLE (align, refine, add sequences, profile to profile) on a
//!   snapshot while the live object is locked
//! - Apply the result as one undoable modification step, or not at all
//!
//! ## Example Usage
//!
//! ```no_run
//! # use anyhow::Result;
//! # fn main() -> Result<()> {
//! use msa_reconcile::{AlignConfig, AlignObjectTask, Msa, MsaObject, ProcessAligner};
//! use std::sync::Arc;
//!
//! let object = MsaObject::shared(Msa::from_aligned(
//!     "example",
//!     [("seq1", "ACGTACGT"), ("seq2", "ACGACGT")],
//! ));
//!
//! let config = AlignConfig::default();
//! let aligner = Arc::new(ProcessAligner::new(&config)?);
//! let result = AlignObjectTask::new(&object, config, aligner).execute();
//! println!("{result:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - `gap`: gap model arithmetic
//! - `msa`: alignment value types and stable row ids
//! - `object`: the live object, state locks and modification steps
//! - `grouping`: collapse model and row order modes
//! - `reconcile`: aligner result to live alignment translation
//! - `aligner`: the aligner trait and the MUSCLE subprocess runner
//! - `task`: object-bound and detached alignment tasks
//! - `session`: a live object together with its view state
//!
//! ## Thread Safety
//!
//! Live objects are shared as `Arc<Mutex<_>>`. Tasks keep only weak
//! handles and never mutate the object while the aligner runs; worker
//! threads see detached snapshots only.

pub mod aligner;
pub mod binary_finder;
pub mod config;
pub mod error;
pub mod fasta;
pub mod gap;
pub mod grouping;
pub mod msa;
pub mod object;
pub mod pool;
pub mod reconcile;
pub mod session;
pub mod status;
pub mod task;
pub mod timeout;

pub use aligner::{Aligner, AlignerOutput, ProcessAligner};
pub use config::{AlignConfig, AlignConfigBuilder, AlignMode, AlignOp};
pub use error::{ReconcileError, Result};
pub use gap::{GapModel, GapRun};
pub use grouping::{CollapseModel, CollapsibleGroup, RowGroupingEngine, RowOrderMode, UpdateOutcome};
pub use msa::{Alphabet, Msa, MsaRow, Region, RowId};
pub use object::{
    lock_object, ModificationEvent, ModificationInfo, MsaAccess, MsaObject, SharedMsa, StateLock,
    UserModStep, WeakMsa,
};
pub use reconcile::{GapModelDiff, RowOrderDiff};
pub use session::EditorSession;
pub use status::OpStatus;
pub use task::{
    add_to_profile_task, AlignObjectTask, AlignOutcome, AlignTask, ProfileMode,
    ProfileToProfileTask, TaskOutput, TaskPayload, TaskResult,
};
