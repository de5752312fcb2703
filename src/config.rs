//! Configuration options for alignment tasks.
//!
//! This module provides a builder pattern for configuring the operation an
//! alignment task runs and how the external aligner is invoked.

use crate::error::{ReconcileError, Result};
use crate::msa::{Msa, Region};
use std::path::PathBuf;

/// Operation performed by an alignment task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignOp {
    /// Align the rows from scratch
    #[default]
    Align,
    /// Improve an existing alignment
    Refine,
    /// Align the (unaligned) profile sequences to the alignment
    AddUnalignedToProfile,
    /// Align the profile against the alignment as a whole
    ProfileToProfile,
}

impl AlignOp {
    /// Whether the op only changes gaps and order of the existing rows.
    pub fn keeps_rows(self) -> bool {
        matches!(self, AlignOp::Align | AlignOp::Refine)
    }
}

/// Aligner preset, mirrors the modes exposed by MUSCLE 3.x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignMode {
    /// Full iterative alignment
    #[default]
    Default,
    /// Two iterations, suited to large inputs
    Large,
}

/// Configuration for alignment tasks.
///
/// # Default Values
/// - `op`: Align
/// - `max_iterations`: 8
/// - `max_secs`: 0 (unlimited)
/// - `stable_mode`: true (keep input row order)
/// - `region`: None (whole alignment)
/// - `num_threads`: 0 (ideal thread count)
#[derive(Debug, Clone)]
pub struct AlignConfig {
    /// Operation to run
    pub op: AlignOp,

    /// Aligner preset
    pub mode: AlignMode,

    /// Maximum number of aligner iterations
    pub max_iterations: usize,

    /// Time budget in seconds, 0 means unlimited
    pub max_secs: u64,

    /// Keep the input row order in the result
    pub stable_mode: bool,

    /// Column range to align (Align and Refine only)
    pub region: Option<Region>,

    /// Profile for the profile operations
    pub profile: Option<Msa>,

    /// Worker threads, 0 means one per CPU
    pub num_threads: usize,

    /// Temporary directory for aligner input and output files
    pub temp_dir: Option<PathBuf>,

    /// Keep aligner input and output files for debugging
    pub keep_intermediates: bool,

    /// Explicit aligner executable
    pub binary: Option<PathBuf>,
}

impl Default for AlignConfig {
    fn default() -> Self {
        AlignConfig {
            op: AlignOp::Align,
            mode: AlignMode::Default,
            max_iterations: 8,
            max_secs: 0,
            stable_mode: true,
            region: None,
            profile: None,
            num_threads: 0,
            temp_dir: None,
            keep_intermediates: false,
            binary: None,
        }
    }
}

impl AlignConfig {
    /// Creates a new configuration builder.
    ///
    /// # Example
    /// ```
    /// use msa_reconcile::{AlignConfig, AlignOp};
    ///
    /// let config = AlignConfig::builder()
    ///     .op(AlignOp::Refine)
    ///     .max_iterations(4)
    ///     .num_threads(2)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.effective_threads(), 2);
    /// ```
    pub fn builder() -> AlignConfigBuilder {
        AlignConfigBuilder::default()
    }

    /// Thread count actually used: `num_threads`, or the CPU count when 0.
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.num_threads
        }
    }

    /// Checks that the parameters fit together.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(ReconcileError::InvalidConfig(
                "max_iterations must be positive".to_string(),
            ));
        }
        if self.region.is_some() && !self.op.keeps_rows() {
            return Err(ReconcileError::InvalidConfig(format!(
                "region alignment is not supported for {:?}",
                self.op
            )));
        }
        if let Some(region) = self.region {
            if region.len == 0 {
                return Err(ReconcileError::InvalidRegion(region.to_string()));
            }
        }
        if !self.op.keeps_rows() && self.profile.is_none() {
            return Err(ReconcileError::InvalidConfig(format!(
                "{:?} requires a profile",
                self.op
            )));
        }
        Ok(())
    }
}

/// Builder for constructing AlignConfig instances.
#[derive(Debug, Default)]
pub struct AlignConfigBuilder {
    config: AlignConfig,
}

impl AlignConfigBuilder {
    /// Sets the operation to run.
    ///
    /// Default: Align
    pub fn op(mut self, op: AlignOp) -> Self {
        self.config.op = op;
        self
    }

    /// Sets the aligner preset.
    ///
    /// Default: Default
    pub fn mode(mut self, mode: AlignMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Sets the maximum number of aligner iterations.
    ///
    /// Default: 8
    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.config.max_iterations = iterations;
        self
    }

    /// Sets the time budget in seconds.
    ///
    /// Default: 0 (unlimited)
    pub fn max_secs(mut self, secs: u64) -> Self {
        self.config.max_secs = secs;
        self
    }

    /// Keeps or drops the input row order.
    ///
    /// Default: true
    pub fn stable_mode(mut self, stable: bool) -> Self {
        self.config.stable_mode = stable;
        self
    }

    /// Restricts Align/Refine to a column range.
    pub fn region(mut self, region: Region) -> Self {
        self.config.region = Some(region);
        self
    }

    /// Sets the profile for the profile operations.
    pub fn profile(mut self, profile: Msa) -> Self {
        self.config.profile = Some(profile);
        self
    }

    /// Sets the number of worker threads.
    ///
    /// Default: 0 (one per CPU)
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = threads;
        self
    }

    /// Sets the temporary directory for aligner files.
    ///
    /// Default: System temp directory
    pub fn temp_dir(mut self, path: PathBuf) -> Self {
        self.config.temp_dir = Some(path);
        self
    }

    /// Keep aligner input and output files for debugging.
    ///
    /// Default: false
    pub fn keep_intermediates(mut self, keep: bool) -> Self {
        self.config.keep_intermediates = keep;
        self
    }

    /// Uses this aligner executable instead of searching for one.
    pub fn binary(mut self, path: PathBuf) -> Self {
        self.config.binary = Some(path);
        self
    }

    /// Builds the final AlignConfig instance.
    pub fn build(self) -> Result<AlignConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Preset configurations for common use cases.
impl AlignConfig {
    /// Refine an existing alignment in place.
    pub fn refine() -> Self {
        AlignConfig {
            op: AlignOp::Refine,
            ..Default::default()
        }
    }

    /// Fast alignment for large inputs.
    ///
    /// - Two iterations only
    pub fn large() -> Self {
        AlignConfig {
            mode: AlignMode::Large,
            max_iterations: 2,
            ..Default::default()
        }
    }
}
