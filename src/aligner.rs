//! The external aligner and the MUSCLE subprocess implementation.
//!
//! An [`Aligner`] works on detached alignments only. The process
//! implementation writes FASTA files into a private temporary directory,
//! renames rows to index tags so the output can be mapped back, and polls
//! the child so that cancellation kills it promptly.

use crate::binary_finder::find_aligner;
use crate::config::{AlignConfig, AlignMode};
use crate::error::{ReconcileError, Result};
use crate::fasta;
use crate::msa::{Msa, MsaRow};
use crate::reconcile::reconcile_profile_merge;
use crate::status::OpStatus;
use log::{debug, info, warn};
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// How often a running aligner process is checked for exit or cancel.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tag prefix of rows from the alignment being aligned (or the master).
const INPUT_TAG: char = 'a';
/// Tag prefix of profile rows.
const PROFILE_TAG: char = 'b';

/// Result of an align or refine run.
#[derive(Debug, Clone)]
pub struct AlignerOutput {
    /// Aligned rows in aligner output order
    pub alignment: Msa,
    /// Input row index of every output row, in output order
    pub output_ids: Vec<usize>,
}

impl AlignerOutput {
    /// Output that keeps the input order.
    pub fn in_order(alignment: Msa) -> Self {
        let output_ids = (0..alignment.row_count()).collect();
        AlignerOutput {
            alignment,
            output_ids,
        }
    }
}

/// External multiple-alignment engine.
///
/// Implementations must be usable from worker threads. They should check
/// `status` while running and return [`ReconcileError::Cancelled`] once it
/// is cancelled. A timed out task waits for the aligner to return, so an
/// implementation that never checks `status` runs past `max_secs`.
pub trait Aligner: Send + Sync {
    /// Aligns the rows of `input` from scratch.
    fn align(&self, input: &Msa, config: &AlignConfig, status: &OpStatus) -> Result<AlignerOutput>;

    /// Improves an existing alignment.
    fn refine(&self, input: &Msa, config: &AlignConfig, status: &OpStatus) -> Result<AlignerOutput> {
        self.align(input, config, status)
    }

    /// Aligns two alignments against each other.
    ///
    /// The result holds the rows of `master` followed by the rows of
    /// `profile`, each in its original order.
    fn align_profiles(
        &self,
        master: &Msa,
        profile: &Msa,
        config: &AlignConfig,
        status: &OpStatus,
    ) -> Result<Msa>;

    /// Adds the rows of `sequences`, ignoring their gaps, to `msa`.
    ///
    /// Rows are added one at a time, each as a single-row profile. The
    /// result holds the rows of `msa` followed by the new rows.
    fn add_unaligned_to_profile(
        &self,
        msa: &Msa,
        sequences: &Msa,
        config: &AlignConfig,
        status: &OpStatus,
    ) -> Result<Msa> {
        let mut current = msa.clone();
        for row in sequences.rows() {
            status.check()?;
            let mut single = Msa::new(sequences.name.clone(), sequences.alphabet);
            single.push_row(MsaRow::new(row.id, row.name.clone(), row.ungapped().to_vec(), Vec::new()));
            let merged = self.align_profiles(&current, &single, config, status)?;
            current = reconcile_profile_merge(&current, &single, &merged)?;
        }
        Ok(current)
    }
}

/// MUSCLE 3.x run as a subprocess.
#[derive(Debug, Clone)]
pub struct ProcessAligner {
    binary: PathBuf,
}

impl ProcessAligner {
    /// Locates the aligner, honouring `config.binary`.
    pub fn new(config: &AlignConfig) -> Result<Self> {
        let binary = find_aligner(config.binary.as_deref())?;
        info!("Using aligner {}", binary.display());
        Ok(ProcessAligner { binary })
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        ProcessAligner {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn workspace(&self, config: &AlignConfig) -> Result<TempDir> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("msa_reconcile_");
            builder
        };
        let dir = match &config.temp_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.map_err(|e| ReconcileError::AlignerFailed(format!("Failed to create temp directory: {e}")))
    }

    fn release(dir: TempDir, config: &AlignConfig) {
        if config.keep_intermediates {
            let path = dir.into_path();
            info!("Keeping aligner files in {}", path.display());
        }
    }

    /// Common parameters of align and refine runs.
    fn tuning_args(config: &AlignConfig) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-quiet".into()];
        args.push("-maxiters".into());
        args.push(config.max_iterations.to_string().into());
        if config.max_secs > 0 {
            args.push("-maxhours".into());
            args.push(format!("{:.6}", config.max_secs as f64 / 3600.0).into());
        }
        if config.stable_mode {
            args.push("-stable".into());
        }
        if config.mode == AlignMode::Large {
            args.push("-diags".into());
        }
        args
    }

    fn execute(&self, args: &[OsString], dir: &Path, status: &OpStatus) -> Result<()> {
        status.check()?;
        let log_path = dir.join("aligner.log");
        let log_file = File::create(&log_path)?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file));
        debug!("Executing: {cmd:?}");

        let mut child = cmd.spawn().map_err(|e| {
            ReconcileError::AlignerFailed(format!("Failed to run {}: {e}", self.binary.display()))
        })?;

        loop {
            if let Some(exit) = child.try_wait()? {
                if exit.success() {
                    return Ok(());
                }
                let log = std::fs::read_to_string(&log_path).unwrap_or_default();
                return Err(ReconcileError::AlignerFailed(format!(
                    "{} exited with {exit}: {}",
                    self.binary.display(),
                    log.trim()
                )));
            }
            if status.is_cancelled() {
                warn!("Cancelling aligner process {}", child.id());
                let _ = child.kill();
                let _ = child.wait();
                return Err(ReconcileError::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn run_align(
        &self,
        input: &Msa,
        config: &AlignConfig,
        status: &OpStatus,
        refine: bool,
    ) -> Result<AlignerOutput> {
        let n = input.row_count();
        let rows = if refine {
            input.aligned_rows()
        } else {
            input.rows().iter().map(|r| r.ungapped().to_vec()).collect()
        };
        // The aligner rejects empty sequences, they are added back afterwards
        let alignable: Vec<usize> = (0..n)
            .filter(|&i| !input.rows()[i].ungapped().is_empty())
            .collect();
        if alignable.len() < 2 {
            debug!("Nothing to align in '{}' ({} rows)", input.name, alignable.len());
            let unchanged = rebuild(input, rows.into_iter().enumerate());
            return Ok(AlignerOutput::in_order(unchanged));
        }

        let dir = self.workspace(config)?;
        let in_path = dir.path().join("input.fa");
        let out_path = dir.path().join("output.fa");
        let tags: Vec<String> = alignable.iter().map(|&i| tag(INPUT_TAG, i)).collect();
        fasta::write_records(
            File::create(&in_path)?,
            alignable.iter().zip(&tags).map(|(&i, t)| (t.as_str(), rows[i].as_slice())),
        )?;

        let mut args: Vec<OsString> = vec![
            "-in".into(),
            in_path.into(),
            "-out".into(),
            out_path.clone().into(),
        ];
        if refine {
            args.push("-refine".into());
        }
        args.extend(Self::tuning_args(config));
        self.execute(&args, dir.path(), status)?;

        let mut records = read_tagged(&out_path, n)?;
        if records.len() != alignable.len() {
            return Err(ReconcileError::UnexpectedRowCount {
                expected: alignable.len(),
                actual: records.len(),
            });
        }
        Self::release(dir, config);

        let mut present = vec![false; n];
        for (i, _) in &records {
            present[*i] = true;
        }
        records.extend((0..n).filter(|&i| !present[i]).map(|i| (i, Vec::new())));
        if config.stable_mode {
            records.sort_by_key(|(i, _)| *i);
        }

        let output_ids = records.iter().map(|(i, _)| *i).collect();
        Ok(AlignerOutput {
            alignment: rebuild(input, records.into_iter()),
            output_ids,
        })
    }
}

fn tag(prefix: char, index: usize) -> String {
    format!("{prefix}{index}")
}

fn parse_tag(name: &str) -> Option<(char, usize)> {
    let mut chars = name.chars();
    let prefix = chars.next()?;
    let index = chars.as_str().parse().ok()?;
    Some((prefix, index))
}

/// Reads input-tagged records, rejecting unknown or repeated tags.
fn read_tagged(path: &Path, rows: usize) -> Result<Vec<(usize, Vec<u8>)>> {
    let mut seen = vec![false; rows];
    fasta::read_records(File::open(path)?)?
        .into_iter()
        .map(|(name, seq)| match parse_tag(&name) {
            Some((INPUT_TAG, i)) if i < rows && !seen[i] => {
                seen[i] = true;
                Ok((i, seq))
            }
            _ => Err(ReconcileError::AlignerFailed(format!(
                "unexpected row '{name}' in aligner output"
            ))),
        })
        .collect()
}

/// Builds an alignment from `(input index, aligned bytes)` in the given order.
fn rebuild(input: &Msa, rows: impl Iterator<Item = (usize, Vec<u8>)>) -> Msa {
    let mut msa = Msa::new(input.name.clone(), input.alphabet);
    for (i, aligned) in rows {
        let source = &input.rows()[i];
        msa.push_row(MsaRow::from_aligned(source.id, source.name.clone(), &aligned));
    }
    msa
}

impl Aligner for ProcessAligner {
    fn align(&self, input: &Msa, config: &AlignConfig, status: &OpStatus) -> Result<AlignerOutput> {
        self.run_align(input, config, status, false)
    }

    fn refine(&self, input: &Msa, config: &AlignConfig, status: &OpStatus) -> Result<AlignerOutput> {
        self.run_align(input, config, status, true)
    }

    fn align_profiles(
        &self,
        master: &Msa,
        profile: &Msa,
        config: &AlignConfig,
        status: &OpStatus,
    ) -> Result<Msa> {
        if profile.is_empty() || master.is_empty() {
            let mut merged = master.clone();
            for row in profile.rows() {
                merged.push_row(row.clone());
            }
            return Ok(merged);
        }

        let dir = self.workspace(config)?;
        let in1 = dir.path().join("master.fa");
        let in2 = dir.path().join("profile.fa");
        let out_path = dir.path().join("output.fa");
        for (path, msa, prefix) in [(&in1, master, INPUT_TAG), (&in2, profile, PROFILE_TAG)] {
            let rows = msa.aligned_rows();
            let tags: Vec<String> = (0..rows.len()).map(|i| tag(prefix, i)).collect();
            fasta::write_records(
                File::create(path)?,
                tags.iter().map(String::as_str).zip(rows.iter().map(Vec::as_slice)),
            )?;
        }

        let args: Vec<OsString> = vec![
            "-profile".into(),
            "-in1".into(),
            in1.into(),
            "-in2".into(),
            in2.into(),
            "-out".into(),
            out_path.clone().into(),
            "-quiet".into(),
        ];
        self.execute(&args, dir.path(), status)?;

        let records = fasta::read_records(File::open(&out_path)?)?;
        Self::release(dir, config);

        let expected = master.row_count() + profile.row_count();
        if records.len() != expected {
            return Err(ReconcileError::ProfileMergeFailed {
                expected,
                actual: records.len(),
            });
        }
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; expected];
        for (name, seq) in records {
            let slot = match parse_tag(&name) {
                Some((INPUT_TAG, i)) if i < master.row_count() => i,
                Some((PROFILE_TAG, i)) if i < profile.row_count() => master.row_count() + i,
                _ => {
                    return Err(ReconcileError::AlignerFailed(format!(
                        "unexpected row '{name}' in aligner output"
                    )))
                }
            };
            slots[slot] = Some(seq);
        }

        let mut merged = Msa::new(master.name.clone(), master.alphabet.common(profile.alphabet));
        for (source, slot) in master.rows().iter().chain(profile.rows()).zip(slots) {
            let aligned = slot.ok_or(ReconcileError::ProfileMergeFailed {
                expected,
                actual: expected - 1,
            })?;
            merged.push_row(MsaRow::from_aligned(source.id, source.name.clone(), &aligned));
        }
        Ok(merged)
    }
}
