//! Aligned FASTA exchanged with the external aligner.

use crate::error::{ReconcileError, Result};
use crate::msa::Msa;
use bio::io::fasta;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Reads every record as `(id, aligned bytes)`.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<(String, Vec<u8>)>> {
    let mut records = Vec::new();
    for record in fasta::Reader::new(reader).records() {
        let record = record.map_err(|e| ReconcileError::FastaParse(e.to_string()))?;
        if record.id().is_empty() {
            return Err(ReconcileError::FastaParse(format!(
                "record {} has no name",
                records.len() + 1
            )));
        }
        records.push((record.id().to_string(), record.seq().to_vec()));
    }
    Ok(records)
}

/// Writes `(id, aligned bytes)` records.
pub fn write_records<'a, W, I>(writer: W, records: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut writer = fasta::Writer::new(writer);
    for (id, seq) in records {
        writer.write(id, None, seq)?;
    }
    writer.flush()?;
    Ok(())
}

/// Loads an aligned FASTA file as a new alignment with fresh row ids.
pub fn read_msa(path: &Path) -> Result<Msa> {
    if !path.exists() {
        return Err(ReconcileError::FileNotFound(path.to_path_buf()));
    }
    let records = read_records(File::open(path)?)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(Msa::from_aligned(&name, records))
}

/// Writes the alignment with rows padded to the alignment length.
pub fn write_msa(msa: &Msa, path: &Path) -> Result<()> {
    let rows = msa.aligned_rows();
    let file = File::create(path)?;
    write_records(
        file,
        msa.rows()
            .iter()
            .zip(&rows)
            .map(|(row, aligned)| (row.name.as_str(), aligned.as_slice())),
    )
}
