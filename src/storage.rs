//! Run log writer.
//!
//! The run log is the durable record of an experiment: an append-only CSV
//! created at run start with the metadata block and a header row, then one
//! line per sample record. Rows are flushed as they are written so a fault
//! or power loss never leaves a partial row behind.

use crate::error::RigResult;
use crate::metadata::RunMetadata;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct RunLog {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl RunLog {
    /// Create `<dir>/<sample>_<procedure>_<YYYYmmdd_HHMMSS>.csv`, write the
    /// metadata block and the column header, and leave the writer positioned
    /// for data rows.
    pub fn create(
        dir: &Path,
        metadata: &RunMetadata,
        columns: &[&str],
    ) -> RigResult<Self> {
        std::fs::create_dir_all(dir)?;

        let stamp = metadata.started.format("%Y%m%d_%H%M%S");
        let path = dir.join(format!(
            "{}_{}_{stamp}.csv",
            metadata.sample, metadata.procedure
        ));

        let mut file = File::create(&path)?;
        for line in metadata.header_lines() {
            writeln!(file, "{line}")?;
        }

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(columns)?;
        writer.flush()?;

        tracing::info!(path = %path.display(), "run log created");
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    /// Append one data row and flush it to disk.
    pub fn append(&mut self, cells: &[String]) -> RigResult<()> {
        self.writer.write_record(cells)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Number of data rows written (excludes metadata and header lines).
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
