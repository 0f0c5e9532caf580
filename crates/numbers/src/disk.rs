// Disk I/O in 1 MiB units over one temporary file.
//
// The file lives as long as its `DiskFile` guard: dropping the guard on any
// path out of the pipeline, including an interrupted run, removes it. Every
// operation opens and closes the file itself, and any I/O error is returned
// to the caller unchanged.

use crate::probe::MIB;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::TempPath;

const FILE_PREFIX: &str = "deleteme";

#[derive(Debug)]
pub struct DiskFile {
    path: TempPath,
}

impl DiskFile {
    /// Reserves a fresh file name in `dir`; the file is removed on drop.
    pub fn create_in(dir: &Path) -> io::Result<Self> {
        let path = tempfile::Builder::new()
            .prefix(FILE_PREFIX)
            .tempfile_in(dir)?
            .into_temp_path();
        log::debug!("disk benchmark file: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the file on disk.
    pub fn size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Whole 1 MiB blocks in the file, the per-block denominator.
    pub fn blocks(&self) -> io::Result<u64> {
        Ok(self.size()? / MIB as u64)
    }

    /// Open, write all of `payload`, close.
    pub fn write_payload(&self, payload: &[u8]) -> io::Result<usize> {
        let mut file = File::create(&self.path)?;
        file.write_all(payload)?;
        file.flush()?;
        Ok(payload.len())
    }

    /// Open, seek to every 1 MiB boundary in order, close. Nothing is read.
    pub fn seek_blocks(&self) -> io::Result<u64> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();

        let mut position = 0;
        for offset in (0..len).step_by(MIB) {
            position = file.seek(SeekFrom::Start(offset))?;
        }
        Ok(position)
    }

    /// Open, read the file front to back in 1 MiB blocks, close.
    ///
    /// Returns the first byte of the last block read.
    pub fn read_blocks(&self) -> io::Result<u8> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        let mut block = vec![0u8; MIB];

        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(MIB as u64) as usize;
            file.read_exact(&mut block[..n])?;
            remaining -= n as u64;
        }
        Ok(block[0])
    }
}
