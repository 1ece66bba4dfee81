//! Input log access. Every worker opens its own handle and reads only its chunk.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::address::{self, Address};
use crate::chunk::{self, Chunk};
use crate::config::MalformedPolicy;
use crate::error::{Error, Result};

/// Read buffer used by fill workers.
const READ_BUFFER_SIZE: usize = 1 << 20;

/// Line oriented input file of dotted-quad addresses.
#[derive(Debug, Clone)]
pub struct InputFile {
    path: PathBuf,
    size: u64,
}

/// Line accounting for one scanned chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    /// Lines read, malformed ones included.
    pub lines: u64,
    /// Lines skipped because they did not decode to an address.
    pub malformed: u64,
}

impl ScanStats {
    pub fn merge(&mut self, rhs: &ScanStats) {
        self.lines += rhs.lines;
        self.malformed += rhs.malformed;
    }
}

impl InputFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = std::fs::metadata(&path)?.len();
        Ok(Self { path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Split the file into `workers` line-aligned chunks.
    pub fn plan(&self, workers: usize) -> Result<Vec<Chunk>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        Ok(chunk::plan(&mut reader, self.size, workers)?)
    }

    /// Read every line of `chunk` and pass its address to `on_address`.
    ///
    /// Lines that fail to parse abort the scan under [`MalformedPolicy::Fail`] and are
    /// counted in [`ScanStats::malformed`] under [`MalformedPolicy::Skip`].
    pub fn scan<F>(
        &self,
        chunk: Chunk,
        policy: MalformedPolicy,
        mut on_address: F,
    ) -> Result<ScanStats>
    where
        F: FnMut(Address) -> Result<()>,
    {
        let mut stats = ScanStats::default();
        if chunk.is_empty() {
            return Ok(stats);
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(chunk.start))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut offset = chunk.start;
        let mut line = Vec::with_capacity(32);
        while offset < chunk.end {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }
            let line_offset = offset;
            offset += read as u64;
            stats.lines += 1;

            match address::parse(&line) {
                Ok(address) => on_address(address)?,
                Err(source) => match policy {
                    MalformedPolicy::Fail => {
                        return Err(Error::Format {
                            offset: line_offset,
                            source,
                        })
                    }
                    MalformedPolicy::Skip => {
                        if stats.malformed == 0 {
                            warn!(offset = line_offset, error = %source, "skipping malformed line");
                        }
                        stats.malformed += 1;
                    }
                },
            }
        }

        debug!(
            start = chunk.start,
            end = chunk.end,
            lines = stats.lines,
            malformed = stats.malformed,
            "scanned chunk"
        );
        Ok(stats)
    }
}
