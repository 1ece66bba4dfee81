//! Line-aligned splitting of an input file into disjoint worker ranges.
//!
//! The file is first cut into `workers` ranges of nominal length `size / workers`.
//! Every internal boundary is then pushed forward to the byte right after the next
//! `\n`, so each worker starts on the first byte of a line and no line is split
//! between two workers. Only the bytes around each boundary are read.

use std::io::{self, BufRead, Seek, SeekFrom};

/// Half-open byte range `[start, end)` of the input assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `[0, file_size)` into `workers` contiguous, line-aligned chunks.
///
/// The returned chunks tile the whole input in order. Each boundary lands right
/// after a `\n` or at `file_size`, which acts as an implicit terminator for an
/// unterminated last line. When lines are longer than the nominal chunk length
/// some chunks come out empty.
pub fn plan<R: BufRead + Seek>(
    reader: &mut R,
    file_size: u64,
    workers: usize,
) -> io::Result<Vec<Chunk>> {
    if workers == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "worker count must be at least 1",
        ));
    }

    let nominal = file_size / workers as u64;
    let mut chunks = Vec::with_capacity(workers);
    let mut start = 0;
    let mut line = Vec::new();

    for k in 1..workers as u64 {
        let boundary = (k * nominal).max(start);
        let end = if boundary >= file_size {
            file_size
        } else {
            let scanned = line_remainder(reader, boundary, &mut line)?;
            (boundary + scanned).min(file_size)
        };
        chunks.push(Chunk::new(start, end));
        start = end;
    }
    chunks.push(Chunk::new(start, file_size));

    Ok(chunks)
}

/// Number of bytes from `offset` up to and including the next `\n`, or up to EOF.
fn line_remainder<R: BufRead + Seek>(
    reader: &mut R,
    offset: u64,
    buf: &mut Vec<u8>,
) -> io::Result<u64> {
    reader.seek(SeekFrom::Start(offset))?;
    buf.clear();
    let scanned = reader.read_until(b'\n', buf)?;
    Ok(scanned as u64)
}
