//! ## Disk-backed bitset
//! Bitmap file of exactly 2^29 bytes, one bit per IPv4 address. The bit of address `a`
//! is bit `a % 8` (LSB-first) of byte `a / 8`. The file is kept after the run, so
//! re-running over the same log finds every address already set.
//!
//! A run never writes the bitmap in place. Workers fill a staging copy next to it
//! (`<bitmap>.staging`) that [`DiskBitset::commit`] renames over the bitmap once every
//! fill succeeded, or that [`DiskBitset::discard`] removes after a failure. A failed run
//! leaves the bitmap exactly as it found it.
//!
//! Workers open their own handles. Updates are buffered per worker, sorted, and applied
//! one block at a time as a read-modify-write under a striped lock, so two workers never
//! interleave on the same block even though their addresses are unrelated.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::address::{Address, ADDRESS_SPACE};
use crate::error::{config_err, Result};

/// Size of the bitmap file.
pub const BITMAP_LEN: u64 = ADDRESS_SPACE / 8;
/// Unit of read-modify-write, in bytes.
const BLOCK_LEN: usize = 4096;
/// Address bits covered by one block.
const BLOCK_SHIFT: u32 = 15;
/// Number of block locks. Blocks map onto them round-robin.
const LOCK_STRIPES: usize = 1024;
/// Addresses buffered per worker before being written out.
const BATCH_LEN: usize = 1 << 18;
/// Read size used while counting.
const COUNT_BUFFER_LEN: usize = 1 << 20;

pub struct DiskBitset {
    path: PathBuf,
    staging: PathBuf,
    stripes: Box<[Mutex<()>]>,
}

impl DiskBitset {
    /// Open the bitmap at `path` and prepare the staging copy writers fill.
    ///
    /// The staging copy starts from the existing bitmap, or zero-filled when the bitmap
    /// is missing or `reset` is set. A bitmap of the wrong size is rejected rather than
    /// reinterpreted. `path` itself is only replaced by [`DiskBitset::commit`].
    pub fn open(path: impl AsRef<Path>, reset: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let staging = staging_path(&path);
        let existing = match std::fs::metadata(&path) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match existing {
            Some(BITMAP_LEN) if !reset => {
                warn!(path = %path.display(), "resuming from existing bitmap");
                std::fs::copy(&path, &staging)?;
            }
            Some(len) if !reset => {
                return Err(config_err!(
                    "bitmap {} has {len} bytes, expected {BITMAP_LEN}",
                    path.display()
                ));
            }
            _ => {
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&staging)?;
                file.set_len(BITMAP_LEN)?;
                file.sync_all()?;
                info!(path = %path.display(), len = BITMAP_LEN, "created empty bitmap");
            }
        }

        Ok(Self {
            path,
            staging,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    /// Replace the bitmap with the staging copy. Call once, after every writer finished.
    pub fn commit(&self) -> Result<()> {
        std::fs::rename(&self.staging, &self.path)?;
        info!(path = %self.path.display(), "committed bitmap");
        Ok(())
    }

    /// Drop the staging copy, leaving the bitmap untouched.
    pub fn discard(&self) -> Result<()> {
        match std::fs::remove_file(&self.staging) {
            Ok(()) => {
                warn!(path = %self.path.display(), "discarded staged bitmap changes");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a private handle on the staging copy that batches address updates.
    pub fn writer(&self) -> Result<DiskWriter<'_>> {
        let file = OpenOptions::new().read(true).write(true).open(&self.staging)?;
        Ok(DiskWriter {
            bitset: self,
            file,
            pending: Vec::with_capacity(BATCH_LEN),
            block: vec![0u8; BLOCK_LEN],
            newly_set: 0,
        })
    }

    /// Number of set bits with index in `range`, a sub-range of `[0, 2^32)`, in the
    /// committed bitmap.
    pub fn count_range(&self, range: Range<u64>) -> Result<u64> {
        let end = range.end.min(ADDRESS_SPACE);
        if range.start >= end {
            return Ok(0);
        }

        let first_byte = range.start / 8;
        let last_byte = (end - 1) / 8;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(first_byte))?;

        let mut buf = vec![0u8; COUNT_BUFFER_LEN];
        let mut count = 0;
        let mut byte = first_byte;
        while byte <= last_byte {
            let len = (last_byte - byte + 1).min(COUNT_BUFFER_LEN as u64) as usize;
            file.read_exact(&mut buf[..len])?;
            for (i, &value) in buf[..len].iter().enumerate() {
                let byte_idx = byte + i as u64;
                let lo = range.start.saturating_sub(byte_idx * 8).min(8);
                let hi = (end - byte_idx * 8).min(8);
                count += u64::from((value & byte_mask(lo, hi)).count_ones());
            }
            byte += len as u64;
        }
        Ok(count)
    }

    /// Number of set bits over the whole address space.
    pub fn count(&self) -> Result<u64> {
        self.count_range(0..ADDRESS_SPACE)
    }

    fn stripe(&self, block: u64) -> &Mutex<()> {
        &self.stripes[block as usize % LOCK_STRIPES]
    }
}

impl std::fmt::Debug for DiskBitset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBitset")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Per-worker write handle of a [`DiskBitset`].
///
/// Buffered addresses are only guaranteed on disk after [`DiskWriter::finish`].
pub struct DiskWriter<'a> {
    bitset: &'a DiskBitset,
    file: File,
    pending: Vec<Address>,
    block: Vec<u8>,
    newly_set: u64,
}

impl DiskWriter<'_> {
    pub fn insert(&mut self, address: Address) -> Result<()> {
        self.pending.push(address);
        if self.pending.len() >= BATCH_LEN {
            self.flush()?;
        }
        Ok(())
    }

    /// Write out pending addresses and sync the file. Returns how many bits this
    /// writer set that were not set before.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        self.file.sync_data()?;
        Ok(self.newly_set)
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_unstable();
        pending.dedup();

        for group in pending.chunk_by(|a, b| a >> BLOCK_SHIFT == b >> BLOCK_SHIFT) {
            self.apply_block(group)?;
        }

        pending.clear();
        self.pending = pending;
        Ok(())
    }

    /// Read-modify-write of the block holding `addresses`, all in the same block.
    fn apply_block(&mut self, addresses: &[Address]) -> Result<()> {
        let block = u64::from(addresses[0] >> BLOCK_SHIFT);
        let offset = block * BLOCK_LEN as u64;

        let _guard = self.bitset.stripe(block).lock();
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut self.block)?;

        let mut changed = 0;
        for &address in addresses {
            let byte = (address as usize >> 3) & (BLOCK_LEN - 1);
            let mask = 1u8 << (address & 7);
            if self.block[byte] & mask == 0 {
                self.block[byte] |= mask;
                changed += 1;
            }
        }

        if changed > 0 {
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(&self.block)?;
            self.newly_set += changed;
        }
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".staging");
    PathBuf::from(name)
}

/// Mask selecting bits `[lo, hi)` of a byte.
#[inline]
fn byte_mask(lo: u64, hi: u64) -> u8 {
    if lo >= hi {
        return 0;
    }
    let bits = (1u16 << hi) - (1u16 << lo);
    bits as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::{split_range, ParallelReducer};
    use test_case::test_case;

    #[test_case(0, 8 => 0xff)]
    #[test_case(0, 1 => 0x01)]
    #[test_case(3, 5 => 0x18)]
    #[test_case(7, 8 => 0x80)]
    #[test_case(4, 4 => 0x00)]
    fn test_byte_mask(lo: u64, hi: u64) -> u8 {
        byte_mask(lo, hi)
    }

    #[test]
    fn test_create_write_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitmap.bin");
        let bitset = DiskBitset::open(&path, false).unwrap();

        let mut writer = bitset.writer().unwrap();
        for address in [0x0101_0101, 0x0101_0101, 0x0202_0202, 0, u32::MAX, 9] {
            writer.insert(address).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 5);
        assert!(!path.exists());

        bitset.commit().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), BITMAP_LEN);
        assert!(!staging_path(&path).exists());

        assert_eq!(bitset.count().unwrap(), 5);
        assert_eq!(bitset.count_range(0..10).unwrap(), 2);
        assert_eq!(bitset.count_range(1..9).unwrap(), 0);
        assert_eq!(bitset.count_range(9..10).unwrap(), 1);
        assert_eq!(bitset.count_range(0x0101_0101..0x0202_0203).unwrap(), 2);

        let mut ranges = split_range(ADDRESS_SPACE, 3);
        ranges.reverse();
        let total: u64 = ranges.into_iter().map(|r| bitset.count_range(r).unwrap()).sum();
        assert_eq!(total, 5);
    }

    fn write_and_commit(path: &Path, reset: bool, addresses: &[Address]) -> u64 {
        let bitset = DiskBitset::open(path, reset).unwrap();
        let mut writer = bitset.writer().unwrap();
        for &address in addresses {
            writer.insert(address).unwrap();
        }
        let fresh = writer.finish().unwrap();
        bitset.commit().unwrap();
        fresh
    }

    #[test]
    fn test_reopen_resumes_and_reset_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitmap.bin");
        assert_eq!(write_and_commit(&path, false, &[0x0a00_0001]), 1);
        assert_eq!(write_and_commit(&path, false, &[0x0a00_0001, 0x0a00_0002]), 1);

        let bitset = DiskBitset::open(&path, false).unwrap();
        assert_eq!(bitset.count_range(0x0a00_0000..0x0a00_0100).unwrap(), 2);
        bitset.discard().unwrap();

        assert_eq!(write_and_commit(&path, true, &[0x0a00_0003]), 1);
        assert_eq!(bitset.count_range(0x0a00_0000..0x0a00_0100).unwrap(), 1);
    }

    #[test_case(false; "resumed bitmap")]
    #[test_case(true; "reset bitmap")]
    fn test_discard_keeps_committed_bitmap(reset: bool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitmap.bin");
        write_and_commit(&path, false, &[1, 2, 3]);

        let bitset = DiskBitset::open(&path, reset).unwrap();
        let mut writer = bitset.writer().unwrap();
        for address in 100..200 {
            writer.insert(address).unwrap();
        }
        writer.finish().unwrap();
        bitset.discard().unwrap();
        bitset.discard().unwrap();

        assert!(!staging_path(&path).exists());
        assert_eq!(bitset.count().unwrap(), 3);
        assert_eq!(bitset.count_range(100..200).unwrap(), 0);
    }

    #[test]
    fn test_discard_before_first_commit_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitmap.bin");
        let bitset = DiskBitset::open(&path, false).unwrap();
        let mut writer = bitset.writer().unwrap();
        writer.insert(7).unwrap();
        writer.finish().unwrap();
        bitset.discard().unwrap();
        assert!(!path.exists());
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn test_rejects_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitmap.bin");
        std::fs::write(&path, b"not a bitmap").unwrap();
        assert!(DiskBitset::open(&path, false).is_err());
        DiskBitset::open(&path, true).unwrap().commit().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), BITMAP_LEN);
    }

    #[test]
    fn test_concurrent_writers_share_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let bitset = DiskBitset::open(dir.path().join("bitmap.bin"), false).unwrap();
        let reducer = ParallelReducer::new(4).unwrap();
        // All workers land in the same few blocks.
        let workers: Vec<u32> = (0..4).collect();
        let fresh = reducer
            .map(&workers, |&w| {
                let mut writer = bitset.writer()?;
                for i in (0..100_000u32).filter(|i| i % 4 == w) {
                    writer.insert(i)?;
                }
                writer.finish()
            })
            .unwrap();
        assert_eq!(fresh.iter().sum::<u64>(), 100_000);
        bitset.commit().unwrap();
        assert_eq!(bitset.count_range(0..200_000).unwrap(), 100_000);
    }
}
