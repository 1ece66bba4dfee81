//! In-memory bitset over the whole IPv4 address space.
//!
//! Bit `a` records whether address `a` was observed. Bits are packed LSB-first into
//! `AtomicU64` words, so concurrent workers set bits with a single `fetch_or` and
//! never lose each other's updates even when they touch the same word.
//!
//! Words are grouped into pages of 2^16 addresses (8 KiB) that are allocated on
//! first write. A log that only touches a few networks costs a few pages; a log that
//! covers the whole space ends up with the full 512 MiB.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::address::{Address, ADDRESS_SPACE};

/// Address bits covered by a page.
const PAGE_SHIFT: u32 = 16;
const PAGE_COUNT: usize = 1 << (32 - PAGE_SHIFT);
const WORDS_PER_PAGE: usize = (1 << PAGE_SHIFT) / 64;
const BITS_PER_PAGE: u64 = 1 << PAGE_SHIFT;

type Page = Box<[AtomicU64]>;

pub struct MemoryBitset {
    pages: Box<[OnceLock<Page>]>,
}

impl MemoryBitset {
    pub fn new() -> Self {
        Self {
            pages: (0..PAGE_COUNT).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Set the bit of `address`. Returns `true` when it was not set before.
    #[inline]
    pub fn insert(&self, address: Address) -> bool {
        let page = self.pages[(address >> PAGE_SHIFT) as usize].get_or_init(new_page);
        let bit = address as usize & ((1 << PAGE_SHIFT) - 1);
        let mask = 1u64 << (bit % 64);
        page[bit / 64].fetch_or(mask, Ordering::Relaxed) & mask == 0
    }

    #[inline]
    pub fn contains(&self, address: Address) -> bool {
        let Some(page) = self.pages[(address >> PAGE_SHIFT) as usize].get() else {
            return false;
        };
        let bit = address as usize & ((1 << PAGE_SHIFT) - 1);
        page[bit / 64].load(Ordering::Relaxed) & (1u64 << (bit % 64)) != 0
    }

    /// Number of set bits with index in `range`, a sub-range of `[0, 2^32)`.
    pub fn count_range(&self, range: Range<u64>) -> u64 {
        let end = range.end.min(ADDRESS_SPACE);
        let mut count = 0;
        let mut bit = range.start;
        while bit < end {
            let page_idx = (bit >> PAGE_SHIFT) as usize;
            let page_start = (page_idx as u64) << PAGE_SHIFT;
            let page_end = (page_start + BITS_PER_PAGE).min(end);
            if let Some(page) = self.pages[page_idx].get() {
                count += count_page(page, bit - page_start, page_end - page_start);
            }
            bit = page_end;
        }
        count
    }

    /// Number of set bits over the whole address space.
    pub fn count(&self) -> u64 {
        self.count_range(0..ADDRESS_SPACE)
    }

    /// Number of pages that have been materialized.
    pub fn allocated_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.get().is_some()).count()
    }
}

impl Default for MemoryBitset {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBitset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBitset")
            .field("allocated_pages", &self.allocated_pages())
            .finish()
    }
}

fn new_page() -> Page {
    (0..WORDS_PER_PAGE).map(|_| AtomicU64::new(0)).collect()
}

/// Popcount of bits `[lo, hi)` of a page.
fn count_page(page: &[AtomicU64], lo: u64, hi: u64) -> u64 {
    let mut count = 0;
    let mut bit = lo;
    while bit < hi {
        let word = (bit / 64) as usize;
        let word_start = bit - bit % 64;
        let word_end = (word_start + 64).min(hi);
        let mask = bit_mask(bit - word_start, word_end - word_start);
        count += u64::from((page[word].load(Ordering::Relaxed) & mask).count_ones());
        bit = word_end;
    }
    count
}

/// Mask selecting bits `[lo, hi)` of a 64-bit word.
#[inline]
fn bit_mask(lo: u64, hi: u64) -> u64 {
    let width = hi - lo;
    if width == 64 {
        u64::MAX
    } else {
        ((1u64 << width) - 1) << lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::{split_range, ParallelReducer};
    use test_case::test_case;

    #[test]
    fn test_insert_and_contains() {
        let bitset = MemoryBitset::new();
        assert_eq!(bitset.count(), 0);
        assert_eq!(bitset.allocated_pages(), 0);

        assert!(bitset.insert(0x0101_0101));
        assert!(!bitset.insert(0x0101_0101));
        assert!(bitset.insert(0x0202_0202));
        assert!(bitset.insert(u32::MAX));
        assert!(bitset.insert(0));

        assert!(bitset.contains(0x0101_0101));
        assert!(!bitset.contains(0x0101_0102));
        assert!(!bitset.contains(0x7f00_0001));
        assert_eq!(bitset.count(), 4);
        assert_eq!(bitset.allocated_pages(), 4);
    }

    #[test_case(0..64 => 64)]
    #[test_case(0..1 => 1)]
    #[test_case(63..65 => 2)]
    #[test_case(3..131 => 128)]
    #[test_case(65_530..65_600 => 70; "across page boundary")]
    #[test_case(10..10 => 0)]
    #[test_case(0..ADDRESS_SPACE => 1624)]
    fn test_count_range_partial_words(range: Range<u64>) -> u64 {
        let bitset = MemoryBitset::new();
        for address in 0..1024 {
            bitset.insert(address);
        }
        for address in 65_000..65_600 {
            bitset.insert(address);
        }
        bitset.count_range(range)
    }

    #[test]
    fn test_sub_range_counts_sum_in_any_order() {
        let bitset = MemoryBitset::new();
        let mut address: u32 = 12345;
        for _ in 0..10_000 {
            address = address.wrapping_mul(2_654_435_761).wrapping_add(7);
            bitset.insert(address);
        }
        let total = bitset.count();

        let mut ranges = split_range(ADDRESS_SPACE, 7);
        let forward: u64 = ranges.iter().map(|r| bitset.count_range(r.clone())).sum();
        ranges.reverse();
        let backward: u64 = ranges.iter().map(|r| bitset.count_range(r.clone())).sum();
        assert_eq!(forward, total);
        assert_eq!(backward, total);
    }

    #[test]
    fn test_concurrent_inserts_into_shared_words() {
        let bitset = MemoryBitset::new();
        let reducer = ParallelReducer::new(8).unwrap();
        // Every worker sets interleaved bits of the same words.
        let workers: Vec<u32> = (0..8).collect();
        let fresh = reducer
            .map(&workers, |&w| {
                Ok((0..4096u32)
                    .filter(|i| i % 8 == w)
                    .filter(|&i| bitset.insert(i))
                    .count() as u64)
            })
            .unwrap();
        assert_eq!(fresh.iter().sum::<u64>(), 4096);
        assert_eq!(bitset.count(), 4096);
    }
}
