//! Pools, pages, and the mark bitmap addressing scheme (spec.md §3.3, §4.2).
//!
//! A [`Pool`] is an aligned OS allocation (`memmap2::MmapMut`, matching the
//! teacher crate's `SpaceBitmap`/`Mmap` use of `memmap2`), subdivided into
//! equal-sized [`Page`]s. Pools are never returned to the OS; pages are
//! recycled onto free/used lists by [`crate::heap::Heap`].
use std::ptr::null_mut;

use memmap2::MmapMut;

use crate::config::GcConfig;
use crate::header::HeapObjectHeader;

/// Two mark bits per slot: white (unreached), gray (reached, children not
/// yet scanned), black (reached, children scanned). `3` ("black+gray") is a
/// transient state used while a gray object is being grayed-then-blackened
/// without an intervening bitmap re-read; see [`mark`](crate::mark).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarkColor {
    White = 0,
    Gray = 1,
    Black = 2,
    BlackGray = 3,
}

impl MarkColor {
    fn from_bits(bits: u8) -> MarkColor {
        match bits & 0b11 {
            0 => MarkColor::White,
            1 => MarkColor::Gray,
            2 => MarkColor::Black,
            _ => MarkColor::BlackGray,
        }
    }
}

/// Page header prepended to the mark bitmap and slot array within a page's
/// mmap'd region. Lives on one of three lists inside [`crate::heap::Heap`]:
/// free, non-full used (head), full used (tail) — pages migrate between
/// these under the heap mutex (spec.md §4.1).
pub struct Page {
    pub(crate) next: *mut Page,
    /// Slots currently bump-allocated (not necessarily all still live; a
    /// slot stays "allocated" until the page is swept/evacuated).
    pub(crate) num_allocated: std::sync::atomic::AtomicU32,
    pub(crate) num_slots: u32,
    pub(crate) bump_offset: std::sync::atomic::AtomicU32,
    /// Set once this page has already been evacuated in the current cycle,
    /// so a second pass (e.g. pointer fixup revisiting the free list) does
    /// not double-process it.
    pub(crate) already_evacuated: bool,
    bitmap_offset: usize,
    slots_offset: usize,
    slot_size: usize,
}

impl Page {
    /// Bytes of page header + bitmap before the slot array starts, for a
    /// page holding `num_slots` slots of `slot_size` bytes.
    fn layout(num_slots: usize) -> (usize, usize) {
        let header_size = std::mem::size_of::<Page>();
        let bitmap_bytes = (num_slots * 2 + 7) / 8; // 2 bits/slot
        let bitmap_offset = header_size;
        let slots_offset = round_up(bitmap_offset + bitmap_bytes, 32);
        (bitmap_offset, slots_offset)
    }

    /// Initializes a fresh page in-place at the start of `mem`, which must be
    /// exactly `cfg.page_size()` bytes and page-aligned.
    ///
    /// # Safety
    /// `mem` must be writable for `cfg.page_size()` bytes and not aliased.
    unsafe fn init_in(mem: *mut u8, cfg: &GcConfig) -> *mut Page {
        let slot_size = cfg.slot_size();
        let page_size = cfg.page_size();
        let header_size = round_up(std::mem::size_of::<Page>(), slot_size);
        // Solve num_slots s.t. slots_offset(num_slots) + num_slots*slot_size <= page_size.
        let mut num_slots = (page_size - header_size) / slot_size;
        loop {
            let (_, slots_offset) = Self::layout(num_slots);
            if slots_offset + num_slots * slot_size <= page_size {
                break;
            }
            num_slots -= 1;
        }
        let (bitmap_offset, slots_offset) = Self::layout(num_slots);

        let page = mem as *mut Page;
        page.write(Page {
            next: null_mut(),
            num_allocated: std::sync::atomic::AtomicU32::new(0),
            num_slots: num_slots as u32,
            bump_offset: std::sync::atomic::AtomicU32::new(0),
            already_evacuated: false,
            bitmap_offset,
            slots_offset,
            slot_size,
        });
        // Zero the bitmap: every slot starts white.
        let bitmap_bytes = slots_offset - bitmap_offset;
        std::ptr::write_bytes(mem.add(bitmap_offset), 0, bitmap_bytes);
        page
    }

    #[inline]
    pub fn base(&self) -> *const u8 {
        self as *const Page as *const u8
    }

    #[inline]
    pub fn num_slots(&self) -> usize {
        self.num_slots as usize
    }

    #[inline]
    pub fn num_allocated(&self) -> usize {
        self.num_allocated.load(std::sync::atomic::Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.num_allocated() >= self.num_slots()
    }

    #[inline]
    pub fn used_size(&self, header_size: usize) -> usize {
        header_size + self.num_allocated() * self.slot_size
    }

    /// Bump-allocates `nslots` contiguous slots from this page's fast-path
    /// cursor, without locking. Returns the slot's object header, or `None`
    /// if the page doesn't have room.
    #[inline]
    pub fn bump_alloc(&self, nslots: u32) -> Option<*mut HeapObjectHeader> {
        loop {
            let cur = self.bump_offset.load(std::sync::atomic::Ordering::Relaxed);
            let next = cur.checked_add(nslots)?;
            if next > self.num_slots {
                return None;
            }
            if self
                .bump_offset
                .compare_exchange_weak(
                    cur,
                    next,
                    std::sync::atomic::Ordering::AcqRel,
                    std::sync::atomic::Ordering::Relaxed,
                )
                .is_ok()
            {
                self.num_allocated
                    .fetch_add(nslots, std::sync::atomic::Ordering::Relaxed);
                let slot_addr = unsafe { self.slot_ptr(cur as usize) };
                return Some(slot_addr as *mut HeapObjectHeader);
            }
        }
    }

    /// Address of slot `index` within this page.
    #[inline]
    pub unsafe fn slot_ptr(&self, index: usize) -> *mut u8 {
        (self.base() as usize + self.slots_offset + index * self.slot_size) as *mut u8
    }

    #[inline]
    pub fn slots_offset(&self) -> usize {
        self.slots_offset
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Computes the slot index of a header address within this page
    /// (spec.md §4.2).
    #[inline]
    pub fn slot_index_of(&self, obj: *const u8) -> usize {
        let offset = obj as usize - self.base() as usize - self.slots_offset;
        offset / self.slot_size
    }

    #[inline]
    fn bitmap_byte(&self, slot_index: usize) -> &std::sync::atomic::AtomicU8 {
        // Four slots share a byte (2 bits each), so concurrent markers
        // touching neighboring slots must go through an atomic RMW on the
        // shared byte, not a plain load/store, or one thread's update can be
        // clobbered by another's read-modify-write of the same byte
        // (spec.md §4.4 runs marking across multiple helper threads at
        // once). Casting a byte of the mmap'd bitmap region to `&AtomicU8`
        // is the standard way to get atomic access over memory nothing else
        // accesses non-atomically once marking starts.
        let ptr = (self.base() as usize + self.bitmap_offset + slot_index / 4) as *const std::sync::atomic::AtomicU8;
        unsafe { &*ptr }
    }

    pub fn mark_color(&self, slot_index: usize) -> MarkColor {
        let byte = self.bitmap_byte(slot_index).load(std::sync::atomic::Ordering::Acquire);
        let shift = (slot_index % 4) * 2;
        MarkColor::from_bits(byte >> shift)
    }

    pub fn set_mark_color(&self, slot_index: usize, color: MarkColor) {
        let byte = self.bitmap_byte(slot_index);
        let shift = (slot_index % 4) * 2;
        let mask = !(0b11u8 << shift);
        let mut old = byte.load(std::sync::atomic::Ordering::Relaxed);
        loop {
            let new = (old & mask) | ((color as u8) << shift);
            match byte.compare_exchange_weak(
                old,
                new,
                std::sync::atomic::Ordering::AcqRel,
                std::sync::atomic::Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => old = actual,
            }
        }
    }

    /// Atomically transitions slot `slot_index` from `from` to `to`, failing
    /// (returning `false`, leaving the bit untouched) if another thread has
    /// already moved it away from `from`. This is the primitive the mark
    /// engine needs for spec.md §4.4's "an object already non-white is not
    /// re-queued": two helper threads racing to gray or blacken the same
    /// slot must have exactly one of them win and enqueue it.
    pub fn try_transition_mark_color(&self, slot_index: usize, from: MarkColor, to: MarkColor) -> bool {
        let byte = self.bitmap_byte(slot_index);
        let shift = (slot_index % 4) * 2;
        let mask = !(0b11u8 << shift);
        let mut old = byte.load(std::sync::atomic::Ordering::Relaxed);
        loop {
            if MarkColor::from_bits(old >> shift) != from {
                return false;
            }
            let new = (old & mask) | ((to as u8) << shift);
            match byte.compare_exchange_weak(
                old,
                new,
                std::sync::atomic::Ordering::AcqRel,
                std::sync::atomic::Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => old = actual,
            }
        }
    }

    /// Zeroes every mark bit: called once at the start of a cycle, matching
    /// spec.md §4.4 "at cycle start, all bits are zeroed". Only called
    /// during the stop-the-world INIT phase before any marker has started,
    /// so a plain byte-wise store (rather than per-byte atomics) is safe.
    pub fn clear_marks(&self) {
        unsafe {
            let bitmap_bytes = self.slots_offset - self.bitmap_offset;
            std::ptr::write_bytes((self.base() as usize + self.bitmap_offset) as *mut u8, 0, bitmap_bytes);
        }
    }

    pub fn reset_bump_cursor(&self) {
        self.num_allocated.store(0, std::sync::atomic::Ordering::Relaxed);
        self.bump_offset.store(0, std::sync::atomic::Ordering::Relaxed);
    }
}

#[inline]
pub const fn round_up(x: usize, n: usize) -> usize {
    (x + n - 1) & !(n - 1)
}

#[inline]
pub const fn round_down(x: usize, n: usize) -> usize {
    x & !(n - 1)
}

/// An aligned OS allocation, carved into equal-sized pages.
pub struct Pool {
    mmap: MmapMut,
    page_size: usize,
}

impl Pool {
    /// Allocates a new pool of `cfg.pool_size()` bytes and slices it into
    /// freshly-initialized, empty pages.
    pub fn new(cfg: &GcConfig) -> std::io::Result<(Pool, Vec<*mut Page>)> {
        let pool_size = cfg.pool_size();
        let page_size = cfg.page_size();
        let mut mmap = MmapMut::map_anon(pool_size + page_size)?;
        let base = mmap.as_mut_ptr();
        let aligned = round_up(base as usize, page_size) as *mut u8;

        let mut pages = Vec::with_capacity(pool_size / page_size);
        let mut cur = aligned;
        let end = base as usize + pool_size;
        while (cur as usize) + page_size <= end {
            let page = unsafe { Page::init_in(cur, cfg) };
            pages.push(page);
            cur = unsafe { cur.add(page_size) };
        }
        Ok((Pool { mmap, page_size }, pages))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn contains(&self, addr: *const u8) -> bool {
        let base = self.mmap.as_ptr() as usize;
        let end = base + self.mmap.len();
        (addr as usize) >= base && (addr as usize) < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_slices_into_page_aligned_pages() {
        let cfg = GcConfig::default();
        let (pool, pages) = Pool::new(&cfg).unwrap();
        assert!(!pages.is_empty());
        for &p in &pages {
            assert_eq!(p as usize % cfg.page_size(), 0);
            assert!(pool.contains(p as *const u8));
        }
    }

    #[test]
    fn fresh_page_has_room_and_zeroed_marks() {
        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let page = unsafe { &*pages[0] };
        assert_eq!(page.num_allocated(), 0);
        assert!(!page.is_full());
        assert_eq!(page.mark_color(0), MarkColor::White);
    }

    #[test]
    fn bump_alloc_advances_cursor_until_full() {
        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let page = unsafe { &*pages[0] };
        let mut count = 0;
        while page.bump_alloc(1).is_some() {
            count += 1;
        }
        assert_eq!(count, page.num_slots());
        assert!(page.is_full());
    }

    #[test]
    fn mark_bits_round_trip_all_colors() {
        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let page = unsafe { &*pages[0] };
        for (i, color) in [
            MarkColor::White,
            MarkColor::Gray,
            MarkColor::Black,
            MarkColor::BlackGray,
        ]
        .iter()
        .enumerate()
        {
            page.set_mark_color(i, *color);
            assert_eq!(page.mark_color(i), *color);
        }
    }

    #[test]
    fn slot_index_of_matches_bump_order() {
        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let page = unsafe { &*pages[0] };
        let a = page.bump_alloc(1).unwrap();
        let b = page.bump_alloc(1).unwrap();
        assert_eq!(page.slot_index_of(a as *const u8), 0);
        assert_eq!(page.slot_index_of(b as *const u8), 1);
    }
}
