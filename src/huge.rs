//! Huge-object tracker (spec.md §3.6, §4.9).
//!
//! Requests that don't fit the per-page slot budget are satisfied by a raw,
//! page-aligned `malloc` outside any [`crate::pool::Pool`]. The tracker
//! itself is a small, ordinary Rust heap allocation (not a paged object) held
//! in [`crate::heap::Heap`]'s own huge-tracker registry so the collector can
//! find, mark, and finalize it without a page to hold its mark bit; the
//! off-heap block carries a back-reference word to its tracker one machine
//! word before the payload, matching `kos_object_alloc.c`'s layout. The
//! block itself is obtained via `libc::posix_memalign`/`libc::free`, the same
//! pair the teacher's own `large_space.rs` calls directly (`libc::malloc`/
//! `libc::free`) for its equivalent large-object path, rather than going
//! through Rust's global allocator.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::tagged::ObjectId;

/// Bytes of back-reference header preceding a huge object's payload.
pub const TRACK_BIT_OFFSET: usize = std::mem::size_of::<usize>();

/// Tracks one off-heap allocation. Registered with [`crate::heap::Heap`] at
/// creation so a mark cycle can find it again; the fields here are its
/// payload.
pub struct HugeTracker {
    /// Raw pointer to the *back-reference word*, i.e. `size - TRACK_BIT_OFFSET`
    /// bytes before the user-visible payload start.
    block: *mut u8,
    size: usize,
    /// The object id this tracker exists to own. Read by the collector when
    /// deciding whether to finalize.
    object: ObjectId,
    /// This tracker's own one-bit mark, since it lives outside any page's
    /// bitmap (spec.md §4.9). Cleared at the start of every mark phase.
    reached: AtomicBool,
}

/// Process-wide counter of bytes currently held by huge trackers, so the
/// heap can enforce `max_heap_size` against huge allocations too (spec.md
/// §6 "MAX_HEAP_SIZE | cap on live heap bytes").
pub static OFF_HEAP_BYTES: AtomicUsize = AtomicUsize::new(0);

impl HugeTracker {
    /// Allocates a fresh off-heap, page-aligned block of `payload_size`
    /// bytes (plus the back-reference header) and wires up the tracker.
    ///
    /// `tracker_id` is the tagged id of the tracker object itself (its heap
    /// page slot) and is written into the block's back-reference word.
    pub fn allocate(payload_size: usize, tracker_id: ObjectId) -> Option<HugeTracker> {
        let total = TRACK_BIT_OFFSET + payload_size;
        let align = std::mem::align_of::<usize>().max(32);
        let mut block: *mut libc::c_void = std::ptr::null_mut();
        let rc = unsafe { libc::posix_memalign(&mut block, align, total) };
        if rc != 0 || block.is_null() {
            return None;
        }
        let block = block as *mut u8;
        unsafe {
            (block as *mut usize).write(tracker_id.to_bits());
        }
        OFF_HEAP_BYTES.fetch_add(total, Ordering::Relaxed);
        Some(HugeTracker {
            block,
            size: total,
            object: ObjectId::BAD,
            reached: AtomicBool::new(false),
        })
    }

    /// Marks this tracker reached during the current mark phase (spec.md
    /// §4.9). Idempotent; the caller should check [`HugeTracker::is_reached`]
    /// first to avoid re-walking an already-marked tracker's children.
    pub fn mark_reached(&self) {
        self.reached.store(true, Ordering::Relaxed);
    }

    pub fn is_reached(&self) -> bool {
        self.reached.load(Ordering::Relaxed)
    }

    /// Zeroes this tracker's mark bit; called once per tracker at the start
    /// of a mark phase, mirroring `Page::clear_marks`.
    pub fn clear_reached(&self) {
        self.reached.store(false, Ordering::Relaxed);
    }

    /// The payload pointer a caller should actually use (past the
    /// back-reference word).
    pub fn payload(&self) -> *mut u8 {
        unsafe { self.block.add(TRACK_BIT_OFFSET) }
    }

    pub fn payload_size(&self) -> usize {
        self.size - TRACK_BIT_OFFSET
    }

    pub fn set_object(&mut self, object: ObjectId) {
        self.object = object;
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Reads the tracker id from a block's back-reference word, given the
    /// block's payload pointer.
    ///
    /// # Safety
    /// `payload` must point `TRACK_BIT_OFFSET` bytes into a block allocated
    /// by [`HugeTracker::allocate`].
    pub unsafe fn tracker_of(payload: *const u8) -> ObjectId {
        let back = payload.sub(TRACK_BIT_OFFSET) as *const usize;
        ObjectId::from_bits(*back)
    }

    /// Frees the off-heap block. Called by the collector when a white
    /// (unreached) huge tracker is reclaimed (spec.md §4.9).
    fn free(&mut self) {
        unsafe { libc::free(self.block as *mut libc::c_void) };
        OFF_HEAP_BYTES.fetch_sub(self.size, Ordering::Relaxed);
    }
}

impl Drop for HugeTracker {
    fn drop(&mut self) {
        self.free();
    }
}

unsafe impl Send for HugeTracker {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_reference_round_trips() {
        let tracker_id = unsafe { ObjectId::from_ptr(0x8000 as *const u8) };
        let t = HugeTracker::allocate(128, tracker_id).unwrap();
        let found = unsafe { HugeTracker::tracker_of(t.payload()) };
        assert_eq!(found, tracker_id);
    }

    #[test]
    fn reached_bit_starts_clear_and_round_trips() {
        let tracker_id = unsafe { ObjectId::from_ptr(0x7000 as *const u8) };
        let t = HugeTracker::allocate(32, tracker_id).unwrap();
        assert!(!t.is_reached());
        t.mark_reached();
        assert!(t.is_reached());
        t.clear_reached();
        assert!(!t.is_reached());
    }

    #[test]
    fn payload_size_excludes_back_reference() {
        let tracker_id = unsafe { ObjectId::from_ptr(0x8000 as *const u8) };
        let t = HugeTracker::allocate(256, tracker_id).unwrap();
        assert_eq!(t.payload_size(), 256);
    }

    #[test]
    fn drop_decrements_off_heap_bytes() {
        let before = OFF_HEAP_BYTES.load(Ordering::Relaxed);
        {
            let tracker_id = unsafe { ObjectId::from_ptr(0x9000 as *const u8) };
            let _t = HugeTracker::allocate(64, tracker_id).unwrap();
            assert!(OFF_HEAP_BYTES.load(Ordering::Relaxed) > before);
        }
        assert_eq!(OFF_HEAP_BYTES.load(Ordering::Relaxed), before);
    }

}
