//! Evacuation and pointer fixup (spec.md §4.5).
//!
//! After marking, each page is independently judged: a page whose live-slot
//! ratio meets `migration_thresh` is *retained* in place, with its dead
//! slots retyped to opaque (see [`retype_dead_objects`]) so later fixup
//! passes never mistake a dead object's stale fields for live references;
//! otherwise its live objects are *evacuated* — copied slot-for-slot into
//! pages drawn from the free list — and the vacated page is returned to the
//! free list itself. A second, separate pass (fixup) then rewrites every
//! live reference so it points at objects' final addresses.
use crate::header::{HeapObjectHeader, TypeTag};
use crate::pool::{MarkColor, Page};
use crate::tagged::ObjectId;

/// Per-page outcome of the evacuation decision (spec.md §4.5 "Retention vs
/// evacuation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDisposition {
    Retain,
    Evacuate,
}

/// Decides whether `page` should be retained or evacuated, based on the
/// fraction of its slots marked black (live) at the end of marking.
pub fn judge_page(page: &Page, migration_thresh: f64) -> PageDisposition {
    let total = page.num_slots();
    if total == 0 {
        return PageDisposition::Retain;
    }
    let live = (0..total)
        .filter(|&i| page.mark_color(i) == MarkColor::Black)
        .count();
    if (live as f64) / (total as f64) >= migration_thresh {
        PageDisposition::Retain
    } else {
        PageDisposition::Evacuate
    }
}

/// Copier used while evacuating: hands out same-size slots from a rotating
/// set of destination pages. Destination pages are drawn from the free list
/// by the caller (`Heap`) and handed to `copy_slot` one at a time.
pub struct Copier<'a> {
    dest: &'a Page,
}

impl<'a> Copier<'a> {
    pub fn new(dest: &'a Page) -> Copier<'a> {
        Copier { dest }
    }

    /// Copies one live object out of `src_header`/`src_slot` into the next
    /// free slot of the destination page, installs a forwarding word at the
    /// object's old location, and returns the new id.
    ///
    /// Returns `None` if the destination page has no room; the caller must
    /// then supply a fresh destination page and retry.
    ///
    /// # Safety
    /// `src_slot` must point to a live (non-forwarded) object of exactly
    /// `hdr.size()` bytes, not concurrently accessed by another evacuator.
    pub unsafe fn copy_slot(
        &self,
        hdr: HeapObjectHeader,
        src_slot: *mut u8,
    ) -> Option<ObjectId> {
        let size = hdr.size();
        let nslots = (size as u32 + self.dest.slot_size() as u32 - 1) / self.dest.slot_size() as u32;
        let dest_hdr_ptr = self.dest.bump_alloc(nslots.max(1))?;
        std::ptr::copy_nonoverlapping(src_slot, dest_hdr_ptr as *mut u8, size);
        let new_id = ObjectId::from_ptr(dest_hdr_ptr as *const u8);
        let src_hdr = src_slot as *mut HeapObjectHeader;
        (*src_hdr).set_forwarded(new_id);
        Some(new_id)
    }
}

/// Embedder-supplied hook invoked for each object found dead during a
/// collection (spec.md §4.5 "white objects are finalized if they have a
/// registered finalizer", §4.9's whitening pass). Mirrors `mark::Tracer`'s
/// narrow-trait seam pattern and the teacher's own `Collectable`/
/// `finalize_bit` split (`api.rs`, `base.rs`): this crate only needs to know
/// *that* a dead object might own an off-heap resource, not how to release
/// it.
pub trait Finalizer {
    /// Called once, synchronously, for a dead (white) paged object,
    /// immediately before its header is overwritten (retained page) or its
    /// page is returned to the free list (evacuated page). Must not
    /// allocate from the managed heap (spec.md §4.9).
    fn finalize(&self, id: ObjectId, tag: crate::header::TypeTag);
}

/// Rewrites every dead (white) object on a *retained* page to an
/// opaque-tagged object of the same size (spec.md §4.5: "For retained
/// pages, rewrite the headers of white (dead) objects to an opaque type of
/// the same size so their slots no longer reference anything during later
/// fixup"). A retained page's slots from 0 up to `num_allocated` are always
/// a contiguous run of object headers with no gaps (bump allocation never
/// leaves holes), so this can walk it purely by header size without a
/// separate free list; only the first slot of each object carries a mark
/// bit (spec.md §4.2), so the walk advances by each object's own slot span
/// rather than slot-by-slot. `finalizer`, if given, is invoked once per dead
/// object before its header is retyped (spec.md §4.9).
///
/// # Safety
/// `page` must not be concurrently mutated (i.e. called only during the
/// stop-the-world evacuate phase, after marking has finished).
pub unsafe fn retype_dead_objects(page: &Page, finalizer: Option<&dyn Finalizer>) {
    let filled = page.num_allocated();
    let mut slot = 0usize;
    while slot < filled {
        let hdr_ptr = page.slot_ptr(slot) as *mut HeapObjectHeader;
        let hdr = *hdr_ptr;
        let slot_size = page.slot_size() as u32;
        let nslots = ((hdr.size() as u32 + slot_size - 1) / slot_size).max(1) as usize;
        if page.mark_color(slot) != MarkColor::Black {
            if let Some(f) = finalizer {
                f.finalize(ObjectId::from_ptr(hdr_ptr as *const u8), hdr.tag());
            }
            *hdr_ptr = HeapObjectHeader::new(TypeTag::Opaque, hdr.size());
        }
        slot += nslots;
    }
}

/// Rewrites `id` to its post-evacuation address if the object it names has
/// been forwarded; otherwise returns `id` unchanged. Applied to every root,
/// every retained-page slot's outgoing references, and every freshly-copied
/// object's outgoing references during the fixup pass (spec.md §4.5
/// "Fixup").
///
/// # Safety
/// If `id` is a pointer, it must still reference a valid (possibly
/// forwarded) header.
pub unsafe fn fixup_reference(id: ObjectId) -> ObjectId {
    if !id.is_ptr() {
        return id;
    }
    let hdr = *(id.as_ptr() as *const HeapObjectHeader);
    if hdr.is_forwarded() {
        hdr.forwarding_target()
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::header::TypeTag;
    use crate::pool::Pool;

    #[test]
    fn judge_page_retains_when_mostly_live() {
        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let page = unsafe { &*pages[0] };
        for i in 0..page.num_slots() {
            page.set_mark_color(i, MarkColor::Black);
        }
        assert_eq!(judge_page(page, 0.9), PageDisposition::Retain);
    }

    #[test]
    fn judge_page_evacuates_when_mostly_dead() {
        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let page = unsafe { &*pages[0] };
        page.set_mark_color(0, MarkColor::Black);
        assert_eq!(judge_page(page, 0.9), PageDisposition::Evacuate);
    }

    #[test]
    fn copy_slot_installs_forwarding_and_preserves_bytes() {
        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let src_page = unsafe { &*pages[0] };
        let dst_page = unsafe { &*pages[1] };

        let slot = src_page.bump_alloc(1).unwrap();
        unsafe {
            slot.write(HeapObjectHeader::new(TypeTag::Object, 32));
        }
        let hdr = unsafe { *slot };

        let copier = Copier::new(dst_page);
        let new_id = unsafe { copier.copy_slot(hdr, slot as *mut u8) }.unwrap();

        let old_hdr = unsafe { *slot };
        assert!(old_hdr.is_forwarded());
        assert_eq!(old_hdr.forwarding_target(), new_id);

        let new_hdr = unsafe { *(new_id.as_ptr() as *const HeapObjectHeader) };
        assert!(!new_hdr.is_forwarded());
        assert_eq!(new_hdr.tag(), TypeTag::Object);
        assert_eq!(new_hdr.size(), 32);
    }

    #[test]
    fn fixup_follows_forwarding_chain_once() {
        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let src_page = unsafe { &*pages[0] };
        let dst_page = unsafe { &*pages[1] };

        let slot = src_page.bump_alloc(1).unwrap();
        unsafe {
            slot.write(HeapObjectHeader::new(TypeTag::Object, 32));
        }
        let hdr = unsafe { *slot };
        let old_id = unsafe { ObjectId::from_ptr(slot as *const u8) };

        let copier = Copier::new(dst_page);
        let new_id = unsafe { copier.copy_slot(hdr, slot as *mut u8) }.unwrap();

        let resolved = unsafe { fixup_reference(old_id) };
        assert_eq!(resolved, new_id);
    }

    #[test]
    fn retype_dead_objects_retags_white_slots_and_leaves_black_ones_alone() {
        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let page = unsafe { &*pages[0] };

        let live = page.bump_alloc(1).unwrap();
        unsafe { live.write(HeapObjectHeader::new(TypeTag::Object, 32)) };
        page.set_mark_color(0, MarkColor::Black);

        let dead = page.bump_alloc(1).unwrap();
        unsafe { dead.write(HeapObjectHeader::new(TypeTag::String, 32)) };
        // Slot 1 starts white (clear_marks already zeroed the bitmap).

        unsafe { retype_dead_objects(page, None) };

        let live_hdr = unsafe { *live };
        assert_eq!(live_hdr.tag(), TypeTag::Object, "live object must be untouched");
        let dead_hdr = unsafe { *dead };
        assert_eq!(dead_hdr.tag(), TypeTag::Opaque, "dead object must be retyped to opaque");
        assert_eq!(dead_hdr.size(), 32, "retyping must preserve the object's size");
    }

    #[test]
    fn retype_dead_objects_invokes_finalizer_once_per_dead_object() {
        use std::cell::RefCell;

        struct RecordingFinalizer {
            seen: RefCell<Vec<(ObjectId, TypeTag)>>,
        }
        impl Finalizer for RecordingFinalizer {
            fn finalize(&self, id: ObjectId, tag: TypeTag) {
                self.seen.borrow_mut().push((id, tag));
            }
        }

        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let page = unsafe { &*pages[0] };

        let live = page.bump_alloc(1).unwrap();
        unsafe { live.write(HeapObjectHeader::new(TypeTag::Object, 32)) };
        page.set_mark_color(0, MarkColor::Black);

        let dead = page.bump_alloc(1).unwrap();
        unsafe { dead.write(HeapObjectHeader::new(TypeTag::String, 32)) };
        let dead_id = unsafe { ObjectId::from_ptr(dead as *const u8) };

        let finalizer = RecordingFinalizer { seen: RefCell::new(Vec::new()) };
        unsafe { retype_dead_objects(page, Some(&finalizer)) };

        assert_eq!(finalizer.seen.borrow().as_slice(), &[(dead_id, TypeTag::String)]);
    }

    #[test]
    fn fixup_is_identity_for_non_forwarded_and_non_pointers() {
        let small = ObjectId::from_small_int(42);
        assert_eq!(unsafe { fixup_reference(small) }, small);

        let cfg = GcConfig::default();
        let (_pool, pages) = Pool::new(&cfg).unwrap();
        let page = unsafe { &*pages[0] };
        let slot = page.bump_alloc(1).unwrap();
        unsafe {
            slot.write(HeapObjectHeader::new(TypeTag::Object, 32));
        }
        let id = unsafe { ObjectId::from_ptr(slot as *const u8) };
        assert_eq!(unsafe { fixup_reference(id) }, id);
    }
}
