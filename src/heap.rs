//! The heap: page/pool allocator, allocation fast/slow paths, and the
//! collection driver (spec.md §4.1, §4.6).
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::config::GcConfig;
use crate::ctx::{Ctx, ThreadGcState};
use crate::engagement::{Engagement, HeapState};
use crate::error::{InternalError, Result};
use crate::evacuate::Finalizer;
use crate::header::{HeapObjectHeader, TypeTag};
use crate::huge::HugeTracker;
use crate::mark::{drain_mark_queue, GroupStack, MarkError, Tracer};
use crate::pool::{round_up, Page, Pool};
use crate::stats::GcStats;
use crate::tagged::ObjectId;

/// Whether a freshly allocated object may move during evacuation (spec.md
/// §6 `alloc_object(ctx, movability, ...)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movability {
    Movable,
    Immovable,
}

/// Wraps the embedder's [`Tracer`] so every `trace_children` call also marks
/// reachable huge trackers, which have no page bitmap of their own (spec.md
/// §4.9). `mark_bit` is forwarded unchanged: a huge id has no page slot, so
/// the inner tracer correctly answers `None` for it and the generic mark
/// engine in [`crate::mark`] never touches huge trackers directly.
struct HugeAwareTracer<'h, 't> {
    heap: &'h Heap,
    inner: &'t dyn Tracer,
}

impl<'h, 't> Tracer for HugeAwareTracer<'h, 't> {
    fn trace_children(&self, obj: ObjectId, visit: &mut dyn FnMut(ObjectId)) {
        self.inner.trace_children(obj, &mut |child| {
            if let Some(ptr) = self.heap.find_huge_tracker(child) {
                let tracker = unsafe { &*ptr };
                if !tracker.is_reached() {
                    tracker.mark_reached();
                    // Walk the huge object's own children (if any) through
                    // this same wrapper and the caller's `visit`, so a paged
                    // object reachable only behind a huge intermediary still
                    // reaches the normal mark queue.
                    self.trace_children(child, visit);
                }
            }
            visit(child);
        });
    }

    fn mark_bit(&self, obj: ObjectId) -> Option<(&Page, usize)> {
        self.inner.mark_bit(obj)
    }
}

/// Doubly-purposed used-page list node housing: pages move between `free`,
/// the head (non-full) and tail (full) of `used` under the heap mutex
/// (spec.md §3.3).
struct PageLists {
    free: Vec<*mut Page>,
    used_head: Vec<*mut Page>,
    used_tail: Vec<*mut Page>,
    pools: Vec<Pool>,
}

/// The managed-object heap for one [`crate::instance::Instance`].
pub struct Heap {
    cfg: GcConfig,
    lists: Mutex<PageLists>,
    bytes_live: AtomicUsize,
    pub(crate) engagement: Engagement,
    objects_to_mark: GroupStack,
    free_mark_groups: GroupStack,
    /// Every huge tracker currently alive, so a mark cycle can clear/check
    /// their reached bits and finalize the unreached ones (spec.md §4.9).
    /// A tracker's id is its own pointer tagged by [`ObjectId::from_ptr`], so
    /// membership is a pointer comparison, not a hash lookup.
    huge_trackers: Mutex<Vec<*mut HugeTracker>>,
    /// Only populated under `#[cfg(feature = "mad-gc")]`: every page ever
    /// handed out, so debug builds can force eviction on every allocation
    /// (spec.md §3.8, original's `CONFIG_MAD_GC`).
    #[cfg(feature = "mad-gc")]
    all_pages: Mutex<Vec<*mut Page>>,
}

unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    pub fn new(cfg: GcConfig) -> std::io::Result<Heap> {
        cfg.validate().map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let (pool, pages) = Pool::new(&cfg)?;
        Ok(Heap {
            cfg,
            lists: Mutex::new(PageLists {
                free: pages,
                used_head: Vec::new(),
                used_tail: Vec::new(),
                pools: vec![pool],
            }),
            bytes_live: AtomicUsize::new(0),
            engagement: Engagement::new(),
            objects_to_mark: GroupStack::new(),
            free_mark_groups: GroupStack::new(),
            huge_trackers: Mutex::new(Vec::new()),
            #[cfg(feature = "mad-gc")]
            all_pages: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &GcConfig {
        &self.cfg
    }

    fn grow_pool(&self, lists: &mut PageLists) -> std::io::Result<()> {
        let (pool, pages) = Pool::new(&self.cfg)?;
        lists.free.extend(pages);
        lists.pools.push(pool);
        Ok(())
    }

    fn live_bytes(&self) -> usize {
        self.bytes_live.load(Ordering::Relaxed) + crate::huge::OFF_HEAP_BYTES.load(Ordering::Relaxed)
    }

    fn should_auto_collect(&self) -> bool {
        self.live_bytes() as f64 >= self.cfg.max_heap_size as f64 * self.cfg.gc_threshold
    }

    /// Allocates `size` bytes tagged `tag` on behalf of `ctx` (spec.md §4.1,
    /// §6 `alloc_object`). Requests larger than `MAX_HEAP_OBJ_SIZE`, or
    /// explicitly marked [`Movability::Immovable`], go to the huge path.
    pub fn alloc_object(
        &self,
        ctx: &Ctx,
        movability: Movability,
        tag: TypeTag,
        size: usize,
    ) -> Result<ObjectId> {
        let rounded = round_up(size, self.cfg.slot_size());
        if movability == Movability::Immovable || rounded > self.cfg.max_heap_obj_size {
            return self.alloc_huge(tag, size);
        }

        // Fast path: no locks, bump-allocate from ctx.cur_page.
        #[cfg(not(feature = "mad-gc"))]
        {
            let cur = ctx.cur_page.get();
            if !cur.is_null() {
                let nslots = (rounded / self.cfg.slot_size()) as u32;
                if let Some(hdr) = unsafe { &*cur }.bump_alloc(nslots.max(1)) {
                    unsafe { hdr.write(HeapObjectHeader::new(tag, rounded)) };
                    self.bytes_live.fetch_add(rounded, Ordering::Relaxed);
                    return Ok(unsafe { ObjectId::from_ptr(hdr as *const u8) });
                }
            }
        }

        self.alloc_slow(ctx, tag, rounded)
    }

    pub fn alloc_immovable(&self, tag: TypeTag, size: usize) -> Result<ObjectId> {
        self.alloc_huge(tag, size)
    }

    fn alloc_huge(&self, tag: TypeTag, size: usize) -> Result<ObjectId> {
        // MAX_HEAP_SIZE caps live heap bytes including huge allocations
        // (spec.md §6); huge.rs's OFF_HEAP_BYTES is folded into `live_bytes`.
        if self.live_bytes() + size > self.cfg.max_heap_size {
            return Err(InternalError::OutOfMemory);
        }
        // The tracker is a small, ordinary Rust allocation registered with
        // this heap; only the buffer it owns lives off-heap (spec.md §3.6).
        let tracker = HugeTracker::allocate(size, ObjectId::BAD).ok_or(InternalError::OutOfMemory)?;
        let _ = tag; // the payload's logical type is the embedding model's concern
        let leaked = Box::into_raw(Box::new(tracker));
        let id = unsafe { ObjectId::from_ptr(leaked as *const u8) };
        unsafe { (*leaked).set_object(id) };
        self.huge_trackers.lock().push(leaked);
        Ok(id)
    }

    /// Resolves `id` to its registered huge tracker, if any (spec.md §4.9).
    fn find_huge_tracker(&self, id: ObjectId) -> Option<*mut HugeTracker> {
        if !id.is_ptr() {
            return None;
        }
        let want = id.as_ptr() as *mut HugeTracker;
        self.huge_trackers.lock().iter().copied().find(|&p| p == want)
    }

    /// Frees every huge tracker that wasn't reached this cycle and keeps the
    /// rest registered (spec.md §4.9 "When a white huge-tracker is collected,
    /// its off-heap buffer is freed ... and the heap's off-heap-size
    /// accounting is decremented"). `HugeTracker::drop` does the actual free
    /// and accounting.
    fn finalize_huge_trackers(&self) -> usize {
        let mut trackers = self.huge_trackers.lock();
        let mut survivors = Vec::with_capacity(trackers.len());
        let mut freed = 0;
        for ptr in trackers.drain(..) {
            if unsafe { &*ptr }.is_reached() {
                survivors.push(ptr);
            } else {
                drop(unsafe { Box::from_raw(ptr) });
                freed += 1;
            }
        }
        *trackers = survivors;
        freed
    }

    /// Slow path (spec.md §4.1): take the heap mutex, engage in any running
    /// cycle, scan the used list for room, and fall back to a fresh page.
    fn alloc_slow(&self, ctx: &Ctx, tag: TypeTag, rounded: usize) -> Result<ObjectId> {
        let mut lists = self.lists.lock();

        if self.engagement.state() != HeapState::Inactive && ctx.gc_state() == ThreadGcState::Inactive {
            drop(lists);
            self.engage_in_cycle(ctx);
            lists = self.lists.lock();
        }

        let nslots = (rounded / self.cfg.slot_size()).max(1) as u32;

        let mut seek = 0u32;
        while seek < self.cfg.max_page_seek {
            let page = match lists.used_head.first().copied() {
                Some(p) => p,
                None => break,
            };
            let page_ref = unsafe { &*page };
            if let Some(hdr) = page_ref.bump_alloc(nslots) {
                if page_ref.is_full() {
                    lists.used_head.remove(0);
                    lists.used_tail.push(page);
                    if ctx.cur_page.get() == page {
                        ctx.cur_page.set(std::ptr::null_mut());
                    }
                }
                unsafe { hdr.write(HeapObjectHeader::new(tag, rounded)) };
                self.bytes_live.fetch_add(rounded, Ordering::Relaxed);
                let id = unsafe { ObjectId::from_ptr(hdr as *const u8) };
                self.maybe_retire_current(ctx, page);
                return Ok(id);
            }
            // This page (often `ctx.cur_page` itself, already rejected by the
            // fast path) has no room at all; relocate it once here so the
            // later `retire_current_page` call below doesn't find it still
            // sitting in `ctx.cur_page` and push it onto `used_tail` again.
            lists.used_head.remove(0);
            lists.used_tail.push(page);
            if ctx.cur_page.get() == page {
                ctx.cur_page.set(std::ptr::null_mut());
            }
            seek += 1;
        }

        // Nothing suffices: retire current page, maybe collect, get a fresh one.
        self.retire_current_page(ctx, &mut lists);

        if self.should_auto_collect() {
            drop(lists);
            let _ = self.collect_garbage_inner(ctx, None, None);
            lists = self.lists.lock();
        }

        let fresh = self.take_free_page(&mut lists)?;
        ctx.cur_page.set(fresh);
        let fresh_ref = unsafe { &*fresh };
        let hdr = fresh_ref
            .bump_alloc(nslots)
            .expect("freshly allocated page always has room for one object");
        unsafe { hdr.write(HeapObjectHeader::new(tag, rounded)) };
        self.bytes_live.fetch_add(rounded, Ordering::Relaxed);
        lists.used_head.insert(0, fresh);
        Ok(unsafe { ObjectId::from_ptr(hdr as *const u8) })
    }

    /// If `page` has more free room than `ctx`'s current page, swap it in as
    /// the new bump-allocation target (spec.md §4.1).
    fn maybe_retire_current(&self, ctx: &Ctx, page: *mut Page) {
        let cur = ctx.cur_page.get();
        let candidate_room = unsafe { &*page }.num_slots() - unsafe { &*page }.num_allocated();
        let cur_room = if cur.is_null() {
            0
        } else {
            unsafe { &*cur }.num_slots() - unsafe { &*cur }.num_allocated()
        };
        if candidate_room > cur_room {
            ctx.cur_page.set(page);
        }
    }

    fn retire_current_page(&self, ctx: &Ctx, lists: &mut PageLists) {
        let cur = ctx.cur_page.get();
        if cur.is_null() {
            return;
        }
        ctx.cur_page.set(std::ptr::null_mut());
        let page_ref = unsafe { &*cur };
        if page_ref.is_full() {
            lists.used_tail.push(cur);
        } else {
            lists.used_head.insert(0, cur);
        }
    }

    fn take_free_page(&self, lists: &mut PageLists) -> Result<*mut Page> {
        if lists.free.is_empty() {
            // MAX_HEAP_SIZE caps total pool capacity granted to this heap
            // (spec.md §6); once reached, a fresh pool is refused rather
            // than grown, so allocation raises out-of-memory (spec.md §4.1
            // "Failure") instead of silently exceeding the configured cap.
            let total_capacity = lists.pools.len() * self.cfg.pool_size();
            if total_capacity + self.cfg.pool_size() > self.cfg.max_heap_size {
                return Err(InternalError::OutOfMemory);
            }
            self.grow_pool(lists).map_err(|_| InternalError::OutOfMemory)?;
        }
        lists.free.pop().ok_or(InternalError::OutOfMemory)
    }

    /// Engages `ctx` in an in-progress cycle: retires its current page and
    /// flips to ENGAGED, decrementing the shared straggler count, then waits
    /// for the cycle to return to INACTIVE (spec.md §4.6 step 3).
    fn engage_in_cycle(&self, ctx: &Ctx) {
        {
            let mut lists = self.lists.lock();
            self.retire_current_page(ctx, &mut lists);
        }
        ctx.set_gc_state(ThreadGcState::Engaged);
        self.engagement.acknowledge_stop();
        self.engagement.wait_until_inactive();
        ctx.set_gc_state(ThreadGcState::Inactive);
    }

    /// `help_gc` (spec.md §6): blocks until marking work exists, then
    /// participates until the mark phase ends.
    pub fn help_gc(&self, tracer: &dyn Tracer, err: &MarkError) {
        self.engagement.wait_for_help();
        if self.engagement.state() == HeapState::Mark {
            drain_mark_queue(tracer, &self.objects_to_mark, &self.free_mark_groups, err);
        }
    }

    /// `suspend_context` (spec.md §6, §4.6 "voluntary SUSPENDED"): treats the
    /// calling thread as already engaged for the duration of any GC that
    /// starts while it's blocked on external I/O.
    pub fn suspend_context(&self, ctx: &Ctx) {
        let mut lists = self.lists.lock();
        self.retire_current_page(ctx, &mut lists);
        drop(lists);
        ctx.set_gc_state(ThreadGcState::Suspended);
    }

    /// `resume_context` (spec.md §6): rejoins the mutator set, first helping
    /// finish any cycle that started while suspended.
    pub fn resume_context(&self, ctx: &Ctx) {
        if self.engagement.state() != HeapState::Inactive {
            self.engagement.wait_until_inactive();
        }
        ctx.set_gc_state(ThreadGcState::Inactive);
    }

    /// `collect_garbage` (spec.md §6, §4.4-§4.6): drives a full mark cycle
    /// over `roots`, then evacuates/retains pages and fixes up root
    /// pointers. In-heap object-to-object reference fixup is layered on by
    /// [`crate::instance::Instance`], which alone knows each object layout's
    /// reference fields; this method handles everything the core owns.
    pub fn collect_garbage(
        &self,
        ctx: &Ctx,
        tracer: &dyn Tracer,
        roots: &mut [ObjectId],
        finalizer: Option<&dyn Finalizer>,
        stats: Option<&mut GcStats>,
    ) -> Result<()> {
        self.collect_garbage_with(ctx, tracer, roots, finalizer, stats)
    }

    fn collect_garbage_inner(
        &self,
        ctx: &Ctx,
        finalizer: Option<&dyn Finalizer>,
        stats: Option<&mut GcStats>,
    ) -> Result<()> {
        struct NullTracer;
        impl Tracer for NullTracer {
            fn trace_children(&self, _obj: ObjectId, _visit: &mut dyn FnMut(ObjectId)) {}
            fn mark_bit(&self, _obj: ObjectId) -> Option<(&Page, usize)> {
                None
            }
        }
        self.collect_garbage_with(ctx, &NullTracer, &mut [], finalizer, stats)
    }

    fn collect_garbage_with(
        &self,
        ctx: &Ctx,
        tracer: &dyn Tracer,
        roots: &mut [ObjectId],
        finalizer: Option<&dyn Finalizer>,
        stats: Option<&mut GcStats>,
    ) -> Result<()> {
        debug!("collect_garbage: entering INIT");
        {
            let mut lists = self.lists.lock();
            self.retire_current_page(ctx, &mut lists);
        }
        ctx.set_gc_state(ThreadGcState::Engaged);
        self.engagement.advance(HeapState::Init);
        // In this single-process core, "other threads" are whatever other
        // `Ctx`s the embedding registered as engaged helpers; a freestanding
        // test harness with one thread sees threads_to_stop = 0 immediately.
        self.engagement.begin_stop(0);
        self.engagement.wait_for_stop();

        let pages_before = {
            let lists = self.lists.lock();
            lists.used_head.len() + lists.used_tail.len()
        };

        self.engagement.advance(HeapState::Mark);
        {
            let lists = self.lists.lock();
            for &page in lists.used_head.iter().chain(lists.used_tail.iter()) {
                unsafe { &*page }.clear_marks();
            }
        }
        {
            let trackers = self.huge_trackers.lock();
            for &p in trackers.iter() {
                unsafe { &*p }.clear_reached();
            }
        }
        let wrapped = HugeAwareTracer { heap: self, inner: tracer };
        let err = MarkError::new();
        for &root in roots.iter() {
            if let Some(ptr) = self.find_huge_tracker(root) {
                let tracker = unsafe { &*ptr };
                if !tracker.is_reached() {
                    tracker.mark_reached();
                    wrapped.trace_children(root, &mut |child| {
                        crate::mark::mark_root(&wrapped, &self.objects_to_mark, &self.free_mark_groups, child);
                    });
                }
            }
            crate::mark::mark_root(&wrapped, &self.objects_to_mark, &self.free_mark_groups, root);
        }
        drain_mark_queue(&wrapped, &self.objects_to_mark, &self.free_mark_groups, &err);
        if err.is_set() {
            self.engagement.advance(HeapState::Inactive);
            ctx.set_gc_state(ThreadGcState::Inactive);
            return Err(InternalError::OutOfMemory);
        }
        self.finalize_huge_trackers();

        self.engagement.advance(HeapState::Evacuate);
        let evacuated = self.evacuate_and_retain(finalizer);

        self.engagement.advance(HeapState::Update);
        self.fixup_roots(roots);

        let pages_after = {
            let lists = self.lists.lock();
            lists.used_head.len() + lists.used_tail.len()
        };

        self.engagement.advance(HeapState::Inactive);
        ctx.set_gc_state(ThreadGcState::Inactive);

        if let Some(s) = stats {
            s.pages_before = pages_before;
            s.pages_after = pages_after;
            s.objects_evacuated = evacuated;
        }
        trace!(
            "collect_garbage: done, {} pages -> {} pages",
            pages_before,
            pages_after
        );
        Ok(())
    }

    /// Judges every used page, evacuating those below `migration_thresh` and
    /// retaining the rest (spec.md §4.5). Returns the number of objects
    /// copied. `finalizer`, if given, is invoked once for every dead object
    /// found on either kind of page (spec.md §4.5 "white objects are
    /// finalized if they have a registered finalizer", §4.9).
    fn evacuate_and_retain(&self, finalizer: Option<&dyn Finalizer>) -> usize {
        let mut lists = self.lists.lock();
        let used: Vec<*mut Page> = lists
            .used_head
            .drain(..)
            .chain(lists.used_tail.drain(..))
            .collect();

        let mut retained = Vec::new();
        let mut to_evacuate = Vec::new();
        for page in used {
            let page_ref = unsafe { &*page };
            match crate::evacuate::judge_page(page_ref, self.cfg.migration_thresh) {
                crate::evacuate::PageDisposition::Retain => retained.push(page),
                crate::evacuate::PageDisposition::Evacuate => to_evacuate.push(page),
            }
        }

        // Destination pages are acquired lazily, only once a live object is
        // actually found, and a source page is pushed onto the free list as
        // soon as it's been fully drained — so it can immediately serve as
        // the destination for a *later* source page in this same pass. This
        // is spec.md §4.5's partial-failure recovery: "attempt to reclaim
        // any already-emptied free pages (they become a new reservoir)" —
        // evacuation need not touch the pool allocator at all as long as
        // at least one to-evacuate page turns out to hold no live objects.
        let mut copied = 0usize;
        let mut dest: Option<*mut Page> = None;
        for src in to_evacuate {
            let src_ref = unsafe { &*src };
            // Walked by header span (like `retype_dead_objects`) rather than
            // slot-by-slot: only an object's first slot carries a mark bit
            // (spec.md §4.2), so a naive per-slot scan can't tell a dead
            // object's head from a live object's continuation slot, and
            // either would be misread as a header.
            let filled = src_ref.num_allocated();
            let mut slot_idx = 0usize;
            while slot_idx < filled {
                let slot = unsafe { src_ref.slot_ptr(slot_idx) };
                let hdr = unsafe { *(slot as *const HeapObjectHeader) };
                let slot_size = src_ref.slot_size() as u32;
                let nslots =
                    ((hdr.size() as u32 + slot_size - 1) / slot_size).max(1) as usize;

                if src_ref.mark_color(slot_idx) != crate::pool::MarkColor::Black {
                    if let Some(f) = finalizer {
                        f.finalize(unsafe { ObjectId::from_ptr(slot as *const u8) }, hdr.tag());
                    }
                    slot_idx += nslots;
                    continue;
                }

                loop {
                    if dest.is_none() {
                        match self.take_free_page(&mut lists) {
                            Ok(p) => dest = Some(p),
                            Err(_) => {
                                warn!(
                                    "OOM mid-evacuation; remaining objects on this page are dropped"
                                );
                                break;
                            }
                        }
                    }
                    let d = match dest {
                        Some(p) => p,
                        None => break,
                    };
                    let copier = crate::evacuate::Copier::new(unsafe { &*d });
                    match unsafe { copier.copy_slot(hdr, slot) } {
                        Some(_) => {
                            copied += 1;
                            break;
                        }
                        None => {
                            // `d` is full; bank it as a used page and grab
                            // another destination on the next iteration.
                            lists.used_head.push(d);
                            dest = None;
                        }
                    }
                }
                slot_idx += nslots;
            }
            src_ref.reset_bump_cursor();
            lists.free.push(src);
        }
        if let Some(d) = dest {
            lists.used_head.push(d);
        }

        for page in retained {
            // Dead slots on a retained page are never copied or swept, so
            // their headers must be retyped to opaque in place (spec.md
            // §4.5) — otherwise a later fixup pass walking this page would
            // read whatever stale bytes a dead object's fields left behind
            // as if they were still live references.
            unsafe { crate::evacuate::retype_dead_objects(&*page, finalizer) };
            lists.used_head.push(page);
        }
        copied
    }

    /// Rewrites every root reference that points at a forwarded object, in
    /// place, so the caller's copies stay valid after evacuation (spec.md
    /// §4.5 "Pointer fixup"). In-heap object-to-object references are the
    /// embedding model's responsibility to re-walk via the same
    /// [`crate::evacuate::fixup_reference`] helper, since only it knows each
    /// object layout's reference fields.
    fn fixup_roots(&self, roots: &mut [ObjectId]) {
        for root in roots.iter_mut() {
            *root = unsafe { crate::evacuate::fixup_reference(*root) };
        }
    }

    pub fn live_byte_count(&self) -> usize {
        self.live_bytes()
    }

    /// Number of huge trackers currently registered with this heap. A
    /// convenience for tests and embedders checking that an unrooted huge
    /// object was actually reclaimed by the last collection.
    pub fn huge_tracker_count(&self) -> usize {
        self.huge_trackers.lock().len()
    }

    /// Resolves `id` to its containing page and slot index, or `None` if
    /// `id` is a small integer or a huge-tracker id (spec.md §3.1
    /// "distinguished ... by which region contains the address"). A
    /// convenience for embedders implementing `Tracer::mark_bit`, so they
    /// don't each need to reinvent address-range bookkeeping this heap
    /// already keeps.
    pub fn locate(&self, id: ObjectId) -> Option<(&Page, usize)> {
        if !id.is_ptr() {
            return None;
        }
        let ptr = id.as_ptr() as usize;
        let page_size = self.cfg.page_size();
        let lists = self.lists.lock();
        for &page in lists.used_head.iter().chain(lists.used_tail.iter()) {
            let start = page as usize;
            if ptr >= start && ptr < start + page_size {
                let page_ref: &Page = unsafe { &*page };
                return Some((page_ref, page_ref.slot_index_of(id.as_ptr())));
            }
        }
        None
    }
}

impl Drop for Heap {
    /// `heap_destroy` (spec.md §6): reclaims every huge tracker still
    /// outstanding, since they're ordinary Rust allocations outside the
    /// pages `lists` already frees via its own field drops.
    fn drop(&mut self) {
        for ptr in self.huge_trackers.get_mut().drain(..) {
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}
