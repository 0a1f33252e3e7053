//! Mark engine: tri-color marking over mark groups (spec.md §4.4).
//!
//! A mark group batches a handful of object ids so threads can exchange
//! marking work without per-object synchronization. Two shared stacks —
//! `objects_to_mark` (work) and `free_mark_groups` (recyclable buffers) —
//! each combine a lock-free ring buffer fast path, slots held in
//! `crossbeam_utils::atomic::AtomicCell` the way the teacher crate's
//! `internal::block_list::BlockList` holds its head pointer, with a
//! mutex-guarded overflow linked list behind it.
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::atomic::AtomicCell;
use parking_lot::Mutex;

use crate::pool::MarkColor;
use crate::tagged::ObjectId;

/// Objects per mark group. Sized, like the original's 62-entry group, to
/// make one group fit a single cache-friendly allocation alongside its
/// bookkeeping fields without wasting a partial page.
pub const MARK_GROUP_CAPACITY: usize = 62;

/// A small fixed-capacity batch of ids awaiting marking.
pub struct MarkGroup {
    objs: [ObjectId; MARK_GROUP_CAPACITY],
    len: usize,
}

impl MarkGroup {
    pub fn new() -> MarkGroup {
        MarkGroup {
            objs: [ObjectId::BAD; MARK_GROUP_CAPACITY],
            len: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.len == MARK_GROUP_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, id: ObjectId) -> bool {
        if self.is_full() {
            return false;
        }
        self.objs[self.len] = id;
        self.len += 1;
        true
    }

    pub fn pop(&mut self) -> Option<ObjectId> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.objs[self.len])
    }

    pub fn drain(&mut self) -> impl Iterator<Item = ObjectId> + '_ {
        let len = self.len;
        self.len = 0;
        self.objs[..len].iter().copied()
    }
}

const RING_SLOTS: usize = 32;

/// A stack of [`MarkGroup`]s: an N-slot ring buffer indexed modulo N and
/// protected only by atomics, backed by a mutex-guarded overflow list.
/// Pushes try the ring first and fall back to the list; pops mirror that
/// (spec.md §4.4 "Work queue — mark groups"). A slot holds a raw
/// `*mut MarkGroup`, null meaning empty; ownership transfers to whichever
/// side wins the CAS.
pub struct GroupStack {
    ring: [AtomicCell<*mut MarkGroup>; RING_SLOTS],
    head: AtomicUsize,
    tail: AtomicUsize,
    overflow: Mutex<Vec<Box<MarkGroup>>>,
}

impl GroupStack {
    pub fn new() -> GroupStack {
        GroupStack {
            ring: std::array::from_fn(|_| AtomicCell::new(std::ptr::null_mut())),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflow: Mutex::new(Vec::new()),
        }
    }

    /// Pushes a group onto the stack. Tries the ring buffer's next free slot
    /// (cheap, usually uncontended); if the ring is full, falls back to the
    /// mutex-guarded overflow list.
    pub fn push(&self, group: Box<MarkGroup>) {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) < RING_SLOTS {
            let slot = &self.ring[tail % RING_SLOTS];
            let raw = Box::into_raw(group);
            if slot
                .compare_exchange(std::ptr::null_mut(), raw)
                .is_ok()
            {
                self.tail.fetch_add(1, Ordering::AcqRel);
                return;
            }
            // Slot was occupied (a pop is lagging behind); reclaim the box
            // and spill to overflow instead of spinning indefinitely.
            self.overflow.lock().push(unsafe { Box::from_raw(raw) });
            return;
        }
        self.overflow.lock().push(group);
    }

    /// Pops a group, preferring the ring buffer, falling back to overflow.
    pub fn pop(&self) -> Option<Box<MarkGroup>> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Acquire);
            if head == tail {
                break;
            }
            let slot = &self.ring[head % RING_SLOTS];
            let raw = slot.swap(std::ptr::null_mut());
            if !raw.is_null() {
                self.head.fetch_add(1, Ordering::AcqRel);
                return Some(unsafe { Box::from_raw(raw) });
            }
            // A push into this slot hasn't landed yet; spin briefly.
            std::hint::spin_loop();
        }
        self.overflow.lock().pop()
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
            && self.overflow.lock().is_empty()
    }
}

/// Coloring operations shared by the initiating thread and helpers
/// (spec.md §4.4 "Coloring rules"). `Tracer` is implemented by the embedding
/// collaborator (the interpreter) to enumerate an object's children; the
/// core only drives the color-state machine.
pub trait Tracer {
    /// Invokes `visit` once per outgoing reference held by `obj`.
    fn trace_children(&self, obj: ObjectId, visit: &mut dyn FnMut(ObjectId));

    /// Resolves `obj` to its containing page and slot index, or `None` if it
    /// lives in a huge tracker (whose own bit is tracked in the tracker
    /// object's own page slot, not a separate scheme) or isn't a heap
    /// pointer at all (small integer).
    fn mark_bit(&self, obj: ObjectId) -> Option<(&crate::pool::Page, usize)>;
}

/// Shared "did any helper fail to allocate while copying/marking" flag
/// (spec.md §4.4 "Parallelism ... sharing a single error slot").
pub struct MarkError(std::sync::atomic::AtomicBool);

impl MarkError {
    pub fn new() -> MarkError {
        MarkError(std::sync::atomic::AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Marks `root` black and enqueues its children as gray, mirroring spec.md
/// §4.4's coloring rules: "root objects are marked black; their children are
/// marked gray and added to a work queue. Marking a gray object black
/// requires first recursively graying its children. An object already
/// non-white is not re-queued."
pub fn mark_root(tracer: &dyn Tracer, to_mark: &GroupStack, free: &GroupStack, root: ObjectId) {
    if try_blacken(tracer, root) {
        enqueue_children(tracer, to_mark, free, root);
    }
}

/// Grays `obj`'s children (queuing any still-white ones) then blackens
/// `obj`. Returns `true` if `obj` actually transitioned (it was white or
/// gray before this call) so the caller knows whether to enqueue children.
fn try_blacken(tracer: &dyn Tracer, obj: ObjectId) -> bool {
    let (page, idx) = match tracer.mark_bit(obj) {
        Some(v) => v,
        None => return false, // small int or huge: handled by caller directly
    };
    // Roots can be white (first time seen) or gray (already queued via some
    // other root/edge); either way exactly one thread must win the
    // transition to black, via the same CAS loop `enqueue_children` uses for
    // the white-to-gray step, so two helpers racing on the same root object
    // never both enqueue its children.
    page.try_transition_mark_color(idx, MarkColor::White, MarkColor::Black)
        || page.try_transition_mark_color(idx, MarkColor::Gray, MarkColor::Black)
}

fn enqueue_children(tracer: &dyn Tracer, to_mark: &GroupStack, free: &GroupStack, obj: ObjectId) {
    let mut group = free.pop().unwrap_or_else(|| Box::new(MarkGroup::new()));
    tracer.trace_children(obj, &mut |child| {
        if let Some((page, idx)) = tracer.mark_bit(child) {
            // Only the thread that wins this CAS enqueues `child`; a loser
            // means some other thread already grayed (or blackened) it, so
            // queuing here too would double-enqueue the same object.
            if page.try_transition_mark_color(idx, MarkColor::White, MarkColor::Gray) {
                if !group.push(child) {
                    to_mark.push(group);
                    group = free.pop().unwrap_or_else(|| Box::new(MarkGroup::new()));
                    group.push(child);
                }
            }
        }
    });
    if !group.is_empty() {
        to_mark.push(group);
    } else {
        free.push(group);
    }
}

/// One worker's processing loop: pop groups and blacken their contents until
/// the queue is drained or `err` has been set by another worker (spec.md
/// §4.4 "Parallelism"). Used by both the initiating thread and helpers.
pub fn drain_mark_queue(
    tracer: &dyn Tracer,
    to_mark: &GroupStack,
    free: &GroupStack,
    err: &MarkError,
) {
    while !err.is_set() {
        let mut group = match to_mark.pop() {
            Some(g) => g,
            None => break,
        };
        while let Some(obj) = group.pop() {
            // `obj` was grayed when enqueued (its own mark bit already
            // flipped white->gray); gray its children first, then blacken
            // `obj` itself, matching spec.md §4.4's "marking a gray object
            // black requires first recursively graying its children". Only
            // roots get blackened by `mark_root`/`try_blacken` directly —
            // every other reachable object passes through here, so skipping
            // this step would leave it permanently gray, and
            // `evacuate_and_retain` only treats `MarkColor::Black` slots as
            // live.
            enqueue_children(tracer, to_mark, free, obj);
            if let Some((page, idx)) = tracer.mark_bit(obj) {
                page.try_transition_mark_color(idx, MarkColor::Gray, MarkColor::Black);
            }
        }
        free.push(group);
    }
}
