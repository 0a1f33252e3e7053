//! Per-thread context and local handle roots (spec.md §3.7, §4.3, §6).
//!
//! Modeled on the teacher crate's `ShadowStack`/`RawShadowStackEntry`
//! (`shadow_stack.rs`): a singly-linked list of on-stack entries threaded
//! through the call stack itself, pushed and popped in strict LIFO order.
//! The Kos design keeps two such lists per thread — "safe" handles (plain
//! local variables) and "unsafe" handles (reachable only via explicit
//! tracking, e.g. through FFI) — rather than one, which is why `Ctx` carries
//! two list heads instead of the teacher's single `ShadowStack`.
use std::cell::Cell;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::ExceptionKind;
use crate::pool::Page;
use crate::tagged::ObjectId;

/// Per-thread GC engagement state (spec.md §3.7, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadGcState {
    Inactive = 0,
    Engaged = 1,
    Suspended = 2,
}

impl ThreadGcState {
    fn from_u8(v: u8) -> ThreadGcState {
        match v {
            1 => ThreadGcState::Engaged,
            2 => ThreadGcState::Suspended,
            _ => ThreadGcState::Inactive,
        }
    }
}

/// A node in a [`Ctx`]'s local-handle list. Heap-boxed so its address never
/// changes once linked, regardless of how the owning [`LocalHandle`] is
/// moved around by the caller.
struct LocalHandleNode {
    prev: *mut LocalHandleNode,
    value: Cell<ObjectId>,
    owner: *const Ctx,
    unsafe_handle: bool,
}

/// A rooted local variable, pushed onto its [`Ctx`]'s handle list at
/// construction and popped at [`Drop`]. Handles must be dropped in strict
/// LIFO order — in ordinary Rust code this falls out for free from scope
/// rules, the same guarantee the teacher crate's `ShadowStack` entries rely
/// on; `Ctx::destroy_top_local` asserts it rather than trusting it blindly.
pub struct LocalHandle {
    node: Box<LocalHandleNode>,
}

impl LocalHandle {
    pub fn get(&self) -> ObjectId {
        self.node.value.get()
    }

    pub fn set(&self, value: ObjectId) {
        self.node.value.set(value);
    }
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        unsafe {
            (*self.node.owner).destroy_top_local(
                &*self.node as *const LocalHandleNode as *mut LocalHandleNode,
                self.node.unsafe_handle,
            )
        };
    }
}

/// Thread-local mutator context (spec.md §3.7).
///
/// Invariant: a `Ctx` never holds a `cur_page` while `gc_state !=
/// INACTIVE` — the allocation slow path retires `cur_page` before engaging.
pub struct Ctx {
    gc_state: AtomicU8,
    pub(crate) cur_page: Cell<*mut Page>,
    safe_handles: Cell<*mut LocalHandleNode>,
    unsafe_handles: Cell<*mut LocalHandleNode>,
    exception: Cell<ObjectId>,
    stack: Cell<ObjectId>,
    pub(crate) instance_id: usize,
}

impl Ctx {
    pub fn new(instance_id: usize) -> Ctx {
        Ctx {
            gc_state: AtomicU8::new(ThreadGcState::Inactive as u8),
            cur_page: Cell::new(std::ptr::null_mut()),
            safe_handles: Cell::new(std::ptr::null_mut()),
            unsafe_handles: Cell::new(std::ptr::null_mut()),
            exception: Cell::new(ObjectId::BAD),
            stack: Cell::new(ObjectId::BAD),
            instance_id,
        }
    }

    #[inline]
    pub fn gc_state(&self) -> ThreadGcState {
        ThreadGcState::from_u8(self.gc_state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_gc_state(&self, state: ThreadGcState) {
        self.gc_state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub(crate) fn compare_exchange_gc_state(
        &self,
        current: ThreadGcState,
        new: ThreadGcState,
    ) -> bool {
        self.gc_state
            .compare_exchange(
                current as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Pushes a new local handle rooting `value`. The returned handle must
    /// be dropped in strict LIFO order (enforced by `destroy_top_local` via
    /// `Drop`) — callers get this for free by treating [`LocalHandle`] as a
    /// plain stack-allocated local and relying on Rust's own scope rules.
    pub fn init_local(&self, value: ObjectId) -> LocalHandle {
        self.init_local_on(value, &self.safe_handles, false)
    }

    /// Alias for [`Ctx::init_local`] matching spec.md §6's `init_local_with`
    /// name, which the original distinguishes from a bare `init_local` that
    /// seeds the root with VOID before the caller assigns into it. Rust's
    /// `LocalHandle` is always constructed with its value in hand, so both
    /// names resolve to the same path here.
    pub fn init_local_with(&self, value: ObjectId) -> LocalHandle {
        self.init_local(value)
    }

    /// Like [`Ctx::init_local`] but for a value reachable only through
    /// explicit (non-Rust-typed) tracking, e.g. a value crossing an FFI
    /// boundary. Kept on a separate list so root enumeration (spec.md §4.3)
    /// can distinguish the two if a future collaborator needs to (e.g. to
    /// skip conservative scanning for the safe list).
    pub fn init_local_unsafe(&self, value: ObjectId) -> LocalHandle {
        self.init_local_on(value, &self.unsafe_handles, true)
    }

    fn init_local_on(
        &self,
        value: ObjectId,
        list: &Cell<*mut LocalHandleNode>,
        unsafe_handle: bool,
    ) -> LocalHandle {
        let node = Box::new(LocalHandleNode {
            prev: list.get(),
            value: Cell::new(value),
            owner: self as *const Ctx,
            unsafe_handle,
        });
        list.set(&*node as *const LocalHandleNode as *mut LocalHandleNode);
        LocalHandle { node }
    }

    /// Pops the single topmost local handle. Asserts (debug builds) that
    /// `handle` actually is the current top — LIFO ordering is load-bearing
    /// for root enumeration, exactly as spec.md §4.3 requires.
    fn destroy_top_local(&self, handle: *mut LocalHandleNode, unsafe_handle: bool) {
        let list = if unsafe_handle {
            &self.unsafe_handles
        } else {
            &self.safe_handles
        };
        debug_assert_eq!(
            list.get(),
            handle,
            "local handles must be destroyed in strict LIFO order"
        );
        unsafe {
            list.set((*handle).prev);
        }
    }

    /// Pops `count` local handles at once (spec.md §6 `destroy_top_locals`).
    /// For handles already owned as `LocalHandle` values this only makes
    /// sense when the caller has otherwise `mem::forget`-ten them (e.g. a
    /// bump-allocated scope that tracks its own count); ordinary Rust scopes
    /// should just let `Drop` pop one at a time.
    pub fn destroy_top_locals(&self, count: usize) {
        for _ in 0..count {
            let top = self.safe_handles.get();
            if top.is_null() {
                break;
            }
            unsafe {
                self.safe_handles.set((*top).prev);
            }
        }
    }

    /// Walks every local handle root (both lists), newest first, matching
    /// the original's root-scan order.
    pub(crate) fn walk_locals(&self, mut visit: impl FnMut(&Cell<ObjectId>)) {
        unsafe {
            let mut head = self.safe_handles.get();
            while !head.is_null() {
                visit(&(*head).value);
                head = (*head).prev;
            }
            let mut head = self.unsafe_handles.get();
            while !head.is_null() {
                visit(&(*head).value);
                head = (*head).prev;
            }
        }
    }

    pub fn raise_exception(&self, obj: ObjectId) {
        if !self.exception.get().is_bad() {
            debug_assert!(false, "exception already pending");
            return;
        }
        self.exception.set(obj);
    }

    pub fn raise_exception_kind(&self, kind: ExceptionKind) {
        // Exception *payload* construction (turning a kind into a full heap
        // object with a message/backtrace) is the interpreter's job, out of
        // scope here; the core only needs a place to park *some* id marking
        // "an exception of this kind is pending". Tests and non-interpreter
        // callers use a tagged small integer as a stand-in payload.
        self.raise_exception(ObjectId::from_small_int(kind as u8 as isize));
    }

    pub fn is_exception_pending(&self) -> bool {
        !self.exception.get().is_bad()
    }

    pub fn get_exception(&self) -> ObjectId {
        self.exception.get()
    }

    pub fn clear_exception(&self) {
        self.exception.set(ObjectId::BAD);
    }

    pub(crate) fn set_stack(&self, stack: ObjectId) {
        self.stack.set(stack);
    }

    pub(crate) fn stack(&self) -> ObjectId {
        self.stack.get()
    }

    pub(crate) fn exception_cell(&self) -> &Cell<ObjectId> {
        &self.exception
    }

    pub(crate) fn stack_cell(&self) -> &Cell<ObjectId> {
        &self.stack
    }
}

unsafe impl Sync for Ctx {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_pending_round_trips() {
        let ctx = Ctx::new(0);
        assert!(!ctx.is_exception_pending());
        ctx.raise_exception_kind(ExceptionKind::OutOfMemory);
        assert!(ctx.is_exception_pending());
        ctx.clear_exception();
        assert!(!ctx.is_exception_pending());
    }

    #[test]
    fn local_handle_lifo_order_enforced_by_drop() {
        let ctx = Ctx::new(0);
        let a = ctx.init_local(ObjectId::from_small_int(1));
        {
            let b = ctx.init_local(ObjectId::from_small_int(2));
            assert_eq!(b.get().as_small_int(), 2);
        }
        assert_eq!(a.get().as_small_int(), 1);
    }

    #[test]
    fn walk_locals_visits_newest_first() {
        let ctx = Ctx::new(0);
        let a = ctx.init_local(ObjectId::from_small_int(1));
        let b = ctx.init_local(ObjectId::from_small_int(2));

        let mut seen = vec![];
        ctx.walk_locals(|cell| seen.push(cell.get().as_small_int()));
        assert_eq!(seen, vec![2, 1]);
        drop(b);
        drop(a);
    }

    #[test]
    fn destroy_top_locals_pops_requested_count() {
        let ctx = Ctx::new(0);
        let mut handles = vec![];
        for i in 0..5 {
            handles.push(ctx.init_local(ObjectId::from_small_int(i)));
        }
        // Caller opts out of per-handle Drop popping by forgetting them,
        // then reclaims the whole run at once.
        handles.into_iter().for_each(std::mem::forget);
        ctx.destroy_top_locals(3);
        let mut seen = vec![];
        ctx.walk_locals(|cell| seen.push(cell.get().as_small_int()));
        assert_eq!(seen, vec![1, 0]);
    }
}
