//! Shared helpers for crate-level integration tests (spec.md §8's end-to-end
//! scenarios). Not itself a test binary: cargo only treats top-level files
//! under `tests/` as separate test crates, not files under a subdirectory.
use std::collections::HashMap;
use std::mem::size_of;
use std::sync::Mutex;

use kos_gc::mark::Tracer;
use kos_gc::pool::Page;
use kos_gc::{Heap, ObjectId};

/// A tracer for objects with no outgoing references, resolving mark bits
/// through [`Heap::locate`] the way a real embedder would.
pub struct LeafTracer<'h> {
    pub heap: &'h Heap,
}

impl<'h> Tracer for LeafTracer<'h> {
    fn trace_children(&self, _obj: ObjectId, _visit: &mut dyn FnMut(ObjectId)) {}

    fn mark_bit(&self, obj: ObjectId) -> Option<(&Page, usize)> {
        self.heap.locate(obj)
    }
}

/// A tracer driven by an explicit adjacency map the test builds up as it
/// allocates objects, for scenarios that need a multi-hop reference graph
/// without a full embedding object model.
pub struct GraphTracer<'h> {
    pub heap: &'h Heap,
    pub edges: Mutex<HashMap<usize, Vec<ObjectId>>>,
}

impl<'h> GraphTracer<'h> {
    pub fn new(heap: &'h Heap) -> GraphTracer<'h> {
        GraphTracer {
            heap,
            edges: Mutex::new(HashMap::new()),
        }
    }

    pub fn link(&self, parent: ObjectId, child: ObjectId) {
        self.edges
            .lock()
            .unwrap()
            .entry(parent.to_bits())
            .or_insert_with(Vec::new)
            .push(child);
    }
}

impl<'h> Tracer for GraphTracer<'h> {
    fn trace_children(&self, obj: ObjectId, visit: &mut dyn FnMut(ObjectId)) {
        if let Some(children) = self.edges.lock().unwrap().get(&obj.to_bits()) {
            for &c in children {
                visit(c);
            }
        }
    }

    fn mark_bit(&self, obj: ObjectId) -> Option<(&Page, usize)> {
        self.heap.locate(obj)
    }
}

/// Stashes one `isize` right after an object's header word, standing in for
/// an embedder-defined payload field so a test can confirm logical content
/// survives evacuation.
///
/// # Safety
/// `id` must name a live, non-forwarded object with at least
/// `size_of::<usize>() + size_of::<isize>()` bytes.
pub unsafe fn write_payload(id: ObjectId, value: isize) {
    let p = id.as_ptr().add(size_of::<usize>()) as *mut isize;
    p.write_unaligned(value);
}

/// # Safety
/// Same requirements as [`write_payload`].
pub unsafe fn read_payload(id: ObjectId) -> isize {
    let p = id.as_ptr().add(size_of::<usize>()) as *const isize;
    p.read_unaligned()
}
