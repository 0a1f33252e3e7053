//! Evacuation forwarding (spec.md §8 scenario 2): 1000 tiny objects fill a
//! handful of pages; half are dropped before a GC that evacuates the mostly
//! dead pages; the retained half keep their logical contents even though
//! their ids change.
#[path = "support/mod.rs"]
mod support;

use kos_gc::{Ctx, GcConfig, Instance, Movability, TypeTag};
use support::{read_payload, write_payload, LeafTracer};

#[test]
fn evacuated_objects_forward_and_retain_their_contents() {
    let inst = Instance::new(GcConfig::default()).unwrap();
    let ctx = Ctx::new(0);
    let _slot = inst.register_thread(&ctx).unwrap();

    let mut handles = Vec::new();
    for i in 0..1000isize {
        let id = inst
            .heap
            .alloc_object(&ctx, Movability::Movable, TypeTag::Object, 32)
            .unwrap();
        unsafe { write_payload(id, i) };
        if i % 2 == 0 {
            handles.push((i, id, ctx.init_local(id)));
        }
        // Odd-indexed objects are deliberately left unrooted.
    }

    let tracer = LeafTracer { heap: &inst.heap };
    inst.collect_garbage(&ctx, &tracer, None, None).unwrap();

    assert_eq!(handles.len(), 500);
    let mut any_moved = false;
    for (expected, original_id, handle) in &handles {
        let id = handle.get();
        if id != *original_id {
            any_moved = true;
        }
        let value = unsafe { read_payload(id) };
        assert_eq!(value, *expected, "retained object lost its logical contents");
    }
    assert!(
        any_moved,
        "expected at least one surviving object to have been evacuated to a new address"
    );
}
