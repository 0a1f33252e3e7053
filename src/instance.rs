//! Instance-wide state (spec.md §3.8): builtin prototypes, the module table,
//! the thread registry, and the heap. `heap_init`/`heap_destroy` (spec.md
//! §6) are this type's constructor and [`Drop`].
use std::cell::Cell;

use log::info;
use parking_lot::Mutex;

use crate::config::GcConfig;
use crate::ctx::Ctx;
use crate::heap::Heap;
use crate::mark::Tracer;
use crate::proptable::PropTable;
use crate::tagged::ObjectId;

/// Number of builtin-type prototype slots (spec.md §3.8 "prototypes for
/// every builtin type"); one per non-storage [`crate::header::TypeTag`]
/// variant.
pub const NUM_PROTOTYPES: usize = 13;

/// One slot in the bounded thread registry (spec.md §5 "Thread lifecycle").
struct ThreadSlot {
    ctx: *const Ctx,
}

/// The thread registry: a fixed-capacity array guarded by its own mutex,
/// separate from the heap mutex (spec.md §5 "Shared resources").
struct ThreadRegistry {
    slots: Vec<Option<ThreadSlot>>,
}

impl ThreadRegistry {
    fn new(capacity: usize) -> ThreadRegistry {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        ThreadRegistry { slots }
    }
}

/// One Kos instance: the unit of isolation the core operates within. All
/// [`Ctx`]s registered against the same `Instance` share its heap, builtin
/// prototypes, and module table.
pub struct Instance {
    pub heap: Heap,
    prototypes: Vec<Cell<ObjectId>>,
    modules: PropTable,
    threads: Mutex<ThreadRegistry>,
    cfg: GcConfig,
}

unsafe impl Sync for Instance {}

impl Instance {
    /// `heap_init` (spec.md §6).
    pub fn new(cfg: GcConfig) -> std::io::Result<Instance> {
        info!("heap_init: pool_size={} page_size={}", cfg.pool_size(), cfg.page_size());
        let heap = Heap::new(cfg)?;
        let mut prototypes = Vec::with_capacity(NUM_PROTOTYPES);
        prototypes.resize_with(NUM_PROTOTYPES, || Cell::new(ObjectId::BAD));
        Ok(Instance {
            heap,
            prototypes,
            modules: PropTable::with_config(cfg.min_props_capacity, cfg.max_prop_reprobes),
            threads: Mutex::new(ThreadRegistry::new(cfg.max_threads)),
            cfg,
        })
    }

    pub fn config(&self) -> &GcConfig {
        &self.cfg
    }

    pub fn prototype(&self, index: usize) -> ObjectId {
        self.prototypes[index].get()
    }

    pub fn set_prototype(&self, index: usize, proto: ObjectId) {
        self.prototypes[index].set(proto);
    }

    pub fn modules(&self) -> &PropTable {
        &self.modules
    }

    /// Registers a new mutator thread, claiming a slot in the bounded
    /// registry. Returns `None` if the registry is full (`MAX_THREADS`,
    /// spec.md §6 table).
    pub fn register_thread(&self, ctx: &Ctx) -> Option<usize> {
        let mut reg = self.threads.lock();
        let slot = reg.slots.iter().position(|s| s.is_none())?;
        reg.slots[slot] = Some(ThreadSlot {
            ctx: ctx as *const Ctx,
        });
        Some(slot)
    }

    pub fn unregister_thread(&self, slot: usize) {
        let mut reg = self.threads.lock();
        reg.slots[slot] = None;
    }

    /// Collects every instance-wide and per-thread root (spec.md §4.3):
    /// prototype slots, the module table's values, and each registered
    /// thread's exception, stack, and local-handle lists.
    pub fn collect_roots(&self) -> Vec<ObjectId> {
        let mut roots = Vec::new();
        for p in &self.prototypes {
            let id = p.get();
            if !id.is_bad() {
                roots.push(id);
            }
        }
        self.modules.for_each(|_k, v| roots.push(v));

        let reg = self.threads.lock();
        for slot in reg.slots.iter().flatten() {
            let ctx = unsafe { &*slot.ctx };
            let exc = ctx.get_exception();
            if !exc.is_bad() {
                roots.push(exc);
            }
            let stack = ctx.stack();
            if !stack.is_bad() {
                roots.push(stack);
            }
            ctx.walk_locals(|cell| {
                let v = cell.get();
                if !v.is_bad() {
                    roots.push(v);
                }
            });
        }
        roots
    }

    /// `collect_garbage` (spec.md §6) with roots gathered automatically from
    /// instance + thread-registry state, rather than requiring the caller to
    /// assemble them by hand. Unlike [`Heap::collect_garbage`], the root
    /// values handed to this method aren't the caller's only copy: once the
    /// heap has fixed up its evacuated pages, this rewrites every prototype
    /// slot, the module table, and every registered thread's exception,
    /// stack, and local handles in place, so holders of a [`crate::ctx::LocalHandle`]
    /// observe the object's new address transparently (spec.md §4.5
    /// "Pointer fixup").
    pub fn collect_garbage(
        &self,
        ctx: &Ctx,
        tracer: &dyn Tracer,
        finalizer: Option<&dyn crate::evacuate::Finalizer>,
        stats: Option<&mut crate::stats::GcStats>,
    ) -> crate::error::Result<()> {
        let mut roots = self.collect_roots();
        self.heap.collect_garbage(ctx, tracer, &mut roots, finalizer, stats)?;
        self.fixup_in_place_roots();
        Ok(())
    }

    /// Re-walks every root-holding location and rewrites any id that names a
    /// since-evacuated object to its new address (spec.md §4.5). Separate
    /// from [`Heap`]'s own root fixup because only `Instance` (and `Ctx`)
    /// know where each root actually lives — `Heap::collect_garbage` only
    /// sees a snapshot copy.
    fn fixup_in_place_roots(&self) {
        for p in &self.prototypes {
            let id = p.get();
            if !id.is_bad() {
                p.set(unsafe { crate::evacuate::fixup_reference(id) });
            }
        }
        self.modules
            .fixup_in_place(|id| unsafe { crate::evacuate::fixup_reference(id) });

        let reg = self.threads.lock();
        for slot in reg.slots.iter().flatten() {
            let ctx = unsafe { &*slot.ctx };
            let exc = ctx.exception_cell();
            let v = exc.get();
            if !v.is_bad() {
                exc.set(unsafe { crate::evacuate::fixup_reference(v) });
            }
            let stack = ctx.stack_cell();
            let v = stack.get();
            if !v.is_bad() {
                stack.set(unsafe { crate::evacuate::fixup_reference(v) });
            }
            ctx.walk_locals(|cell| {
                let v = cell.get();
                if !v.is_bad() {
                    cell.set(unsafe { crate::evacuate::fixup_reference(v) });
                }
            });
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        info!("heap_destroy");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_has_no_prototypes_set() {
        let inst = Instance::new(GcConfig::default()).unwrap();
        assert!(inst.prototype(0).is_bad());
    }

    #[test]
    fn set_prototype_round_trips() {
        let inst = Instance::new(GcConfig::default()).unwrap();
        inst.set_prototype(2, ObjectId::from_small_int(7));
        assert_eq!(inst.prototype(2).as_small_int(), 7);
    }

    #[test]
    fn register_and_unregister_thread_frees_slot() {
        let inst = Instance::new(GcConfig::default()).unwrap();
        let ctx = Ctx::new(0);
        let slot = inst.register_thread(&ctx).unwrap();
        inst.unregister_thread(slot);
        let ctx2 = Ctx::new(0);
        let slot2 = inst.register_thread(&ctx2).unwrap();
        assert_eq!(slot, slot2);
    }

    #[test]
    fn registry_full_returns_none() {
        let mut cfg = GcConfig::default();
        cfg.max_threads = 1;
        let inst = Instance::new(cfg).unwrap();
        let a = Ctx::new(0);
        let b = Ctx::new(0);
        assert!(inst.register_thread(&a).is_some());
        assert!(inst.register_thread(&b).is_none());
    }

    #[test]
    fn collect_roots_includes_pending_exception_and_locals() {
        let inst = Instance::new(GcConfig::default()).unwrap();
        let ctx = Ctx::new(0);
        let _slot = inst.register_thread(&ctx).unwrap();
        ctx.raise_exception(ObjectId::from_small_int(99));
        let handle = ctx.init_local(ObjectId::from_small_int(5));
        let roots = inst.collect_roots();
        assert!(roots.iter().any(|r| r.as_small_int() == 99));
        assert!(roots.iter().any(|r| r.as_small_int() == 5));
        drop(handle);
    }
}
