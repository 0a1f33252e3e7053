//! Prototype-chain-aware property access (spec.md §6 `get_property`,
//! `set_property`, `delete_property`, `has_prototype`, `walk_object`,
//! `set_builtin_dynamic_property`; §4.7 "Deep iteration").
//!
//! [`crate::proptable::PropTable`] itself only knows about one flat slot
//! array; everything here layers the prototype *chain* on top of it, the way
//! spec.md §4.7 says "the owning object layers the chain walk on top". The
//! chain is resolved through the embedder-supplied [`PrototypeChain`] trait
//! (this crate has no opinion on how an object's prototype link is stored —
//! that's the compiler/object-model's concern per spec.md §1's scope line),
//! mirroring how [`crate::mark::Tracer`] lets the embedder describe a
//! reference graph this crate doesn't otherwise know the shape of.
use std::collections::HashSet;

use crate::ctx::Ctx;
use crate::error::{InternalError, Result};
use crate::header::TypeTag;
use crate::heap::{Heap, Movability};
use crate::proptable::{DynamicPropertyHost, PropTable};
use crate::tagged::ObjectId;

/// Resolves an object id to its own property table and its prototype link.
/// Implemented by the embedding object model (spec.md §1: the object/class
/// system itself is out of this crate's scope).
pub trait PrototypeChain {
    fn props(&self, obj: ObjectId) -> &PropTable;
    /// `ObjectId::BAD` if `obj` has no prototype (end of the chain).
    fn prototype_of(&self, obj: ObjectId) -> ObjectId;
}

/// `get_property` without chain walking — reads only `obj`'s own slots.
/// Exposed for callers (e.g. `walk_object`'s depth-0 case) that want exactly
/// that; ordinary property reads should use [`get_property`].
pub fn get_own_property(chain: &impl PrototypeChain, obj: ObjectId, key: ObjectId) -> Option<ObjectId> {
    chain.props(obj).get(key)
}

/// `get_property` (spec.md §6): own slots first, then walk up the prototype
/// chain until a value is found or the chain ends.
pub fn get_property(chain: &impl PrototypeChain, obj: ObjectId, key: ObjectId) -> Result<ObjectId> {
    let mut cur = obj;
    loop {
        if let Some(v) = chain.props(cur).get(key) {
            return Ok(v);
        }
        let proto = chain.prototype_of(cur);
        if proto.is_bad() {
            return Err(InternalError::NotFound);
        }
        cur = proto;
    }
}

/// `set_property` (spec.md §6): always writes to `obj`'s own table — setting
/// a property never implicitly writes through to a prototype, only dynamic
/// properties (via [`DynamicPropertyHost`]) redirect the write.
pub fn set_property(
    chain: &impl PrototypeChain,
    host: &dyn DynamicPropertyHost,
    obj: ObjectId,
    key: ObjectId,
    value: ObjectId,
) -> Result<()> {
    chain.props(obj).set(key, value, host)
}

/// `delete_property` (spec.md §6): only ever touches `obj`'s own table,
/// matching the original's `KOS_delete_property` (no chain walk on delete).
pub fn delete_property(
    chain: &impl PrototypeChain,
    host: &dyn DynamicPropertyHost,
    obj: ObjectId,
    key: ObjectId,
) -> Result<()> {
    chain.props(obj).delete(key, host)
}

/// `has_prototype` (spec.md §6): true if `candidate` appears anywhere in
/// `obj`'s prototype chain (not counting `obj` itself).
pub fn has_prototype(chain: &impl PrototypeChain, obj: ObjectId, candidate: ObjectId) -> bool {
    let mut cur = obj;
    loop {
        let proto = chain.prototype_of(cur);
        if proto.is_bad() {
            return false;
        }
        if proto == candidate {
            return true;
        }
        cur = proto;
    }
}

/// Deep property iterator (spec.md §4.7 "Deep iteration"): walks `obj`'s own
/// keys, then each prototype's in turn up to `depth` levels, skipping any key
/// already yielded by a closer-to-`obj` table via a side set.
///
/// `depth == 0` means "own properties only"; `depth == u32::MAX` walks the
/// entire chain, matching the original's "no limit" sentinel.
pub struct DeepIter<'a, C: PrototypeChain> {
    chain: &'a C,
    current: ObjectId,
    levels_left: u32,
    seen: HashSet<usize>,
    pending: Vec<(ObjectId, ObjectId)>,
    exhausted: bool,
}

/// `walk_object(depth)` (spec.md §6).
pub fn walk_object<C: PrototypeChain>(chain: &C, obj: ObjectId, depth: u32) -> DeepIter<'_, C> {
    let mut pending = Vec::new();
    chain.props(obj).for_each(|k, v| pending.push((k, v)));
    DeepIter {
        chain,
        current: obj,
        levels_left: depth,
        seen: HashSet::new(),
        pending,
        exhausted: false,
    }
}

impl<'a, C: PrototypeChain> Iterator for DeepIter<'a, C> {
    type Item = (ObjectId, ObjectId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while let Some((k, v)) = self.pending.pop() {
                if self.seen.insert(k.to_bits()) {
                    return Some((k, v));
                }
            }
            if self.exhausted || self.levels_left == 0 {
                return None;
            }
            let proto = self.chain.prototype_of(self.current);
            if proto.is_bad() {
                self.exhausted = true;
                return None;
            }
            self.current = proto;
            self.levels_left -= 1;
            self.chain.props(proto).for_each(|k, v| self.pending.push((k, v)));
        }
    }
}

/// Size in bytes of a heap-resident `dynamic-property` object: two
/// [`ObjectId`] words (getter, setter), following the size-and-type header
/// (spec.md §3.2's closed type set includes `dynamic-property`).
const DYNAMIC_PROPERTY_PAYLOAD_BYTES: usize = 2 * std::mem::size_of::<usize>();

/// `set_builtin_dynamic_property(getter, setter)` (spec.md §6): allocates a
/// `dynamic-property`-tagged heap object carrying the getter/setter pair and
/// installs it at `key` in `obj`'s own table, bypassing the normal `set`
/// dynamic-property interception (that interception exists for *user*
/// writes to an already-installed dynamic property, not for installing one
/// in the first place).
pub fn set_builtin_dynamic_property(
    heap: &Heap,
    ctx: &Ctx,
    chain: &impl PrototypeChain,
    obj: ObjectId,
    key: ObjectId,
    getter: ObjectId,
    setter: ObjectId,
) -> Result<()> {
    let id = heap.alloc_object(
        ctx,
        Movability::Movable,
        TypeTag::DynamicProperty,
        DYNAMIC_PROPERTY_PAYLOAD_BYTES,
    )?;
    unsafe { write_dynamic_property_fields(id, getter, setter) };
    chain.props(obj).set_raw(key, id)
}

/// Reads the `(getter, setter)` pair out of a `dynamic-property` object
/// previously installed by [`set_builtin_dynamic_property`].
///
/// # Safety
/// `id` must be a live `dynamic-property` object (spec.md §3.2), i.e. one
/// produced by [`set_builtin_dynamic_property`] and not yet evacuated past
/// this read (callers hold it via a local handle across any safepoint).
pub unsafe fn read_dynamic_property_fields(id: ObjectId) -> (ObjectId, ObjectId) {
    let payload = id.as_ptr().add(std::mem::size_of::<usize>()) as *const usize;
    (
        ObjectId::from_bits(std::ptr::read(payload)),
        ObjectId::from_bits(std::ptr::read(payload.add(1))),
    )
}

unsafe fn write_dynamic_property_fields(id: ObjectId, getter: ObjectId, setter: ObjectId) {
    let payload = id.as_ptr().add(std::mem::size_of::<usize>()) as *mut usize;
    std::ptr::write(payload, getter.to_bits());
    std::ptr::write(payload.add(1), setter.to_bits());
}
