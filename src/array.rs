//! Lock-free array storage (spec.md §3.5, §4.8).
//!
//! An ordered sequence of values backed by a flat, power-of-two-capacity
//! slot array. Slots beyond the logical `size` are always TOMBSTONE. A
//! resize publishes a fresh, larger storage into `next` and every op
//! cooperatively salvages old slots into it before retrying, mirroring
//! [`crate::proptable`]'s migration protocol but moving each element to the
//! *same* index rather than rehashing it.
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{ExceptionKind, InternalError, Result};
use crate::tagged::ObjectId;

struct ArrayStorageData {
    capacity: usize,
    slots: Box<[AtomicUsize]>,
    /// Slots in this generation not yet migrated to `next`, counted down to
    /// zero during salvage (spec.md §4.8 "Lifecycle of a resize").
    num_slots_open: AtomicUsize,
    next: AtomicPtr<ArrayStorageData>,
}

impl ArrayStorageData {
    fn with_capacity(capacity: usize) -> ArrayStorageData {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || AtomicUsize::new(ObjectId::TOMBSTONE.to_bits()));
        ArrayStorageData {
            capacity,
            slots: slots.into_boxed_slice(),
            num_slots_open: AtomicUsize::new(capacity),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }
}

/// A mutable, resizable, lock-free sequence (spec.md §4.8). `size` is the
/// logical length; `capacity` (the backing storage's slot count) only ever
/// grows.
pub struct ArrayStorage {
    storage: AtomicPtr<ArrayStorageData>,
    size: AtomicUsize,
    immutable: AtomicBool,
    /// Superseded generations, unlinked from `storage` but not yet freed —
    /// same rationale as [`crate::proptable::PropTable`]'s `retired` field:
    /// a reader holding a `&ArrayStorageData` from a `load()` taken just
    /// before the swap may still be mid-operation against it, so freeing
    /// immediately on the winning CAS (as both `salvage` and `insert_range`
    /// used to) is a use-after-free. Freed only in `ArrayStorage::drop`.
    retired: Mutex<Vec<*mut ArrayStorageData>>,
}

impl ArrayStorage {
    pub fn new(initial_size: usize) -> ArrayStorage {
        let capacity = initial_size.max(1).next_power_of_two();
        let data = Box::into_raw(Box::new(ArrayStorageData::with_capacity(capacity)));
        ArrayStorage {
            storage: AtomicPtr::new(data),
            size: AtomicUsize::new(initial_size),
            immutable: AtomicBool::new(false),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn set_immutable(&self) {
        self.immutable.store(true, Ordering::Release);
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable.load(Ordering::Acquire)
    }

    fn load(&self) -> &ArrayStorageData {
        unsafe { &*self.storage.load(Ordering::Acquire) }
    }

    fn check_mutable(&self) -> Result<()> {
        if self.is_immutable() {
            Err(InternalError::Internal)
        } else {
            Ok(())
        }
    }

    /// Normalizes a signed index (spec.md §4.8: a negative index counts back
    /// from the end, so `-1` names the last element) against the current
    /// logical length, then bounds-checks it. Every public index-taking
    /// operation goes through this before touching backing storage.
    fn normalize_index(&self, i: isize) -> Result<usize> {
        let len = self.len() as isize;
        let idx = if i < 0 { i + len } else { i };
        if idx < 0 || idx >= len {
            return Err(InternalError::NotFound);
        }
        Ok(idx as usize)
    }

    /// Reads index `i` (negative counts from the end), following `next`
    /// forwarding pointers on CLOSED.
    pub fn read(&self, i: isize) -> Result<ObjectId> {
        let i = self.normalize_index(i)?;
        self.read_at(i)
    }

    fn read_at(&self, i: usize) -> Result<ObjectId> {
        let mut table = self.load();
        loop {
            let raw = ObjectId::from_bits(table.slots[i].load(Ordering::Acquire));
            if raw.is_closed() {
                table = self.help_migrate(table);
                continue;
            }
            return Ok(raw);
        }
    }

    /// Writes index `i` (negative counts from the end).
    pub fn write(&self, i: isize, value: ObjectId) -> Result<()> {
        self.check_mutable()?;
        let i = self.normalize_index(i)?;
        self.write_at(i, value)
    }

    fn write_at(&self, i: usize, value: ObjectId) -> Result<()> {
        let mut table = self.load();
        loop {
            let raw = table.slots[i].load(Ordering::Acquire);
            if ObjectId::from_bits(raw).is_closed() {
                table = self.help_migrate(table);
                continue;
            }
            if table.slots[i]
                .compare_exchange(raw, value.to_bits(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Compare-and-swaps index `i` (negative counts from the end).
    pub fn cas(&self, i: isize, expected: ObjectId, new_value: ObjectId) -> Result<bool> {
        self.check_mutable()?;
        let i = self.normalize_index(i)?;
        let table = self.load();
        // A CLOSED read means another thread is migrating this index; the
        // caller's expected value can't possibly match, so report failure
        // rather than transparently retrying — callers compare-and-swap in
        // a loop anyway, and this avoids silently upgrading intent.
        Ok(table.slots[i]
            .compare_exchange(
                expected.to_bits(),
                new_value.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok())
    }

    /// Appends `value`, returning its new index (spec.md §4.8 "push").
    pub fn push(&self, value: ObjectId, max_array_size: usize) -> Result<usize> {
        self.check_mutable()?;
        loop {
            let cur = self.size.load(Ordering::Acquire);
            if cur >= max_array_size {
                return Err(InternalError::OutOfMemory);
            }
            let table = self.load();
            if cur >= table.capacity {
                self.resize(table, (cur + 1).max(table.capacity * 2));
                continue;
            }
            if self
                .size
                .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // Claimed the index; race to fill it. Another pusher cannot
                // also claim this index (size CAS is unique), so a plain
                // store suffices once we own the slot.
                let mut table = table;
                loop {
                    let raw = table.slots[cur].load(Ordering::Acquire);
                    if ObjectId::from_bits(raw).is_closed() {
                        table = self.help_migrate(table);
                        continue;
                    }
                    table.slots[cur].store(value.to_bits(), Ordering::Release);
                    break;
                }
                return Ok(cur);
            }
        }
    }

    /// Removes and returns the last element (spec.md §4.8; documented as not
    /// perfectly atomic with respect to a concurrent `push` racing on the
    /// same tail index — see `DESIGN.md`).
    pub fn pop(&self) -> Result<ObjectId> {
        self.check_mutable()?;
        loop {
            let cur = self.size.load(Ordering::Acquire);
            if cur == 0 {
                return Err(InternalError::NotFound);
            }
            let idx = cur - 1;
            let table = self.load();
            let raw = ObjectId::from_bits(table.slots[idx].load(Ordering::Acquire));
            if raw.is_closed() {
                self.help_migrate(table);
                continue;
            }
            if self
                .size
                .compare_exchange(cur, idx, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                table.slots[idx].store(ObjectId::TOMBSTONE.to_bits(), Ordering::Release);
                return Ok(raw);
            }
        }
    }

    /// Grows logical `size` to `new_size`, filling new slots with TOMBSTONE
    /// (or a fill value via [`ArrayStorage::fill`] afterward).
    pub fn resize_len(&self, new_size: usize, max_array_size: usize) -> Result<()> {
        self.check_mutable()?;
        if new_size > max_array_size {
            return Err(InternalError::OutOfMemory);
        }
        let table = self.load();
        if new_size > table.capacity {
            self.resize(table, new_size.next_power_of_two());
        }
        self.size.store(new_size, Ordering::Release);
        Ok(())
    }

    /// Grows backing capacity to at least `min_capacity` without touching
    /// logical `size` (spec.md §6 `array_reserve`): lets a caller that knows
    /// it is about to `push` many values pay for one resize up front instead
    /// of several doubling resizes along the way.
    pub fn reserve(&self, min_capacity: usize) -> Result<()> {
        self.check_mutable()?;
        let table = self.load();
        if min_capacity > table.capacity {
            self.resize(table, min_capacity.next_power_of_two());
        }
        Ok(())
    }

    pub fn fill(&self, start: usize, end: usize, value: ObjectId) -> Result<()> {
        self.check_mutable()?;
        let len = self.len();
        if start > end || end > len {
            return Err(InternalError::NotFound);
        }
        for i in start..end {
            self.write_at(i, value)?;
        }
        Ok(())
    }

    /// Returns a snapshot copy of `[start, end)`. Not a view: subsequent
    /// mutation of the original does not affect it, matching the original's
    /// "slice returns a new array" semantics.
    pub fn slice(&self, start: usize, end: usize) -> Result<Vec<ObjectId>> {
        let len = self.len();
        if start > end || end > len {
            return Err(InternalError::NotFound);
        }
        let mut out = Vec::with_capacity(end - start);
        for i in start..end {
            out.push(self.read_at(i)?);
        }
        Ok(out)
    }

    /// Replaces `[start, end)` with `values`. Documented (spec.md §4.8) as
    /// not yet lock-free: takes a copy-on-write path, building an entirely
    /// new backing storage and publishing it, rather than salvaging slot by
    /// slot. Concurrent pushes/pops racing with an insert must be serialized
    /// by the caller.
    pub fn insert_range(&self, start: usize, end: usize, values: &[ObjectId]) -> Result<()> {
        self.check_mutable()?;
        let len = self.len();
        if start > end || end > len {
            return Err(InternalError::NotFound);
        }
        let new_len = len - (end - start) + values.len();
        let new_capacity = new_len.max(1).next_power_of_two();
        let fresh = ArrayStorageData::with_capacity(new_capacity);
        for i in 0..start {
            fresh.slots[i].store(self.read_at(i)?.to_bits(), Ordering::Relaxed);
        }
        for (i, v) in values.iter().enumerate() {
            fresh.slots[start + i].store(v.to_bits(), Ordering::Relaxed);
        }
        for i in end..len {
            let dest = start + values.len() + (i - end);
            fresh.slots[dest].store(self.read_at(i)?.to_bits(), Ordering::Relaxed);
        }
        let fresh_ptr = Box::into_raw(Box::new(fresh));
        let old_ptr = self.storage.swap(fresh_ptr, Ordering::AcqRel);
        self.size.store(new_len, Ordering::Release);
        // Not freed here: a concurrent reader may have loaded `old_ptr` via
        // `self.load()` just before this swap and still be mid-read against
        // it (see the `retired` field doc comment). Retired instead.
        self.retired.lock().push(old_ptr);
        Ok(())
    }

    fn resize(&self, table: &ArrayStorageData, min_capacity: usize) {
        let existing = table.next.load(Ordering::Acquire);
        let fresh = if existing.is_null() {
            let cap = min_capacity.max(table.capacity * 2).next_power_of_two();
            let new_data = Box::into_raw(Box::new(ArrayStorageData::with_capacity(cap)));
            match table.next.compare_exchange(
                std::ptr::null_mut(),
                new_data,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => new_data,
                Err(actual) => {
                    unsafe { drop(Box::from_raw(new_data)) };
                    actual
                }
            }
        } else {
            existing
        };
        self.salvage(table, unsafe { &*fresh });
    }

    /// Moves every slot of `old` into `new_table` at the *same* index,
    /// spreading writer contention by starting at an offset derived from how
    /// much work is already done (spec.md §4.8).
    fn salvage(&self, old: &ArrayStorageData, new_table: &ArrayStorageData) {
        let remaining = old.num_slots_open.load(Ordering::Acquire);
        let start = old.capacity.saturating_sub(remaining.min(old.capacity));
        for offset in 0..old.capacity {
            let i = (start + offset) % old.capacity;
            loop {
                let raw = old.slots[i].load(Ordering::Acquire);
                if ObjectId::from_bits(raw).is_closed() {
                    break;
                }
                let _ = new_table.slots[i].compare_exchange(
                    ObjectId::TOMBSTONE.to_bits(),
                    raw,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                if old.slots[i]
                    .compare_exchange(raw, ObjectId::CLOSED.to_bits(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    old.num_slots_open.fetch_sub(1, Ordering::AcqRel);
                    break;
                }
                // Lost the race (someone wrote a new value); retry with it.
            }
        }

        if old.num_slots_open.load(Ordering::Acquire) == 0 {
            let old_ptr = old as *const ArrayStorageData as *mut ArrayStorageData;
            if self
                .storage
                .compare_exchange(
                    old_ptr,
                    new_table as *const ArrayStorageData as *mut ArrayStorageData,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.retired.lock().push(old_ptr);
            }
        }
    }

    fn help_migrate<'a>(&self, table: &'a ArrayStorageData) -> &'a ArrayStorageData {
        let next_ptr = table.next.load(Ordering::Acquire);
        debug_assert!(!next_ptr.is_null(), "CLOSED slot implies a resize is in flight");
        let next = unsafe { &*next_ptr };
        self.salvage(table, next);
        let current = self.storage.load(Ordering::Acquire);
        if current == next_ptr {
            next
        } else {
            self.load()
        }
    }
}

impl Drop for ArrayStorage {
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(self.storage.load(Ordering::Acquire))) };
        for ptr in self.retired.get_mut().drain(..) {
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
}

unsafe impl Send for ArrayStorage {}
unsafe impl Sync for ArrayStorage {}

pub fn read_only_violation() -> ExceptionKind {
    ExceptionKind::ReadOnly
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let a = ArrayStorage::new(4);
        a.write(0, ObjectId::from_small_int(9)).unwrap();
        assert_eq!(a.read(0).unwrap().as_small_int(), 9);
    }

    #[test]
    fn read_out_of_range_is_not_found() {
        let a = ArrayStorage::new(2);
        assert!(matches!(a.read(5), Err(InternalError::NotFound)));
    }

    #[test]
    fn negative_index_counts_back_from_the_end() {
        let a = ArrayStorage::new(0);
        for i in 0..5 {
            a.push(ObjectId::from_small_int(i), 1 << 20).unwrap();
        }
        assert_eq!(a.read(-1).unwrap().as_small_int(), 4);
        assert_eq!(a.read(-5).unwrap().as_small_int(), 0);
        assert!(matches!(a.read(-6), Err(InternalError::NotFound)));
    }

    #[test]
    fn negative_index_write_and_cas_target_the_same_slot_as_the_equivalent_positive_index() {
        let a = ArrayStorage::new(0);
        for i in 0..3 {
            a.push(ObjectId::from_small_int(i), 1 << 20).unwrap();
        }
        a.write(-1, ObjectId::from_small_int(99)).unwrap();
        assert_eq!(a.read(2).unwrap().as_small_int(), 99);

        assert!(a
            .cas(-2, ObjectId::from_small_int(1), ObjectId::from_small_int(42))
            .unwrap());
        assert_eq!(a.read(1).unwrap().as_small_int(), 42);
    }

    #[test]
    fn push_grows_size_and_is_readable() {
        let a = ArrayStorage::new(0);
        let idx = a.push(ObjectId::from_small_int(1), 1 << 20).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(a.len(), 1);
        assert_eq!(a.read(0).unwrap().as_small_int(), 1);
    }

    #[test]
    fn push_past_capacity_triggers_resize() {
        let a = ArrayStorage::new(1);
        for i in 0..40 {
            a.push(ObjectId::from_small_int(i), 1 << 20).unwrap();
        }
        assert_eq!(a.len(), 40);
        for i in 0..40 {
            assert_eq!(a.read(i).unwrap().as_small_int(), i as isize);
        }
    }

    #[test]
    fn pop_reverses_push() {
        let a = ArrayStorage::new(0);
        a.push(ObjectId::from_small_int(1), 1 << 20).unwrap();
        a.push(ObjectId::from_small_int(2), 1 << 20).unwrap();
        assert_eq!(a.pop().unwrap().as_small_int(), 2);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn cas_only_succeeds_against_expected_value() {
        let a = ArrayStorage::new(1);
        a.write(0, ObjectId::from_small_int(1)).unwrap();
        assert!(!a
            .cas(0, ObjectId::from_small_int(2), ObjectId::from_small_int(3))
            .unwrap());
        assert!(a
            .cas(0, ObjectId::from_small_int(1), ObjectId::from_small_int(3))
            .unwrap());
        assert_eq!(a.read(0).unwrap().as_small_int(), 3);
    }

    #[test]
    fn immutable_array_rejects_mutation() {
        let a = ArrayStorage::new(1);
        a.set_immutable();
        assert!(a.write(0, ObjectId::from_small_int(1)).is_err());
        assert!(a.push(ObjectId::from_small_int(1), 10).is_err());
    }

    #[test]
    fn slice_returns_independent_snapshot() {
        let a = ArrayStorage::new(0);
        for i in 0..5 {
            a.push(ObjectId::from_small_int(i), 1 << 20).unwrap();
        }
        let s = a.slice(1, 4).unwrap();
        assert_eq!(
            s.iter().map(|v| v.as_small_int()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn insert_range_splices_in_new_values() {
        let a = ArrayStorage::new(0);
        for i in 0..5 {
            a.push(ObjectId::from_small_int(i), 1 << 20).unwrap();
        }
        a.insert_range(
            1,
            3,
            &[ObjectId::from_small_int(100), ObjectId::from_small_int(101)],
        )
        .unwrap();
        let all: Vec<_> = (0..a.len()).map(|i| a.read(i as isize).unwrap().as_small_int()).collect();
        assert_eq!(all, vec![0, 100, 101, 3, 4]);
    }

    #[test]
    fn fill_overwrites_a_range() {
        let a = ArrayStorage::new(3);
        a.fill(0, 3, ObjectId::from_small_int(7)).unwrap();
        for i in 0..3 {
            assert_eq!(a.read(i).unwrap().as_small_int(), 7);
        }
    }

    #[test]
    fn reserve_grows_capacity_without_changing_len() {
        let a = ArrayStorage::new(1);
        a.reserve(64).unwrap();
        assert_eq!(a.len(), 1);
        for i in 0..64 {
            a.push(ObjectId::from_small_int(i), 1 << 20).unwrap();
        }
        assert_eq!(a.len(), 65);
    }
}
