//! Compile-time-tunable knobs, collected into a runtime-checked config.
//!
//! The original C runtime (`kos_config.h`) expresses these as preprocessor
//! `#define`s baked into the binary. This crate keeps the same defaults but
//! makes them part of a [`GcConfig`] value so a single process can run more
//! than one [`Instance`](crate::instance::Instance) with different knobs,
//! e.g. in tests.

/// `pool_size = 1 << pool_bits`.
pub const DEFAULT_POOL_BITS: u32 = 19;
/// `page_size = 1 << page_bits`.
pub const DEFAULT_PAGE_BITS: u32 = 12;
/// `slot_size = 1 << obj_align_bits`.
pub const DEFAULT_OBJ_ALIGN_BITS: u32 = 5;

const MIB: usize = 1024 * 1024;

/// Runtime configuration for a [`Heap`](crate::heap::Heap).
///
/// Mirrors the tunables listed in the "External interfaces" section of the
/// design: pool/page geometry, OOM and GC-trigger thresholds, and protocol
/// limits for the lock-free property table and array storage.
#[derive(Clone, Copy, Debug)]
pub struct GcConfig {
    /// `pool_size = 1 << pool_bits`. Default 19 (512 KiB).
    pub pool_bits: u32,
    /// `page_size = 1 << page_bits`. Default 12 (4 KiB).
    pub page_bits: u32,
    /// `slot_size = 1 << obj_align_bits`. Default 5 (32 bytes).
    pub obj_align_bits: u32,
    /// Cap on live heap bytes before allocation raises out-of-memory.
    pub max_heap_size: usize,
    /// used/max ratio (0.0-1.0) that triggers an automatic collection.
    pub gc_threshold: f64,
    /// Retain a page in place (no evacuation) if its live-slot ratio is at
    /// least this.
    pub migration_thresh: f64,
    /// Pages scanned from the head of the used list in the allocation slow
    /// path before giving up and retiring the current page.
    pub max_page_seek: u32,
    /// Requests larger than this many bytes bypass the paged heap and go to
    /// the huge-object tracker.
    pub max_heap_obj_size: usize,
    /// Cap on array storage capacity (elements).
    pub max_array_size: usize,
    /// Linear-probe limit in the property table before a resize is forced.
    pub max_prop_reprobes: u32,
    /// Initial property-table capacity (slots), also the floor below which
    /// resize-on-load-factor kicks in.
    pub min_props_capacity: u32,
    /// Thread-registry slot count.
    pub max_threads: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            pool_bits: DEFAULT_POOL_BITS,
            page_bits: DEFAULT_PAGE_BITS,
            obj_align_bits: DEFAULT_OBJ_ALIGN_BITS,
            max_heap_size: 64 * MIB,
            gc_threshold: 0.75,
            migration_thresh: 0.90,
            max_page_seek: 8,
            max_heap_obj_size: 512,
            max_array_size: 1 << 28,
            max_prop_reprobes: 8,
            min_props_capacity: 4,
            max_threads: 32,
        }
    }
}

impl GcConfig {
    pub fn pool_size(&self) -> usize {
        1usize << self.pool_bits
    }

    pub fn page_size(&self) -> usize {
        1usize << self.page_bits
    }

    pub fn slot_size(&self) -> usize {
        1usize << self.obj_align_bits
    }

    pub fn pages_per_pool(&self) -> usize {
        self.pool_size() / self.page_size()
    }

    /// Validates invariants a correct config must hold. Called once from
    /// `Heap::new`; a config assembled by hand (not `Default::default()`)
    /// can otherwise violate the bit-packing assumptions baked into the
    /// object header.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.page_bits <= self.obj_align_bits {
            return Err("page_bits must exceed obj_align_bits");
        }
        if self.pool_bits <= self.page_bits {
            return Err("pool_bits must exceed page_bits");
        }
        if self.max_heap_obj_size >= self.page_size() {
            return Err("max_heap_obj_size must fit within a page");
        }
        if !(0.0..=1.0).contains(&self.gc_threshold) {
            return Err("gc_threshold must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.migration_thresh) {
            return Err("migration_thresh must be in [0, 1]");
        }
        if self.max_threads == 0 {
            return Err("max_threads must be nonzero");
        }
        Ok(())
    }
}
