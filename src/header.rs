//! Heap object header (spec.md §3.2).
//!
//! Every heap-resident object begins with one word: the size-and-type
//! field. The low byte stores the type tag, which is always an even value so
//! that word's low bit is `0` while the object is live. The upper bits store
//! the object's allocated size in bytes. During evacuation the whole word is
//! overwritten with the forwarding [`ObjectId`] (low bit `1`), so "has this
//! object moved" is answered by a single bit test, and if so the rest of the
//! word *is* the new address.
use modular_bitfield::prelude::*;

use crate::tagged::ObjectId;

/// Closed set of heap object types (spec.md §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
    SmallInteger = 0,
    Float = 1,
    String = 2,
    Object = 3,
    Array = 4,
    Buffer = 5,
    Function = 6,
    Class = 7,
    DynamicProperty = 8,
    Iterator = 9,
    Module = 10,
    StackSegment = 11,
    Opaque = 12,
    HugeTracker = 13,
    ObjectPropertyStorage = 14,
    ArrayStorage = 15,
    BufferStorage = 16,
}

impl TypeTag {
    const COUNT: u8 = 17;

    /// Every tag is even: low bit `0` marks "not a forwarding word".
    const fn encoded(self) -> u8 {
        (self as u8) << 1
    }

    fn from_encoded(bits: u8) -> Option<TypeTag> {
        if bits & 1 != 0 || bits >> 1 >= Self::COUNT {
            return None;
        }
        // Safety: TypeTag is repr(u8), contiguous 0..COUNT, and we just
        // checked bits >> 1 is in range.
        Some(unsafe { std::mem::transmute(bits >> 1) })
    }
}

/// Full-word packed view of a live header: an 8-bit tag byte (low bit always
/// clear) followed by the size in the remaining high bits.
#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
struct Encoded {
    tag: B8,
    size: B56,
}

/// Size-and-type header word. `repr(transparent)` over a `usize` so it can
/// be read and written with a single atomic access and reinterpreted as a
/// raw [`ObjectId`] once forwarded.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct HeapObjectHeader(usize);

impl HeapObjectHeader {
    /// Constructs a live (non-forwarded) header for `tag` sized `size` bytes.
    ///
    /// `size` must already be rounded up to the slot granularity.
    pub fn new(tag: TypeTag, size: usize) -> HeapObjectHeader {
        let enc = Encoded::new().with_tag(tag.encoded()).with_size(size as u64);
        HeapObjectHeader(u64::from_le_bytes(enc.into_bytes()) as usize)
    }

    #[inline(always)]
    fn encoded(self) -> Encoded {
        Encoded::from_bytes((self.0 as u64).to_le_bytes())
    }

    #[inline(always)]
    pub fn is_forwarded(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline(always)]
    pub fn forwarding_target(self) -> ObjectId {
        debug_assert!(self.is_forwarded());
        ObjectId::from_bits(self.0)
    }

    #[inline(always)]
    pub fn set_forwarded(&mut self, target: ObjectId) {
        debug_assert!(target.is_ptr());
        self.0 = target.to_bits();
    }

    #[inline(always)]
    pub fn tag(self) -> TypeTag {
        debug_assert!(!self.is_forwarded());
        TypeTag::from_encoded(self.encoded().tag()).expect("valid type tag in live header")
    }

    #[inline(always)]
    pub fn size(self) -> usize {
        debug_assert!(!self.is_forwarded());
        self.encoded().size() as usize
    }

    #[inline(always)]
    pub fn set_size(&mut self, size: usize) {
        debug_assert!(!self.is_forwarded());
        let mut enc = self.encoded();
        enc.set_size(size as u64);
        self.0 = u64::from_le_bytes(enc.into_bytes()) as usize;
    }

    #[inline(always)]
    pub fn to_bits(self) -> usize {
        self.0
    }

    #[inline(always)]
    pub fn from_bits(bits: usize) -> HeapObjectHeader {
        HeapObjectHeader(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_tag_and_size() {
        for &tag in &[
            TypeTag::Object,
            TypeTag::Array,
            TypeTag::HugeTracker,
            TypeTag::BufferStorage,
        ] {
            for &size in &[32usize, 64, 480, 131040] {
                let hdr = HeapObjectHeader::new(tag, size);
                assert!(!hdr.is_forwarded());
                assert_eq!(hdr.tag(), tag);
                assert_eq!(hdr.size(), size);
            }
        }
    }

    #[test]
    fn live_header_low_bit_is_zero() {
        let hdr = HeapObjectHeader::new(TypeTag::String, 64);
        assert_eq!(hdr.to_bits() & 1, 0);
    }

    #[test]
    fn forwarding_sets_low_bit() {
        let ptr = 0x1000usize;
        let target = unsafe { ObjectId::from_ptr(ptr as *const u8) };
        let mut hdr = HeapObjectHeader::new(TypeTag::Object, 32);
        hdr.set_forwarded(target);
        assert!(hdr.is_forwarded());
        assert_eq!(hdr.forwarding_target(), target);
        assert_eq!(hdr.to_bits() & 1, 1);
    }

    #[test]
    fn all_tags_round_trip_through_encoding() {
        for raw in 0u8..TypeTag::COUNT {
            let tag: TypeTag = unsafe { std::mem::transmute(raw) };
            assert_eq!(TypeTag::from_encoded(tag.encoded()), Some(tag));
        }
    }
}
