//! Typed guest pointers.
//!
//! A [`GuestPtr`] is a typed offset into the guest address space plus a
//! generation tag, never a host pointer. Dereferencing always goes through
//! [`AddressSpace::translate`](crate::memory::AddressSpace::translate) (or
//! the typed read/write helpers built on it), which validates that the
//! pointer still lands inside a live region whose generation matches the
//! tag. A pointer into a released region fails on use rather than silently
//! aliasing whatever reservation reused the range.

use std::fmt;
use std::marker::PhantomData;

/// A typed pointer into the guest address space.
///
/// `GuestPtr` carries the guest address, a generation tag identifying the
/// reservation it was created from, and a phantom element type that sizes
/// typed accesses and pointer arithmetic. It is a plain value: copying it is
/// free and holding it grants no access. All dereferencing is mediated by
/// [`AddressSpace`](crate::memory::AddressSpace), which rejects pointers
/// whose region has been released (stale generation) or which would read
/// outside a live region.
///
/// # Example
///
/// ```rust
/// use guestrun::memory::{AddressSpace, Protection, RegionTag};
///
/// let mut mem = AddressSpace::default();
/// let region = mem.reserve(0x1000, Protection::READ | Protection::WRITE, RegionTag::Data)?;
///
/// let ptr = region.ptr_at::<u32>(0x10);
/// mem.write(ptr, 7)?;
/// assert_eq!(mem.read(ptr)?, 7);
///
/// mem.release(region)?;
/// assert!(mem.read(ptr).is_err());
/// # Ok::<(), guestrun::Error>(())
/// ```
pub struct GuestPtr<T> {
    address: u32,
    generation: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> GuestPtr<T> {
    /// Creates a pointer from a raw guest address and a region generation.
    ///
    /// Callers normally obtain pointers from
    /// [`Region::ptr_at`](crate::memory::Region::ptr_at) or
    /// [`AddressSpace::tag_ptr`](crate::memory::AddressSpace::tag_ptr)
    /// instead of constructing them directly.
    #[must_use]
    pub fn new(address: u32, generation: u64) -> Self {
        GuestPtr {
            address,
            generation,
            _marker: PhantomData,
        }
    }

    /// Returns the null guest pointer.
    ///
    /// Null never resolves: [`AddressSpace::translate`] rejects it before
    /// consulting the region table.
    ///
    /// [`AddressSpace::translate`]: crate::memory::AddressSpace::translate
    #[must_use]
    pub fn null() -> Self {
        GuestPtr::new(0, 0)
    }

    /// Returns `true` if this is the null pointer.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    /// Returns the raw guest address.
    #[must_use]
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Returns the generation tag of the reservation this pointer came from.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reinterprets the pointer as a different element type.
    ///
    /// The address and generation are unchanged; only the element size used
    /// for typed accesses and arithmetic changes.
    #[must_use]
    pub fn cast<U>(&self) -> GuestPtr<U> {
        GuestPtr::new(self.address, self.generation)
    }

    /// Offsets the pointer by `count` elements of `T`.
    ///
    /// Arithmetic wraps at the 32-bit boundary like guest address
    /// computation does; an out-of-region result fails at translation time,
    /// not here.
    #[must_use]
    pub fn offset(&self, count: u32) -> GuestPtr<T>
    where
        T: crate::memory::GuestValue,
    {
        #[allow(clippy::cast_possible_truncation)] // Element sizes are all <= 8
        let stride = T::SIZE as u32;
        GuestPtr::new(self.address.wrapping_add(count.wrapping_mul(stride)), self.generation)
    }
}

// Manual impls: derives would add unnecessary `T: Trait` bounds through the
// phantom parameter.
impl<T> Clone for GuestPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GuestPtr<T> {}

impl<T> PartialEq for GuestPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.generation == other.generation
    }
}

impl<T> Eq for GuestPtr<T> {}

impl<T> fmt::Debug for GuestPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuestPtr {{ address: {:#010x}, generation: {} }}", self.address, self.generation)
    }
}

impl<T> fmt::Display for GuestPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.address)
    }
}
