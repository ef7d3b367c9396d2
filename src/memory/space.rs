//! The guest address space.
//!
//! [`AddressSpace`] owns all guest-visible memory as an ordered collection of
//! non-overlapping regions. Each region has a base, a length, access
//! permissions, a purpose tag, and its own byte backing; there is no single
//! flat host allocation a stray pointer could wander across. Every access -
//! typed or raw - is bounds-checked against exactly one region and its
//! permissions.
//!
//! # Generations
//!
//! Each reservation is stamped with a monotonically increasing generation.
//! [`GuestPtr`] values created from a region carry that generation, and
//! translation rejects a pointer whose generation no longer matches the
//! region covering its address. A released range may be reused by a later
//! reservation, so this is what turns use-after-release into a hard error
//! instead of silent aliasing.
//!
//! # Concurrency
//!
//! `AddressSpace` itself takes `&mut self` for mutation; concurrent guest
//! threads share it through [`SharedAddressSpace`]. Reservation and release
//! complete promptly under the lock and never wait on guest-controlled
//! conditions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use bitflags::bitflags;

use crate::memory::{GuestPtr, GuestValue};
use crate::{Error, Result};

/// Region granularity: bases and sizes are rounded to 4 KiB pages.
pub const PAGE_SIZE: u32 = 0x1000;

/// An address space shared across all guest threads.
pub type SharedAddressSpace = Arc<RwLock<AddressSpace>>;

bitflags! {
    /// Access permissions of an address-space region.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Protection: u8 {
        /// Guest loads may read the region.
        const READ = 0b001;
        /// Guest stores may write the region.
        const WRITE = 0b010;
        /// Instructions may be fetched from the region.
        const EXEC = 0b100;
    }
}

impl Protection {
    /// Read-write data permissions.
    pub const RW: Protection = Protection::READ.union(Protection::WRITE);
    /// Read-execute code permissions.
    pub const RX: Protection = Protection::READ.union(Protection::EXEC);
}

/// The purpose a region was reserved for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionTag {
    /// Loaded guest code.
    Code,
    /// General data.
    Data,
    /// A guest thread's stack.
    Stack,
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionTag::Code => write!(f, "code"),
            RegionTag::Data => write!(f, "data"),
            RegionTag::Stack => write!(f, "stack"),
        }
    }
}

/// A handle to a reserved region of guest memory.
///
/// `Region` is the caller's proof of a reservation: it names the range, the
/// purpose tag, and the generation of the reservation. It is a plain value;
/// releasing the region through [`AddressSpace::release`] invalidates every
/// pointer created from it without touching the handles themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    base: u32,
    len: u32,
    generation: u64,
    tag: RegionTag,
}

impl Region {
    /// Returns the guest base address of the region.
    #[must_use]
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Returns the region length in bytes.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Returns `true` if the region is empty (never true for live regions).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the first address past the region.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.base + self.len
    }

    /// Returns the purpose tag the region was reserved with.
    #[must_use]
    pub fn tag(&self) -> RegionTag {
        self.tag
    }

    /// Returns the generation stamp of this reservation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Creates a typed pointer at a byte offset into the region.
    ///
    /// The pointer carries this region's generation; it stops resolving the
    /// moment the region is released. Out-of-range offsets are caught at
    /// translation time.
    #[must_use]
    pub fn ptr_at<T>(&self, offset: u32) -> GuestPtr<T> {
        GuestPtr::new(self.base.wrapping_add(offset), self.generation)
    }

    /// Creates a typed pointer to the start of the region.
    #[must_use]
    pub fn ptr<T>(&self) -> GuestPtr<T> {
        self.ptr_at(0)
    }
}

/// Backing storage and bookkeeping for one live region.
struct RegionInner {
    len: u32,
    protection: Protection,
    tag: RegionTag,
    generation: u64,
    data: Vec<u8>,
}

/// The guest-visible memory of one emulated process.
///
/// See the [module documentation](self) for the region and generation model.
///
/// # Example
///
/// ```rust
/// use guestrun::memory::{AddressSpace, Protection, RegionTag};
///
/// let mut mem = AddressSpace::default();
/// let stack = mem.reserve(0x10000, Protection::RW, RegionTag::Stack)?;
///
/// let top = stack.ptr_at::<u32>(stack.len() - 4);
/// mem.write(top, 0x1234)?;
/// assert_eq!(mem.read(top)?, 0x1234);
/// # Ok::<(), guestrun::Error>(())
/// ```
pub struct AddressSpace {
    /// Lowest guest-addressable byte.
    base: u32,
    /// First address past the guest-addressable range.
    end: u32,
    /// Live regions keyed by base address.
    regions: BTreeMap<u32, RegionInner>,
    /// Generation stamp for the next reservation.
    next_generation: u64,
}

impl AddressSpace {
    /// Default lowest guest address.
    pub const DEFAULT_BASE: u32 = 0x0040_0000;
    /// Default guest-addressable size (256 MiB).
    pub const DEFAULT_SIZE: u32 = 0x1000_0000;

    /// Creates an address space covering `[base, base + size)`.
    ///
    /// # Panics
    ///
    /// Panics if the range wraps the 32-bit address limit. The range is a
    /// host configuration value, not guest input.
    #[must_use]
    pub fn new(base: u32, size: u32) -> Self {
        let end = base
            .checked_add(size)
            .expect("guest address range must not wrap");
        AddressSpace {
            base,
            end,
            regions: BTreeMap::new(),
            // Generation 0 is reserved for the null pointer.
            next_generation: 1,
        }
    }

    /// Reserves a region of at least `size` bytes.
    ///
    /// The size is rounded up to [`PAGE_SIZE`] and placed first-fit in the
    /// lowest free range. The region's backing is zeroed. Regions never
    /// overlap and never grow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if no free range fits, or
    /// [`Error::InvalidAddress`] for a zero-size request.
    pub fn reserve(&mut self, size: u32, protection: Protection, tag: RegionTag) -> Result<Region> {
        let size = self.page_round(size)?;
        let base = self.find_free_range(size).ok_or(Error::OutOfMemory { requested: size })?;
        Ok(self.insert_region(base, size, protection, tag))
    }

    /// Reserves a region at a fixed base address.
    ///
    /// Used by loaders that must honor a link-time base. The base must be
    /// page-aligned and the rounded range must lie inside the address space
    /// and overlap no live region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the placement is invalid, or
    /// [`Error::OutOfMemory`] via [`reserve`](Self::reserve) semantics for a
    /// zero-size request.
    pub fn reserve_at(
        &mut self,
        base: u32,
        size: u32,
        protection: Protection,
        tag: RegionTag,
    ) -> Result<Region> {
        let size = self.page_round(size)?;
        if base % PAGE_SIZE != 0 {
            return Err(Error::InvalidAddress {
                address: base,
                reason: "fixed mapping base is not page-aligned",
            });
        }
        let req_end = u64::from(base) + u64::from(size);
        if base < self.base || req_end > u64::from(self.end) {
            return Err(Error::InvalidAddress {
                address: base,
                reason: "fixed mapping outside the guest address range",
            });
        }
        let overlaps = self
            .regions
            .range(..base.wrapping_add(size))
            .next_back()
            .is_some_and(|(&rbase, r)| u64::from(rbase) + u64::from(r.len) > u64::from(base));
        if overlaps {
            return Err(Error::InvalidAddress {
                address: base,
                reason: "fixed mapping overlaps a live region",
            });
        }
        Ok(self.insert_region(base, size, protection, tag))
    }

    /// Releases a region, returning its range for reuse.
    ///
    /// Every pointer carrying the released generation becomes invalid
    /// immediately; dereferencing one afterwards fails with
    /// [`Error::InvalidAddress`] even if a later reservation reuses the
    /// range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the handle does not name a live
    /// region (already released, or a stale generation).
    pub fn release(&mut self, region: Region) -> Result<()> {
        match self.regions.get(&region.base) {
            Some(inner) if inner.generation == region.generation => {
                self.regions.remove(&region.base);
                Ok(())
            }
            Some(_) => Err(Error::InvalidAddress {
                address: region.base,
                reason: "stale region handle",
            }),
            None => Err(Error::InvalidAddress {
                address: region.base,
                reason: "no live region at this base",
            }),
        }
    }

    /// Translates a typed pointer into a read-only span of `count` elements.
    ///
    /// The whole span must fall inside one live, readable region whose
    /// generation matches the pointer's tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] for null, unmapped, stale,
    /// permission-incompatible, or boundary-crossing accesses.
    pub fn translate<T: GuestValue>(&self, ptr: GuestPtr<T>, count: usize) -> Result<&[u8]> {
        let len = T::SIZE * count;
        let (inner, offset) = self.resolve(ptr.address(), len, Protection::READ)?;
        if inner.generation != ptr.generation() {
            return Err(Error::InvalidAddress {
                address: ptr.address(),
                reason: "pointer generation is stale",
            });
        }
        Ok(&inner.data[offset..offset + len])
    }

    /// Translates a typed pointer into a writable span of `count` elements.
    ///
    /// # Errors
    ///
    /// As [`translate`](Self::translate), with WRITE permission required.
    pub fn translate_mut<T: GuestValue>(
        &mut self,
        ptr: GuestPtr<T>,
        count: usize,
    ) -> Result<&mut [u8]> {
        let len = T::SIZE * count;
        let address = ptr.address();
        let generation = ptr.generation();
        let (inner, offset) = self.resolve_mut(address, len, Protection::WRITE)?;
        if inner.generation != generation {
            return Err(Error::InvalidAddress {
                address,
                reason: "pointer generation is stale",
            });
        }
        Ok(&mut inner.data[offset..offset + len])
    }

    /// Reads one typed value through a pointer.
    ///
    /// # Errors
    ///
    /// As [`translate`](Self::translate).
    pub fn read<T: GuestValue>(&self, ptr: GuestPtr<T>) -> Result<T> {
        let bytes = self.translate(ptr, 1)?;
        Ok(T::from_le_bytes(bytes))
    }

    /// Writes one typed value through a pointer.
    ///
    /// # Errors
    ///
    /// As [`translate_mut`](Self::translate_mut).
    pub fn write<T: GuestValue>(&mut self, ptr: GuestPtr<T>, value: T) -> Result<()> {
        let bytes = self.translate_mut(ptr, 1)?;
        value.to_le_bytes(bytes);
        Ok(())
    }

    /// Reads a typed value at a raw guest address.
    ///
    /// Raw-address access is what guest-computed addresses (loads, stores,
    /// instruction fetch, stack-passed arguments) go through; it checks
    /// region containment and `required` permissions but carries no
    /// generation tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] for unmapped, permission-incompatible,
    /// or boundary-crossing accesses.
    pub fn read_value<T: GuestValue>(&self, address: u32, required: Protection) -> Result<T> {
        let (inner, offset) = self.resolve(address, T::SIZE, required)?;
        Ok(T::from_le_bytes(&inner.data[offset..offset + T::SIZE]))
    }

    /// Writes a typed value at a raw guest address.
    ///
    /// # Errors
    ///
    /// As [`read_value`](Self::read_value).
    pub fn write_value<T: GuestValue>(
        &mut self,
        address: u32,
        value: T,
        required: Protection,
    ) -> Result<()> {
        let (inner, offset) = self.resolve_mut(address, T::SIZE, required)?;
        value.to_le_bytes(&mut inner.data[offset..offset + T::SIZE]);
        Ok(())
    }

    /// Reads a byte span at a raw guest address.
    ///
    /// # Errors
    ///
    /// As [`read_value`](Self::read_value).
    pub fn read_bytes(&self, address: u32, len: usize, required: Protection) -> Result<&[u8]> {
        let (inner, offset) = self.resolve(address, len, required)?;
        Ok(&inner.data[offset..offset + len])
    }

    /// Writes a byte span at a raw guest address.
    ///
    /// # Errors
    ///
    /// As [`read_value`](Self::read_value).
    pub fn write_bytes(&mut self, address: u32, data: &[u8], required: Protection) -> Result<()> {
        let (inner, offset) = self.resolve_mut(address, data.len(), required)?;
        inner.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copies `data` into a region at a byte offset, ignoring permissions.
    ///
    /// This is the load-time initialization path: loaders populate
    /// read-execute code regions before any guest instruction runs. The
    /// handle's generation must still match, so a released region cannot be
    /// repopulated by mistake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the handle is stale or the span
    /// does not fit inside the region.
    pub fn populate(&mut self, region: Region, offset: u32, data: &[u8]) -> Result<()> {
        let inner = self.regions.get_mut(&region.base).ok_or(Error::InvalidAddress {
            address: region.base,
            reason: "no live region at this base",
        })?;
        if inner.generation != region.generation {
            return Err(Error::InvalidAddress {
                address: region.base,
                reason: "stale region handle",
            });
        }
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&end| end <= inner.len as usize)
            .ok_or(Error::InvalidAddress {
                address: region.base.wrapping_add(offset),
                reason: "span does not fit inside the region",
            })?;
        inner.data[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Tags a raw guest address with the generation of its containing region.
    ///
    /// This is how a guest-supplied word becomes a [`GuestPtr`]: the address
    /// must currently resolve, and the produced pointer is pinned to the
    /// region's present generation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the address (through the size of
    /// one `T`) does not resolve.
    pub fn tag_ptr<T: GuestValue>(&self, address: u32) -> Result<GuestPtr<T>> {
        let (inner, _) = self.resolve(address, T::SIZE, Protection::empty())?;
        Ok(GuestPtr::new(address, inner.generation))
    }

    /// Returns `true` if the address lies inside a live region.
    #[must_use]
    pub fn contains(&self, address: u32) -> bool {
        self.region_at(address).is_some()
    }

    /// Returns an iterator over live regions as `(base, len, tag)`.
    pub fn regions(&self) -> impl Iterator<Item = (u32, u32, RegionTag)> + '_ {
        self.regions.iter().map(|(&base, r)| (base, r.len, r.tag))
    }

    fn page_round(&self, size: u32) -> Result<u32> {
        if size == 0 {
            return Err(Error::InvalidAddress {
                address: 0,
                reason: "zero-size reservation",
            });
        }
        let rounded = (u64::from(size) + u64::from(PAGE_SIZE) - 1) & !(u64::from(PAGE_SIZE) - 1);
        u32::try_from(rounded).map_err(|_| Error::OutOfMemory { requested: size })
    }

    fn insert_region(
        &mut self,
        base: u32,
        len: u32,
        protection: Protection,
        tag: RegionTag,
    ) -> Region {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.regions.insert(
            base,
            RegionInner {
                len,
                protection,
                tag,
                generation,
                data: vec![0; len as usize],
            },
        );
        Region {
            base,
            len,
            generation,
            tag,
        }
    }

    /// Finds the lowest free range of `size` bytes, first-fit.
    fn find_free_range(&self, size: u32) -> Option<u32> {
        let mut cursor = u64::from(self.base);
        for (&rbase, r) in &self.regions {
            let rbase = u64::from(rbase);
            if rbase.saturating_sub(cursor) >= u64::from(size) {
                break;
            }
            cursor = cursor.max(rbase + u64::from(r.len));
        }
        if cursor + u64::from(size) <= u64::from(self.end) {
            #[allow(clippy::cast_possible_truncation)] // cursor < self.end <= u32::MAX
            Some(cursor as u32)
        } else {
            None
        }
    }

    fn region_at(&self, address: u32) -> Option<(u32, &RegionInner)> {
        self.regions
            .range(..=address)
            .next_back()
            .filter(|(&base, r)| u64::from(address) < u64::from(base) + u64::from(r.len))
            .map(|(&base, r)| (base, r))
    }

    /// Resolves `[address, address + len)` into one live region with the
    /// required permissions, returning the region and the byte offset.
    fn resolve(&self, address: u32, len: usize, required: Protection) -> Result<(&RegionInner, usize)> {
        if address == 0 {
            return Err(Error::InvalidAddress {
                address,
                reason: "null pointer",
            });
        }
        let (base, inner) = self.region_at(address).ok_or(Error::InvalidAddress {
            address,
            reason: "address not in any live region",
        })?;
        let offset = (address - base) as usize;
        if offset + len > inner.len as usize {
            return Err(Error::InvalidAddress {
                address,
                reason: "access crosses the region boundary",
            });
        }
        if !inner.protection.contains(required) {
            return Err(Error::InvalidAddress {
                address,
                reason: "region permissions do not allow this access",
            });
        }
        Ok((inner, offset))
    }

    fn resolve_mut(
        &mut self,
        address: u32,
        len: usize,
        required: Protection,
    ) -> Result<(&mut RegionInner, usize)> {
        // Two-pass: locate the base immutably, then re-borrow mutably.
        let (base, offset) = {
            let (inner, offset) = self.resolve(address, len, required)?;
            let _ = inner;
            let (base, _) = self.region_at(address).ok_or(Error::InvalidAddress {
                address,
                reason: "address not in any live region",
            })?;
            (base, offset)
        };
        let inner = self.regions.get_mut(&base).ok_or(Error::InvalidAddress {
            address,
            reason: "address not in any live region",
        })?;
        Ok((inner, offset))
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        AddressSpace::new(Self::DEFAULT_BASE, Self::DEFAULT_SIZE)
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("base", &format_args!("{:#010x}", self.base))
            .field("end", &format_args!("{:#010x}", self.end))
            .field("regions", &self.regions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_access() {
        let mut mem = AddressSpace::default();
        let region = mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap();

        let ptr = region.ptr_at::<u32>(0x100);
        mem.write(ptr, 0xCAFE_F00D).unwrap();
        assert_eq!(mem.read(ptr).unwrap(), 0xCAFE_F00D);
    }

    #[test]
    fn test_regions_never_overlap() {
        let mut mem = AddressSpace::default();
        let a = mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap();
        let b = mem.reserve(0x2000, Protection::RW, RegionTag::Data).unwrap();
        assert!(a.end() <= b.base() || b.end() <= a.base());
    }

    #[test]
    fn test_bounds_checked() {
        let mut mem = AddressSpace::default();
        let region = mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap();

        // Last in-bounds byte succeeds.
        let last = region.ptr_at::<u8>(region.len() - 1);
        assert!(mem.read(last).is_ok());

        // One past the end fails.
        let past = region.ptr_at::<u8>(region.len());
        assert!(matches!(mem.read(past), Err(Error::InvalidAddress { .. })));
    }

    #[test]
    fn test_access_cannot_cross_region_boundary() {
        let mut mem = AddressSpace::default();
        let a = mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap();
        let _b = mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap();

        // A u32 read straddling the end of region A must fail even though
        // region B starts right after it.
        let straddle = a.ptr_at::<u32>(a.len() - 2);
        assert!(mem.read(straddle).is_err());
    }

    #[test]
    fn test_use_after_release_fails() {
        let mut mem = AddressSpace::default();
        let region = mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap();
        let ptr = region.ptr_at::<u32>(0);
        mem.write(ptr, 1).unwrap();

        mem.release(region).unwrap();
        assert!(mem.read(ptr).is_err());

        // A later reservation may reuse the range; the stale pointer still fails.
        let reused = mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap();
        assert_eq!(reused.base(), region.base());
        assert!(mem.read(ptr).is_err());
        assert!(mem.read(reused.ptr_at::<u32>(0)).is_ok());
    }

    #[test]
    fn test_double_release_fails() {
        let mut mem = AddressSpace::default();
        let region = mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap();
        mem.release(region).unwrap();
        assert!(mem.release(region).is_err());
    }

    #[test]
    fn test_permissions_enforced() {
        let mut mem = AddressSpace::default();
        let code = mem.reserve(0x1000, Protection::RX, RegionTag::Code).unwrap();

        assert!(mem.read(code.ptr_at::<u32>(0)).is_ok());
        assert!(mem.write(code.ptr_at::<u32>(0), 1).is_err());
        assert!(mem.read_value::<u32>(code.base(), Protection::EXEC).is_ok());

        let data = mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap();
        assert!(mem.read_value::<u32>(data.base(), Protection::EXEC).is_err());
    }

    #[test]
    fn test_out_of_memory() {
        let mut mem = AddressSpace::new(0x1000, 0x4000);
        let _a = mem.reserve(0x3000, Protection::RW, RegionTag::Data).unwrap();
        assert!(matches!(
            mem.reserve(0x2000, Protection::RW, RegionTag::Data),
            Err(Error::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_release_allows_reuse() {
        let mut mem = AddressSpace::new(0x1000, 0x2000);
        let region = mem.reserve(0x2000, Protection::RW, RegionTag::Data).unwrap();
        assert!(mem.reserve(0x1000, Protection::RW, RegionTag::Data).is_err());

        mem.release(region).unwrap();
        assert!(mem.reserve(0x1000, Protection::RW, RegionTag::Data).is_ok());
    }

    #[test]
    fn test_reserve_at_fixed_base() {
        let mut mem = AddressSpace::default();
        let base = AddressSpace::DEFAULT_BASE + 0x10_0000;
        let region = mem.reserve_at(base, 0x800, Protection::RX, RegionTag::Code).unwrap();
        assert_eq!(region.base(), base);
        assert_eq!(region.len(), PAGE_SIZE);

        // Overlapping fixed mapping is rejected.
        assert!(mem.reserve_at(base, 0x1000, Protection::RW, RegionTag::Data).is_err());
    }

    #[test]
    fn test_null_never_resolves() {
        let mem = AddressSpace::new(0, 0x10000);
        assert!(mem.read_value::<u32>(0, Protection::empty()).is_err());
    }

    #[test]
    fn test_populate_ignores_protection() {
        let mut mem = AddressSpace::default();
        let code = mem.reserve(0x1000, Protection::RX, RegionTag::Code).unwrap();

        mem.populate(code, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.read_value::<u32>(code.base() + 4, Protection::READ).unwrap(), 0x0403_0201);

        // Out-of-range spans and stale handles are still rejected.
        assert!(mem.populate(code, code.len() - 2, &[0; 4]).is_err());
        mem.release(code).unwrap();
        assert!(mem.populate(code, 0, &[0]).is_err());
    }

    #[test]
    fn test_tag_ptr() {
        let mut mem = AddressSpace::default();
        let region = mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap();

        let tagged = mem.tag_ptr::<u32>(region.base() + 8).unwrap();
        assert_eq!(tagged.generation(), region.generation());
        assert!(mem.tag_ptr::<u32>(0x10).is_err());
    }
}
