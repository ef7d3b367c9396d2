//! Guest memory model: address space, regions, and typed guest pointers.
//!
//! This module owns everything the guest can address. The design goal is
//! that host code can never turn guest data into a raw host pointer: every
//! access goes through [`AddressSpace`], which checks region containment,
//! permissions, and the pointer's generation tag on each use.
//!
//! # Key Components
//!
//! - [`AddressSpace`] - Ordered, non-overlapping regions with per-region
//!   backing and first-fit reservation
//! - [`Region`] - Copyable handle proving a reservation
//! - [`GuestPtr`] - Typed guest offset + generation tag, validated on every
//!   dereference
//! - [`Protection`] / [`RegionTag`] - Region permissions and purpose
//! - [`GuestValue`] - Little-endian primitive encoding through guest memory
//! - [`SharedAddressSpace`] - The `Arc<RwLock<_>>` alias all guest threads
//!   share

mod pointer;
mod space;
mod value;

pub use pointer::GuestPtr;
pub use space::{
    AddressSpace, Protection, Region, RegionTag, SharedAddressSpace, PAGE_SIZE,
};
pub use value::GuestValue;
