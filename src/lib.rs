//! # guestrun
//!
//! A high-level-emulation runtime core: a bounds-checked guest address
//! space, a uid-keyed kernel object registry, guest threads with a full
//! lifecycle state machine, and nid-keyed dispatch of guest import calls to
//! host handlers.
//!
//! The crate emulates a process, not a CPU: guest code runs against a
//! compact word-coded reference instruction set, and every call the guest
//! makes into its platform libraries is intercepted by numeric identity
//! (nid) and serviced by a host-side handler. Package parsing and real
//! CPU backends stay outside, behind the [`loader::Loader`] seam and the
//! engine's step loop.
//!
//! # Quick Start
//!
//! ```rust
//! use guestrun::dispatch::{ImportTable, Nid, ImportOutcome, UnimplementedPolicy};
//! use guestrun::host::{HostState, MAIN_THREAD_STACK_SIZE};
//! use guestrun::loader::RawImage;
//! use guestrun::thread::{isa, run, RunOutcome};
//!
//! // A guest program that calls one import and returns its result.
//! let mut words = vec![];
//! words.extend(isa::import(Nid::new(0x9D10_F4A2)));
//! words.push(isa::ret());
//!
//! let mut table = ImportTable::new();
//! table.register(Nid::new(0x9D10_F4A2), "sceAnswer", |_call| {
//!     Ok(ImportOutcome::Return(42))
//! })?;
//!
//! let host = HostState::new(table, UnimplementedPolicy::FaultThread)?;
//! let image = RawImage::from_bytes(isa::assemble(&words));
//! let loaded = host.load_module(&image)?;
//!
//! let main = host.spawn_guest_thread(loaded.entry, MAIN_THREAD_STACK_SIZE)?;
//! assert_eq!(run(&main)?, RunOutcome::Finished(42));
//! # Ok::<(), guestrun::Error>(())
//! ```
//!
//! # Architecture
//!
//! - [`memory`] - Guest address space, regions, typed generation-tagged
//!   pointers
//! - [`kernel`] - Uid allocation and the kernel object registry
//! - [`thread`] - Guest thread lifecycle and the execution engine
//! - [`dispatch`] - Import tables, argument marshalling, dispatch policy
//! - [`loader`] - The module-loading seam and the flat raw-image loader
//! - [`host`] - Composition root, platform interface, bootstrap exit codes
//!
//! All guest-facing state is internally synchronized; handles are cheap to
//! clone and safe to share across host threads.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod error;

pub mod dispatch;
pub mod host;
pub mod kernel;
pub mod loader;
pub mod memory;
pub mod prelude;
pub mod thread;

pub use error::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
