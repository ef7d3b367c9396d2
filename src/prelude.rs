//! Commonly used types, re-exported for convenient glob import.
//!
//! ```rust
//! use guestrun::prelude::*;
//!
//! let host = HostState::new(ImportTable::new(), UnimplementedPolicy::StubZero)?;
//! # let _ = host;
//! # Ok::<(), guestrun::Error>(())
//! ```

pub use crate::dispatch::{
    ImportCall, ImportDispatcher, ImportOutcome, ImportTable, Nid, UnimplementedPolicy,
};
pub use crate::host::{ConsolePlatform, ExitCode, HostState, Platform, MAIN_THREAD_STACK_SIZE};
pub use crate::kernel::{Kernel, KernelObject, Uid};
pub use crate::loader::{LoadedImage, Loader, RawImage};
pub use crate::memory::{AddressSpace, GuestPtr, Protection, Region, RegionTag, SharedAddressSpace};
pub use crate::thread::{
    run, spawn_thread, start, CpuContext, GuestThread, RunOutcome, RunStatus, ThreadHandle,
    WaitSpec,
};
pub use crate::{Error, Result};
