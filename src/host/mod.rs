//! Host-side composition and bootstrap.
//!
//! [`HostState`] is the composition root: it owns the shared address space,
//! the kernel, and the import dispatcher, and wires a new guest thread's
//! dispatcher view to its uid. [`Platform`] is the narrow interface to the
//! surrounding environment (a monotonic tick source and an error surface);
//! [`ConsolePlatform`] is the stderr/`Instant` implementation the CLI uses.
//!
//! [`ExitCode`] enumerates the bootstrap's process exit codes, ordered the
//! way the bootstrap can fail: arguments, platform, host, module, thread
//! creation, thread execution.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use crate::dispatch::{DispatcherView, ImportDispatcher, ImportTable, UnimplementedPolicy};
use crate::kernel::{Kernel, KernelObject, Uid};
use crate::loader::{LoadedImage, Loader};
use crate::memory::{AddressSpace, GuestPtr, SharedAddressSpace};
use crate::thread::{spawn_thread, ThreadHandle};
use crate::{Error, Result};

/// Stack size of the main guest thread (1 MiB).
pub const MAIN_THREAD_STACK_SIZE: u32 = 0x10_0000;

/// Process exit codes of the bootstrap, in failure order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// The main guest thread ran to a terminal state.
    Success = 0,
    /// Command line did not parse.
    IncorrectArguments = 1,
    /// The platform layer failed to come up.
    PlatformInitFailed = 2,
    /// Host state construction failed.
    HostInitFailed = 3,
    /// The module could not be loaded.
    ModuleLoadFailed = 4,
    /// The main thread could not be created.
    ThreadInitFailed = 5,
    /// The main thread could not be run.
    ThreadRunFailed = 6,
}

impl ExitCode {
    /// The numeric process exit code.
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// The runtime's interface to the surrounding environment.
pub trait Platform {
    /// Monotonic milliseconds since an arbitrary epoch.
    fn ticks(&self) -> u64;

    /// Presents a user-facing failure message.
    fn present_error(&self, message: &str);
}

/// Console platform: ticks from [`Instant`], errors to stderr.
#[derive(Debug)]
pub struct ConsolePlatform {
    epoch: Instant,
}

impl ConsolePlatform {
    /// Brings up the console platform.
    #[must_use]
    pub fn new() -> Self {
        ConsolePlatform {
            epoch: Instant::now(),
        }
    }
}

impl Default for ConsolePlatform {
    fn default() -> Self {
        ConsolePlatform::new()
    }
}

impl Platform for ConsolePlatform {
    fn ticks(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn present_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

/// Everything one emulated process needs, wired together.
///
/// # Example
///
/// ```rust
/// use guestrun::dispatch::{ImportTable, UnimplementedPolicy};
/// use guestrun::host::HostState;
///
/// let host = HostState::new(ImportTable::new(), UnimplementedPolicy::StubZero)?;
/// assert!(host.kernel().is_empty());
/// # Ok::<(), guestrun::Error>(())
/// ```
pub struct HostState {
    memory: SharedAddressSpace,
    kernel: Arc<Kernel>,
    dispatcher: Arc<ImportDispatcher>,
    start_ticks: Mutex<Option<u64>>,
}

impl HostState {
    /// Builds the host state around an import table and policy.
    ///
    /// # Errors
    ///
    /// Construction is currently infallible but reports [`Error`] so the
    /// bootstrap's host-init failure path is exercised uniformly.
    pub fn new(table: ImportTable, policy: UnimplementedPolicy) -> Result<Self> {
        let memory: SharedAddressSpace = Arc::new(RwLock::new(AddressSpace::default()));
        let kernel = Arc::new(Kernel::new());
        let dispatcher = Arc::new(ImportDispatcher::new(
            table,
            policy,
            Arc::clone(&kernel),
            Arc::clone(&memory),
        ));
        Ok(HostState {
            memory,
            kernel,
            dispatcher,
            start_ticks: Mutex::new(None),
        })
    }

    /// Returns the shared address space.
    #[must_use]
    pub fn memory(&self) -> &SharedAddressSpace {
        &self.memory
    }

    /// Returns the kernel registry.
    #[must_use]
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Returns the import dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<ImportDispatcher> {
        &self.dispatcher
    }

    /// Loads a module into the address space.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error; no thread or kernel object is created
    /// on failure.
    pub fn load_module(&self, loader: &dyn Loader) -> Result<LoadedImage> {
        let mut memory = self.memory.write().map_err(|_| Error::LockError)?;
        loader.load(&mut memory)
    }

    /// Creates and registers a guest thread.
    ///
    /// Allocates a uid, binds a dispatcher view to it, reserves the stack,
    /// seeds the context, and registers the handle so other guest threads
    /// can reach it. The uid is briefly allocated-but-unregistered; a
    /// concurrent lookup of it returns `None` during that window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackAllocationFailed`] if the stack reservation
    /// fails; the uid is not registered in that case.
    pub fn spawn_guest_thread(&self, entry: GuestPtr<()>, stack_size: u32) -> Result<ThreadHandle> {
        let uid = self.kernel.allocate_uid();
        let view = DispatcherView::new(Arc::clone(&self.dispatcher), uid);
        let thread = spawn_thread(entry, stack_size, &self.memory, view)?;
        self.kernel
            .register(uid, KernelObject::Thread(Arc::clone(&thread)))?;
        Ok(thread)
    }

    /// Samples the platform tick counter as the execution start mark.
    pub fn mark_start(&self, platform: &dyn Platform) {
        let ticks = platform.ticks();
        *self
            .start_ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ticks);
        log::info!("guest execution starting at tick {ticks}");
    }

    /// The tick value sampled by [`mark_start`](Self::mark_start), if any.
    #[must_use]
    pub fn start_ticks(&self) -> Option<u64> {
        *self
            .start_ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Terminates and deregisters a thread by uid.
    ///
    /// Returns `false` if the uid does not name a registered thread.
    pub fn terminate_thread(&self, uid: Uid) -> bool {
        self.kernel.terminate_thread(uid)
    }
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("threads", &self.kernel.len())
            .field("policy", &self.dispatcher.policy())
            .finish()
    }
}
