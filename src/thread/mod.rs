//! Guest threads: state machine, shared handles, and the execution engine.
//!
//! Each guest thread maps to one schedulable unit of host execution. A
//! thread's lifecycle is the state machine
//!
//! ```text
//! Created -> Initialized -> Running <-> Blocked -> { Finished | Faulted }
//! ```
//!
//! with `Terminated` as the third terminal state for cross-thread kills.
//! `Created` means the identity exists but no resources are allocated;
//! `Initialized` means the stack region is reserved and the execution
//! context is seeded (program counter at the entry point, stack pointer at
//! the stack top, link register at the thread-exit sentinel so a normal
//! return tears the thread down instead of falling through).
//!
//! # Ownership
//!
//! [`ThreadHandle`] is a reference-counted handle shared between the kernel
//! registry and whoever created the thread; the underlying object is
//! destroyed only when both release it and the thread is terminal. A
//! terminal thread stays observable through the registry (final status,
//! exit code) until explicitly reaped.
//!
//! # Key Components
//!
//! - [`GuestThread`] / [`ThreadHandle`] - One guest thread and its shared
//!   handle
//! - [`RunStatus`] - The lifecycle state machine
//! - [`CpuContext`] - The saved register file
//! - [`WaitReason`] / [`WaitSpec`] - Why and how long a thread is blocked
//! - [`Fault`] - Why a thread faulted
//! - [`spawn_thread`] / [`run`] / [`start`] - The execution engine

mod context;
mod engine;
pub mod isa;

pub use context::{CpuContext, ARG_REGISTERS, REG_LR, REG_PC, REG_SP};
pub use engine::{run, spawn_thread, start, THREAD_EXIT_ADDR};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::dispatch::{DispatcherView, Nid};
use crate::kernel::Uid;
use crate::memory::{Region, SharedAddressSpace};
use crate::{Error, Result};

/// Result word written to the guest return slot when a timed wait expires
/// without being satisfied.
pub const WAIT_TIMED_OUT: u32 = 0x8002_0003;

/// Why a blocked thread is suspended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitReason {
    /// A timed sleep; expiry is the normal resume path.
    Sleep,
    /// Waiting for another thread to reach a terminal state.
    Join(Uid),
    /// Waiting on a kernel synchronization object.
    Object(Uid),
}

/// A blocking request returned by an import handler.
///
/// Only the calling thread suspends. A wait without a timeout must be
/// resumed by [`GuestThread::notify`]; a wait with a timeout always has a
/// wake path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitSpec {
    /// Why the thread is waiting.
    pub reason: WaitReason,
    /// Upper bound on the wait, if any.
    pub timeout: Option<Duration>,
}

impl WaitSpec {
    /// A timed sleep.
    #[must_use]
    pub fn sleep(duration: Duration) -> Self {
        WaitSpec {
            reason: WaitReason::Sleep,
            timeout: Some(duration),
        }
    }

    /// A wait on a kernel object, optionally bounded.
    #[must_use]
    pub fn object(uid: Uid, timeout: Option<Duration>) -> Self {
        WaitSpec {
            reason: WaitReason::Object(uid),
            timeout,
        }
    }

    /// A join on another thread, optionally bounded.
    #[must_use]
    pub fn join(uid: Uid, timeout: Option<Duration>) -> Self {
        WaitSpec {
            reason: WaitReason::Join(uid),
            timeout,
        }
    }
}

/// Why a thread faulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// A load, store, or instruction fetch did not resolve to accessible
    /// guest memory.
    InvalidMemoryAccess {
        /// The guest address that failed to resolve.
        address: u32,
    },
    /// A fetched word did not decode to an instruction.
    InvalidInstruction {
        /// Address of the offending word.
        address: u32,
        /// The word itself.
        word: u32,
    },
    /// An import dispatch failed under the fault policy, or the handler
    /// itself failed.
    Dispatch {
        /// The nid whose dispatch failed.
        nid: Nid,
    },
}

/// Lifecycle state of a guest thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Identity exists; no resources allocated yet.
    Created,
    /// Stack reserved and context seeded; ready to run.
    Initialized,
    /// The engine is executing guest instructions.
    Running,
    /// Suspended by a blocking foreign call.
    Blocked(WaitReason),
    /// Returned normally with this exit code. Terminal.
    Finished(u32),
    /// Stopped on a fault. Terminal.
    Faulted(Fault),
    /// Killed by another thread. Terminal.
    Terminated,
}

impl RunStatus {
    /// Returns `true` for the terminal states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Finished(_) | RunStatus::Faulted(_) | RunStatus::Terminated
        )
    }

    /// Short state name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Initialized => "initialized",
            RunStatus::Running => "running",
            RunStatus::Blocked(_) => "blocked",
            RunStatus::Finished(_) => "finished",
            RunStatus::Faulted(_) => "faulted",
            RunStatus::Terminated => "terminated",
        }
    }
}

/// Terminal result of running a thread to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The thread returned normally with this exit code.
    Finished(u32),
    /// The thread faulted.
    Faulted(Fault),
    /// The thread was terminated by another thread.
    Terminated,
}

/// How a blocked thread's wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaitResult {
    Notified,
    TimedOut,
    Terminated,
}

/// A shared, reference-counted handle to a guest thread.
pub type ThreadHandle = std::sync::Arc<GuestThread>;

/// Mutable thread state guarded by the handle's lock.
struct ThreadInner {
    context: CpuContext,
    status: RunStatus,
    stack: Option<Region>,
    notified: bool,
}

const SIG_NONE: u8 = 0;
const SIG_TERMINATE: u8 = 1;

/// One guest thread.
///
/// Holds the thread's identity, its stack region, its saved execution
/// context, its run status, an owning reference to the shared address
/// space, and the dispatcher view bound to its own uid. The engine checks
/// the context out while running and writes it back at every suspension
/// point, so `status` and `context_snapshot` are always consistent for
/// observers on other host threads.
pub struct GuestThread {
    uid: Uid,
    memory: SharedAddressSpace,
    view: DispatcherView,
    inner: Mutex<ThreadInner>,
    wake: Condvar,
    signal: AtomicU8,
}

impl GuestThread {
    /// Creates a thread in the `Created` state: identity only, no
    /// resources. [`spawn_thread`] is the normal entry point and performs
    /// initialization immediately after.
    #[must_use]
    pub(crate) fn new(uid: Uid, memory: SharedAddressSpace, view: DispatcherView) -> Self {
        GuestThread {
            uid,
            memory,
            view,
            inner: Mutex::new(ThreadInner {
                context: CpuContext::new(),
                status: RunStatus::Created,
                stack: None,
                notified: false,
            }),
            wake: Condvar::new(),
            signal: AtomicU8::new(SIG_NONE),
        }
    }

    /// Returns the thread's uid.
    #[must_use]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Returns the shared address space this thread executes in.
    #[must_use]
    pub fn memory(&self) -> &SharedAddressSpace {
        &self.memory
    }

    /// Returns the dispatcher view bound to this thread.
    #[must_use]
    pub fn view(&self) -> &DispatcherView {
        &self.view
    }

    /// Returns the thread's current lifecycle state.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.lock_inner().status
    }

    /// Returns the exit code if the thread finished normally.
    #[must_use]
    pub fn exit_code(&self) -> Option<u32> {
        match self.status() {
            RunStatus::Finished(code) => Some(code),
            _ => None,
        }
    }

    /// Returns a snapshot of the thread's saved register file.
    ///
    /// While the thread is `Running` this is the context as of the last
    /// suspension point; in any other state it is exact.
    #[must_use]
    pub fn context_snapshot(&self) -> CpuContext {
        self.lock_inner().context
    }

    /// Returns the thread's stack region, once initialized.
    #[must_use]
    pub fn stack(&self) -> Option<Region> {
        self.lock_inner().stack
    }

    /// Wakes the thread if it is blocked.
    ///
    /// Called by the host-side implementation of whatever primitive the
    /// thread is waiting on. Spurious notifies are harmless.
    pub fn notify(&self) {
        self.lock_inner().notified = true;
        self.wake.notify_all();
    }

    /// Requests termination.
    ///
    /// The engine observes the request at its next step or wakes from a
    /// blocked wait, transitions the thread to `Terminated`, and releases
    /// its stack region.
    pub fn request_terminate(&self) {
        // Store and notify under the inner lock so a blocking thread cannot
        // check the signal and park between the two.
        let _guard = self.lock_inner();
        self.signal.store(SIG_TERMINATE, Ordering::SeqCst);
        self.wake.notify_all();
    }

    /// Returns `true` if termination has been requested.
    #[must_use]
    pub fn terminate_requested(&self) -> bool {
        self.signal.load(Ordering::SeqCst) == SIG_TERMINATE
    }

    /// Reserves the stack and seeds the execution context.
    ///
    /// Transition `Created -> Initialized`. The stack pointer starts at the
    /// 16-byte-aligned top of the stack region and the link register at
    /// [`THREAD_EXIT_ADDR`], so returning from the entry point triggers
    /// thread teardown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackAllocationFailed`] if the stack reservation
    /// fails, or [`Error::ThreadNotRunnable`] if the thread is past
    /// `Created`.
    pub(crate) fn initialize(&self, entry: u32, stack_size: u32) -> Result<()> {
        use crate::memory::{Protection, RegionTag};

        {
            let inner = self.lock_inner();
            if inner.status != RunStatus::Created {
                return Err(Error::ThreadNotRunnable {
                    uid: self.uid,
                    status: inner.status.name(),
                });
            }
        }

        let stack = self
            .memory
            .write()
            .map_err(|_| Error::LockError)?
            .reserve(stack_size, Protection::RW, RegionTag::Stack)
            .map_err(|e| match e {
                Error::OutOfMemory { .. } => Error::StackAllocationFailed { size: stack_size },
                other => other,
            })?;

        let mut inner = self.lock_inner();
        let mut context = CpuContext::new();
        context.set_pc(entry);
        context.set_sp(stack.end() & !0xF);
        context.set_lr(THREAD_EXIT_ADDR);
        inner.context = context;
        inner.stack = Some(stack);
        inner.status = RunStatus::Initialized;
        Ok(())
    }

    /// Transition `Initialized -> Running`, checking the context out for
    /// the engine.
    pub(crate) fn begin_running(&self) -> Result<CpuContext> {
        let mut inner = self.lock_inner();
        if inner.status != RunStatus::Initialized {
            return Err(Error::ThreadNotRunnable {
                uid: self.uid,
                status: inner.status.name(),
            });
        }
        inner.status = RunStatus::Running;
        Ok(inner.context)
    }

    /// Suspends the calling engine per `spec`.
    ///
    /// Writes the context back (observers see where the thread blocked),
    /// transitions to `Blocked`, and parks until notified, timed out, or
    /// terminated. On a non-terminating wake the thread is `Running` again
    /// when this returns.
    pub(crate) fn block(&self, ctx: &CpuContext, spec: WaitSpec) -> WaitResult {
        let deadline = spec.timeout.map(|t| Instant::now() + t);

        let mut inner = self.lock_inner();
        inner.context = *ctx;
        inner.status = RunStatus::Blocked(spec.reason);

        let result = loop {
            if self.terminate_requested() {
                break WaitResult::Terminated;
            }
            if inner.notified {
                inner.notified = false;
                break WaitResult::Notified;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break WaitResult::TimedOut;
                    }
                    inner = self
                        .wake
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                None => {
                    inner = self
                        .wake
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        };

        if result != WaitResult::Terminated {
            inner.status = RunStatus::Running;
        }
        result
    }

    /// Records the terminal outcome and releases the stack region.
    pub(crate) fn finish(&self, ctx: CpuContext, outcome: RunOutcome) {
        let stack = {
            let mut inner = self.lock_inner();
            inner.context = ctx;
            inner.status = match outcome {
                RunOutcome::Finished(code) => RunStatus::Finished(code),
                RunOutcome::Faulted(fault) => RunStatus::Faulted(fault),
                RunOutcome::Terminated => RunStatus::Terminated,
            };
            inner.stack.take()
        };

        if let Some(stack) = stack {
            if let Ok(mut memory) = self.memory.write() {
                // Already-released is fine during racing teardown.
                let _ = memory.release(stack);
            }
        }

        log::debug!("{}: {}", self.uid, self.status().name());
    }

    /// Status reads must not fail on a poisoned lock; the inner state is
    /// plain data and every transition writes it whole.
    fn lock_inner(&self) -> MutexGuard<'_, ThreadInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for GuestThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestThread")
            .field("uid", &self.uid)
            .field("status", &self.status())
            .finish()
    }
}
