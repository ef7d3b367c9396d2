//! Import-call dispatch: bridging guest calls to host handlers.
//!
//! When guest code invokes what it believes is a foreign-OS library
//! function, the execution engine hands the call's nid to the
//! [`ImportDispatcher`]. The dispatcher resolves the nid against the frozen
//! [`ImportTable`], marshals the guest calling convention into typed
//! arguments, invokes the host handler, and writes the result back into the
//! guest return slot - the guest never observes that it crossed an
//! execution boundary.
//!
//! # Key Components
//!
//! - [`Nid`] - The symbolic numeric call identifier embedded in import
//!   thunks
//! - [`ImportTable`] - Registered handlers; built at setup, read-only
//!   afterwards
//! - [`ImportDispatcher`] - Resolution, marshalling, and the
//!   unimplemented-import policy
//! - [`DispatcherView`] - A per-thread `(dispatcher, calling uid)` pair
//!   passed explicitly to the engine
//! - [`ArgReader`] - Sequential typed access to a call's arguments
//!
//! # Unimplemented imports
//!
//! The policy for a nid with no handler is an explicit constructor choice,
//! never a silent default: [`UnimplementedPolicy::FaultThread`] faults the
//! calling thread (strict compatibility testing), while
//! [`UnimplementedPolicy::StubZero`] logs the miss and substitutes a zero
//! result (best-effort execution of partially supported binaries). Neither
//! takes down the host process.

mod args;
mod table;

pub use args::ArgReader;
pub use table::{ImportHandler, ImportTable, Nid};

use std::sync::Arc;

use crate::kernel::{Kernel, Uid};
use crate::memory::SharedAddressSpace;
use crate::thread::{CpuContext, WaitSpec};
use crate::{Error, Result};

/// Everything a host handler receives for one import call.
///
/// The caller uid lets handlers that model per-thread foreign concepts
/// (sleep, thread-local storage, primitive ownership) resolve the correct
/// thread even though the dispatcher holds no per-call mutable state.
pub struct ImportCall<'a> {
    /// Uid of the guest thread that made the call.
    pub caller: Uid,
    /// The kernel registry, for handlers that create or look up objects.
    pub kernel: &'a Kernel,
    /// The shared guest address space.
    pub memory: &'a SharedAddressSpace,
    /// The call's arguments, decoded on demand.
    pub args: ArgReader<'a>,
}

/// What a handler asks the runtime to do after it returns.
pub enum ImportOutcome {
    /// Write this value into the guest return slot and resume the caller.
    Return(u32),
    /// Suspend the calling thread until notified or timed out.
    Block(WaitSpec),
    /// Terminate the calling thread with this exit code.
    Exit(u32),
}

/// Result of one dispatch, as seen by the execution engine.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The handler completed; the return slot is already written.
    Completed,
    /// The calling thread must suspend per the contained wait.
    Block(WaitSpec),
    /// The calling thread must terminate with this exit code.
    Exit(u32),
}

/// Policy for a dispatched nid with no registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnimplementedPolicy {
    /// Fault the calling thread. Strict: useful for compatibility testing.
    FaultThread,
    /// Log the miss and return zero. Best-effort: keeps partially supported
    /// binaries running.
    StubZero,
}

/// Resolves nids to handlers and performs the calling-convention bridge.
///
/// One dispatcher exists per emulated process. It holds no per-call mutable
/// state, and the table it reads is frozen, so concurrent dispatch from many
/// guest threads needs no locking here - only handlers' own state needs
/// synchronization, which is each handler's responsibility.
pub struct ImportDispatcher {
    table: ImportTable,
    policy: UnimplementedPolicy,
    kernel: Arc<Kernel>,
    memory: SharedAddressSpace,
}

impl ImportDispatcher {
    /// Creates a dispatcher over a fully registered table.
    ///
    /// `policy` must be chosen explicitly; see [`UnimplementedPolicy`].
    #[must_use]
    pub fn new(
        table: ImportTable,
        policy: UnimplementedPolicy,
        kernel: Arc<Kernel>,
        memory: SharedAddressSpace,
    ) -> Self {
        ImportDispatcher {
            table,
            policy,
            kernel,
            memory,
        }
    }

    /// Returns the active unimplemented-import policy.
    #[must_use]
    pub fn policy(&self) -> UnimplementedPolicy {
        self.policy
    }

    /// Returns the import table.
    #[must_use]
    pub fn table(&self) -> &ImportTable {
        &self.table
    }

    /// Dispatches one guest import call.
    ///
    /// Looks up `nid`, marshals the arguments out of `ctx` (and the guest
    /// stack), invokes the handler with the caller's identity, and writes a
    /// returned value into the guest return slot. Blocking and exit
    /// outcomes are passed through to the engine, which owns suspension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnimplementedImport`] for an unknown nid under
    /// [`UnimplementedPolicy::FaultThread`], or whatever the handler
    /// itself failed with. Failures fault only the calling thread.
    pub fn dispatch(
        &self,
        caller: Uid,
        nid: Nid,
        ctx: &mut CpuContext,
    ) -> Result<DispatchOutcome> {
        let Some((name, handler)) = self.table.get(nid) else {
            return match self.policy {
                UnimplementedPolicy::FaultThread => Err(Error::UnimplementedImport { nid }),
                UnimplementedPolicy::StubZero => {
                    log::warn!("{caller}: stubbing unimplemented import {nid}");
                    ctx.set_return(0);
                    Ok(DispatchOutcome::Completed)
                }
            };
        };

        log::debug!("{caller}: import {nid} ({name})");

        let call = ImportCall {
            caller,
            kernel: &self.kernel,
            memory: &self.memory,
            args: ArgReader::new(ctx, &self.memory),
        };

        match handler(call)? {
            ImportOutcome::Return(value) => {
                ctx.set_return(value);
                Ok(DispatchOutcome::Completed)
            }
            ImportOutcome::Block(spec) => Ok(DispatchOutcome::Block(spec)),
            ImportOutcome::Exit(code) => Ok(DispatchOutcome::Exit(code)),
        }
    }
}

impl std::fmt::Debug for ImportDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportDispatcher")
            .field("handlers", &self.table.len())
            .field("policy", &self.policy)
            .finish()
    }
}

/// A thread's bound view of the dispatcher.
///
/// One view exists per guest thread: the dispatcher reference plus the
/// thread's own uid. It is an explicit value passed into the execution
/// engine rather than an implicitly capturing callable, so thread identity
/// flows visibly through every dispatch.
#[derive(Clone, Debug)]
pub struct DispatcherView {
    dispatcher: Arc<ImportDispatcher>,
    caller: Uid,
}

impl DispatcherView {
    /// Binds a dispatcher to a calling thread's uid.
    #[must_use]
    pub fn new(dispatcher: Arc<ImportDispatcher>, caller: Uid) -> Self {
        DispatcherView { dispatcher, caller }
    }

    /// Returns the uid this view is bound to.
    #[must_use]
    pub fn caller(&self) -> Uid {
        self.caller
    }

    /// Dispatches an import call on behalf of the bound thread.
    ///
    /// # Errors
    ///
    /// As [`ImportDispatcher::dispatch`].
    pub fn dispatch(&self, nid: Nid, ctx: &mut CpuContext) -> Result<DispatchOutcome> {
        self.dispatcher.dispatch(self.caller, nid, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AddressSpace;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::RwLock;

    fn dispatcher_with(
        table: ImportTable,
        policy: UnimplementedPolicy,
    ) -> Arc<ImportDispatcher> {
        Arc::new(ImportDispatcher::new(
            table,
            policy,
            Arc::new(Kernel::new()),
            Arc::new(RwLock::new(AddressSpace::default())),
        ))
    }

    #[test]
    fn test_dispatch_invokes_handler_once_with_caller_uid() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen_uid = Arc::new(AtomicUsize::new(0));

        let mut table = ImportTable::new();
        {
            let calls = Arc::clone(&calls);
            let seen_uid = Arc::clone(&seen_uid);
            table
                .register(Nid::new(0x1234), "sceFixedValue", move |call| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    seen_uid.store(call.caller.value() as usize, Ordering::SeqCst);
                    Ok(ImportOutcome::Return(0x2A))
                })
                .unwrap();
        }

        let dispatcher = dispatcher_with(table, UnimplementedPolicy::FaultThread);
        let kernel = Kernel::new();
        // Advance the allocator a few steps so the uid is distinctive.
        let _ = kernel.allocate_uid();
        let _ = kernel.allocate_uid();
        let uid = kernel.allocate_uid();

        let mut ctx = CpuContext::new();
        let outcome = dispatcher.dispatch(uid, Nid::new(0x1234), &mut ctx).unwrap();

        assert!(matches!(outcome, DispatchOutcome::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen_uid.load(Ordering::SeqCst), uid.value() as usize);
        assert_eq!(ctx.return_value(), 0x2A);
    }

    #[test]
    fn test_unimplemented_fault_policy() {
        let dispatcher = dispatcher_with(ImportTable::new(), UnimplementedPolicy::FaultThread);
        assert_eq!(dispatcher.policy(), UnimplementedPolicy::FaultThread);

        let kernel = Kernel::new();
        let mut ctx = CpuContext::new();
        ctx.set_return(0xAAAA);

        let err = dispatcher
            .dispatch(kernel.allocate_uid(), Nid::new(0xDEAD), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, Error::UnimplementedImport { nid } if nid == Nid::new(0xDEAD)));

        // The guest context is untouched on the fault path.
        assert_eq!(ctx.return_value(), 0xAAAA);
    }

    #[test]
    fn test_unimplemented_stub_policy() {
        let dispatcher = dispatcher_with(ImportTable::new(), UnimplementedPolicy::StubZero);
        assert_eq!(dispatcher.policy(), UnimplementedPolicy::StubZero);

        let kernel = Kernel::new();
        let mut ctx = CpuContext::new();
        ctx.set_return(0xAAAA);

        let outcome = dispatcher
            .dispatch(kernel.allocate_uid(), Nid::new(0xDEAD), &mut ctx)
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Completed));
        assert_eq!(ctx.return_value(), 0);
    }

    #[test]
    fn test_handler_arguments_come_from_registers() {
        let mut table = ImportTable::new();
        table
            .register(Nid::new(1), "sceAddTwo", |mut call| {
                let a = call.args.next_u32()?;
                let b = call.args.next_u32()?;
                Ok(ImportOutcome::Return(a.wrapping_add(b)))
            })
            .unwrap();

        let dispatcher = dispatcher_with(table, UnimplementedPolicy::FaultThread);
        let kernel = Kernel::new();

        let mut ctx = CpuContext::new();
        ctx.set_reg(0, 40);
        ctx.set_reg(1, 2);
        dispatcher
            .dispatch(kernel.allocate_uid(), Nid::new(1), &mut ctx)
            .unwrap();
        assert_eq!(ctx.return_value(), 42);
    }

    #[test]
    fn test_view_carries_thread_identity() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut table = ImportTable::new();
        {
            let seen = Arc::clone(&seen);
            table
                .register(Nid::new(7), "sceWhoAmI", move |call| {
                    seen.store(call.caller.value() as usize, Ordering::SeqCst);
                    Ok(ImportOutcome::Return(0))
                })
                .unwrap();
        }

        let dispatcher = dispatcher_with(table, UnimplementedPolicy::FaultThread);
        let kernel = Kernel::new();
        let uid = kernel.allocate_uid();
        let view = DispatcherView::new(dispatcher, uid);
        assert_eq!(view.caller(), uid);

        let mut ctx = CpuContext::new();
        view.dispatch(Nid::new(7), &mut ctx).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), uid.value() as usize);
    }
}
