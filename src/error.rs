use thiserror::Error;

use crate::{dispatch::Nid, kernel::Uid};

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all failure modes of the guest runtime: address-space
/// exhaustion and addressing faults, kernel registry misuse, thread lifecycle
/// violations, and import dispatch failures. Each variant carries enough
/// context for the caller to decide whether the failure is local to one guest
/// thread or fatal to the bootstrap.
///
/// # Error Categories
///
/// ## Resource exhaustion
/// - [`Error::OutOfMemory`] - No free range in the guest address space fits the request
/// - [`Error::StackAllocationFailed`] - Thread stack reservation failed during initialization
///
/// ## Addressing errors
/// - [`Error::InvalidAddress`] - Guest pointer resolved outside any live region,
///   with incompatible permissions, across a region boundary, or with a stale
///   generation tag
/// - [`Error::DuplicateRegistration`] - A uid was registered twice in the kernel
///
/// ## Dispatch errors
/// - [`Error::UnimplementedImport`] - No handler bound to the requested nid
///   (raised only under the fault-thread policy)
/// - [`Error::DuplicateHandler`] - Two handlers registered for one nid
/// - [`Error::BadArgumentEncoding`] - Argument marshalling read past the
///   provided window or faulted on the guest stack
///
/// ## Thread and synchronization errors
/// - [`Error::ThreadNotRunnable`] - Execution was requested for a thread whose
///   state machine does not permit it
/// - [`Error::LockError`] - A shared runtime structure was poisoned by a panic
///
/// ## I/O
/// - [`Error::FileError`] - Filesystem I/O errors while reading a guest image
#[derive(Error, Debug)]
pub enum Error {
    /// No free range in the guest address space can satisfy the reservation.
    ///
    /// Recoverable: the caller may retry with a smaller size or abort the
    /// operation that needed the memory.
    #[error("Out of guest memory - no free range fits {requested:#x} bytes")]
    OutOfMemory {
        /// Number of bytes that could not be reserved.
        requested: u32,
    },

    /// A guest address did not resolve to usable memory.
    ///
    /// Raised when a pointer falls outside every live region, the region's
    /// permissions are incompatible with the access, the access would cross a
    /// region boundary, or the pointer's generation tag is stale (the region
    /// was released after the pointer was created).
    #[error("Invalid guest address {address:#010x}: {reason}")]
    InvalidAddress {
        /// The guest address that failed to resolve.
        address: u32,
        /// Why the address was rejected.
        reason: &'static str,
    },

    /// Reserving a thread's stack region failed.
    ///
    /// Wraps address-space exhaustion at thread creation time so callers can
    /// distinguish "could not create the thread" from a fault inside a
    /// running thread.
    #[error("Failed to reserve a {size:#x}-byte stack region")]
    StackAllocationFailed {
        /// The requested stack size in bytes.
        size: u32,
    },

    /// A kernel object was registered under a uid that is already present.
    ///
    /// Uids are allocated exactly once, so this indicates a caller bug
    /// (registering the same object twice, or reusing a uid).
    #[error("Kernel object {uid} is already registered")]
    DuplicateRegistration {
        /// The uid that was already present in the registry.
        uid: Uid,
    },

    /// An import handler was registered for a nid that is already bound.
    ///
    /// Last-registration-wins is deliberately disallowed so accidental nid
    /// collisions between modules are caught at setup time.
    #[error("Import handler for {nid} is already registered")]
    DuplicateHandler {
        /// The nid that was already bound.
        nid: Nid,
    },

    /// A guest call named a nid with no registered handler.
    ///
    /// Only raised under [`UnimplementedPolicy::FaultThread`]; the stub
    /// policy logs and substitutes a zero result instead.
    ///
    /// [`UnimplementedPolicy::FaultThread`]: crate::dispatch::UnimplementedPolicy::FaultThread
    #[error("Unimplemented import {nid}")]
    UnimplementedImport {
        /// The nid the guest tried to call.
        nid: Nid,
    },

    /// Argument marshalling could not decode the guest calling convention.
    ///
    /// The index identifies which argument failed (register window overrun
    /// or a faulting guest-stack read).
    #[error("Could not decode guest call argument {index}")]
    BadArgumentEncoding {
        /// Zero-based index of the argument that failed to decode.
        index: usize,
    },

    /// A thread operation was requested in a state that does not allow it.
    ///
    /// For example, running a thread that never reached `Initialized`, or
    /// running a thread twice.
    #[error("Thread {uid} is not runnable (status: {status})")]
    ThreadNotRunnable {
        /// The uid of the offending thread.
        uid: Uid,
        /// Human-readable name of the state the thread was actually in.
        status: &'static str,
    },

    /// A shared runtime structure was poisoned.
    ///
    /// Indicates a panic on another host thread while it held a runtime
    /// lock; the affected guest thread faults rather than the whole process.
    #[error("A runtime lock was poisoned by a panicked thread")]
    LockError,

    /// An error occurred while accessing a file.
    #[error("File operation failed")]
    FileError(#[from] std::io::Error),
}
