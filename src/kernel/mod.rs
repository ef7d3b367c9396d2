//! Kernel object identity and registry.
//!
//! The [`Kernel`] is the single source of truth for which kernel objects
//! currently exist in the emulated process. It owns the allocation of
//! process-wide unique identifiers ([`Uid`]) and the concurrent registry
//! mapping a uid to its live object. Threads are the first object kind;
//! foreign synchronization primitives (mutexes, semaphores, event flags)
//! register through the same mechanism as further [`KernelObject`] variants.
//!
//! There is deliberately no ambient singleton: the composition root owns one
//! `Kernel` and passes it by reference to every component that needs it.
//!
//! # Concurrency
//!
//! Guest code may request new threads from inside an import call while other
//! threads are running, so uid allocation and every registry mutation are
//! safe under concurrent callers. None of these operations is a suspension
//! point; they complete promptly and never wait on guest-controlled state.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use crate::thread::ThreadHandle;
use crate::{Error, Result};

/// A process-wide unique identifier for a kernel object.
///
/// Uids are strictly increasing and never reused within a process lifetime;
/// [`Kernel::allocate_uid`] is the only way to obtain one. The guest sees
/// uids as opaque words; the runtime guarantees only "unique and
/// increasing", never any particular allocation order across racing
/// threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(u32);

impl Uid {
    /// Wraps a raw uid value, as passed through guest call arguments.
    ///
    /// Carries no liveness guarantee; a lookup decides whether the uid
    /// names anything.
    #[must_use]
    pub fn from_raw(value: u32) -> Self {
        Uid(value)
    }

    /// Returns the raw uid value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid:{:#x}", self.0)
    }
}

/// A live kernel object.
///
/// Currently only threads exist; synchronization primitives are the next
/// variants and reuse the same uid/registry mechanics.
#[derive(Clone)]
pub enum KernelObject {
    /// A guest thread.
    Thread(ThreadHandle),
}

impl KernelObject {
    /// Returns the thread handle if this object is a thread.
    #[must_use]
    pub fn as_thread(&self) -> Option<&ThreadHandle> {
        match self {
            KernelObject::Thread(handle) => Some(handle),
        }
    }
}

impl fmt::Debug for KernelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelObject::Thread(handle) => {
                f.debug_tuple("Thread").field(&handle.uid()).finish()
            }
        }
    }
}

/// Identity allocation and object registry for one emulated process.
///
/// Created once with the host state and destroyed at process teardown.
///
/// # Example
///
/// ```rust,ignore
/// let kernel = Kernel::new();
/// let uid = kernel.allocate_uid();
/// kernel.register(uid, KernelObject::Thread(handle))?;
/// let thread = kernel.thread(uid).expect("registered above");
/// ```
#[derive(Debug)]
pub struct Kernel {
    /// Next uid value to hand out.
    next_uid: AtomicU32,
    /// Live objects keyed by uid. A uid appears at most once.
    objects: DashMap<Uid, KernelObject>,
}

impl Kernel {
    /// First uid handed out.
    ///
    /// Starts above zero so guest code cannot mistake a uid for a
    /// null/error word.
    pub const FIRST_UID: u32 = 0x100;

    /// Creates an empty kernel.
    #[must_use]
    pub fn new() -> Self {
        Kernel {
            next_uid: AtomicU32::new(Self::FIRST_UID),
            objects: DashMap::new(),
        }
    }

    /// Allocates a fresh uid.
    ///
    /// Atomic: concurrent callers never observe the same value, and values
    /// strictly increase. An allocated-but-not-yet-registered uid is a
    /// visible transient state; [`lookup`](Self::lookup) on it returns
    /// `None`.
    #[must_use]
    pub fn allocate_uid(&self) -> Uid {
        Uid(self.next_uid.fetch_add(1, Ordering::SeqCst))
    }

    /// Registers an object under a uid.
    ///
    /// A thread must be registered before any other guest thread can
    /// reference it by uid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRegistration`] if the uid is already
    /// present.
    pub fn register(&self, uid: Uid, object: KernelObject) -> Result<()> {
        match self.objects.entry(uid) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(Error::DuplicateRegistration { uid })
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(object);
                Ok(())
            }
        }
    }

    /// Looks up a live object by uid.
    #[must_use]
    pub fn lookup(&self, uid: Uid) -> Option<KernelObject> {
        self.objects.get(&uid).map(|entry| entry.value().clone())
    }

    /// Looks up a live thread by uid.
    #[must_use]
    pub fn thread(&self, uid: Uid) -> Option<ThreadHandle> {
        self.lookup(uid)
            .and_then(|object| object.as_thread().cloned())
    }

    /// Removes the registry entry for a uid.
    ///
    /// Idempotent: deregistering an absent uid is a no-op, so teardown
    /// paths can race without error. The object itself lives on while
    /// external holders keep their handles.
    pub fn deregister(&self, uid: Uid) {
        self.objects.remove(&uid);
    }

    /// Requests termination of a registered thread and removes its entry.
    ///
    /// The target transitions out of `Running`/`Blocked` on its own
    /// schedulable unit; its engine releases the stack region when it
    /// observes the request. Returns `false` if the uid does not name a
    /// live thread.
    pub fn terminate_thread(&self, uid: Uid) -> bool {
        let Some(handle) = self.thread(uid) else {
            return false;
        };
        handle.request_terminate();
        self.deregister(uid);
        true
    }

    /// Returns the number of live registered objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if no objects are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_uid_allocation_is_increasing() {
        let kernel = Kernel::new();
        let a = kernel.allocate_uid();
        let b = kernel.allocate_uid();
        assert!(a < b);
        assert_eq!(a.value(), Kernel::FIRST_UID);
    }

    #[test]
    fn test_uid_allocation_is_unique_under_contention() {
        let kernel = Arc::new(Kernel::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let kernel = Arc::clone(&kernel);
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| kernel.allocate_uid()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<Uid> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn test_lookup_of_unregistered_uid_is_none() {
        let kernel = Kernel::new();
        let uid = kernel.allocate_uid();
        assert!(kernel.lookup(uid).is_none());
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let kernel = Kernel::new();
        let uid = kernel.allocate_uid();
        kernel.deregister(uid);
        kernel.deregister(uid);
        assert!(kernel.is_empty());
    }

    #[test]
    fn test_terminate_unknown_thread() {
        let kernel = Kernel::new();
        assert!(!kernel.terminate_thread(kernel.allocate_uid()));
    }
}
