//! The import table: nid-to-handler bindings.
//!
//! Module setup code registers one handler per nid before any guest code
//! executes; the table is then handed to the dispatcher and never mutated
//! again, so concurrent dispatch from many threads reads it without
//! locking.

use std::collections::HashMap;
use std::fmt;

use crate::dispatch::{ImportCall, ImportOutcome};
use crate::{Error, Result};

/// A numeric import identifier.
///
/// A nid is a fixed-width hash of an imported symbol's name, computed by the
/// guest's original toolchain and embedded in the binary's import thunks.
/// The runtime treats it as opaque: it only has to match what setup code
/// registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Nid(u32);

impl Nid {
    /// Creates a nid from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Nid(value)
    }

    /// Returns the raw nid value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nid:{:#010x}", self.0)
    }
}

/// A host-implemented import handler.
///
/// Handlers receive the full [`ImportCall`]: the calling thread's uid, the
/// kernel, the shared address space, and the marshalled arguments. Any
/// mutable state a handler touches is the handler's own to synchronize.
pub type ImportHandler = Box<dyn Fn(ImportCall<'_>) -> Result<ImportOutcome> + Send + Sync>;

struct ImportEntry {
    name: String,
    handler: ImportHandler,
}

/// Registered import handlers, keyed by nid.
///
/// Logically immutable once module registration completes: build the table,
/// then move it into the dispatcher.
///
/// # Example
///
/// ```rust
/// use guestrun::dispatch::{ImportOutcome, ImportTable, Nid};
///
/// let mut table = ImportTable::new();
/// table.register(Nid::new(0x1234), "sceExampleReturn", |_call| {
///     Ok(ImportOutcome::Return(42))
/// })?;
/// assert_eq!(table.len(), 1);
/// # Ok::<(), guestrun::Error>(())
/// ```
#[derive(Default)]
pub struct ImportTable {
    entries: HashMap<Nid, ImportEntry>,
}

impl ImportTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a handler to a nid.
    ///
    /// `name` is the imported symbol's name, kept for diagnostics only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if the nid is already bound.
    /// Last-registration-wins is disallowed so accidental nid collisions
    /// between modules surface at setup time instead of as wrong behavior
    /// at dispatch time.
    pub fn register<F>(&mut self, nid: Nid, name: &str, handler: F) -> Result<()>
    where
        F: Fn(ImportCall<'_>) -> Result<ImportOutcome> + Send + Sync + 'static,
    {
        if self.entries.contains_key(&nid) {
            return Err(Error::DuplicateHandler { nid });
        }
        self.entries.insert(
            nid,
            ImportEntry {
                name: name.to_string(),
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    /// Returns the handler bound to a nid, with its symbol name.
    #[must_use]
    pub(crate) fn get(&self, nid: Nid) -> Option<(&str, &ImportHandler)> {
        self.entries
            .get(&nid)
            .map(|entry| (entry.name.as_str(), &entry.handler))
    }

    /// Returns `true` if a handler is bound to the nid.
    #[must_use]
    pub fn contains(&self, nid: Nid) -> bool {
        self.entries.contains_key(&nid)
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over `(nid, symbol name)` pairs.
    pub fn names(&self) -> impl Iterator<Item = (Nid, &str)> {
        self.entries.iter().map(|(&nid, e)| (nid, e.name.as_str()))
    }
}

impl fmt::Debug for ImportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportTable")
            .field("handler_count", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table() {
        let table = ImportTable::new();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert!(!table.contains(Nid::new(1)));
    }

    #[test]
    fn test_registration() {
        let mut table = ImportTable::new();
        table
            .register(Nid::new(0x1234), "sceTestOne", |_| Ok(ImportOutcome::Return(1)))
            .unwrap();
        table
            .register(Nid::new(0x5678), "sceTestTwo", |_| Ok(ImportOutcome::Return(2)))
            .unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.contains(Nid::new(0x1234)));
        let (name, _) = table.get(Nid::new(0x1234)).unwrap();
        assert_eq!(name, "sceTestOne");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut table = ImportTable::new();
        table
            .register(Nid::new(0x1234), "first", |_| Ok(ImportOutcome::Return(1)))
            .unwrap();

        let err = table
            .register(Nid::new(0x1234), "second", |_| Ok(ImportOutcome::Return(2)))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateHandler { nid } if nid == Nid::new(0x1234)));

        // The original binding survives.
        let (name, _) = table.get(Nid::new(0x1234)).unwrap();
        assert_eq!(name, "first");
    }
}
