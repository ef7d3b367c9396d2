//! Argument marshalling for the guest calling convention.
//!
//! The guest passes the first four call arguments in r0-r3 and spills the
//! rest to its stack, four bytes per slot. [`ArgReader`] decodes that layout
//! sequentially into typed host values, reading stack slots through the
//! shared address space so every spilled argument is bounds-checked like any
//! other guest access.

use crate::memory::{GuestPtr, GuestValue, Protection, SharedAddressSpace};
use crate::thread::{CpuContext, ARG_REGISTERS};
use crate::{Error, Result};

/// Sequential reader over one import call's arguments.
///
/// Created by the dispatcher from the calling thread's context; handlers
/// consume arguments in declaration order. A failed decode (register window
/// overrun into an unmapped stack, or a faulting stack read) is reported as
/// [`Error::BadArgumentEncoding`] with the argument's index.
pub struct ArgReader<'a> {
    regs: [u32; ARG_REGISTERS],
    sp: u32,
    memory: &'a SharedAddressSpace,
    index: usize,
}

impl<'a> ArgReader<'a> {
    /// Creates a reader over the arguments of a call made with `ctx`.
    #[must_use]
    pub fn new(ctx: &CpuContext, memory: &'a SharedAddressSpace) -> Self {
        ArgReader {
            regs: ctx.arg_regs(),
            sp: ctx.sp(),
            memory,
            index: 0,
        }
    }

    /// Decodes the next argument as a raw 32-bit word.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArgumentEncoding`] if the argument spilled to the
    /// guest stack and the stack slot does not resolve.
    pub fn next_u32(&mut self) -> Result<u32> {
        let index = self.index;
        self.index += 1;

        if index < ARG_REGISTERS {
            return Ok(self.regs[index]);
        }

        // Spilled argument: sp points at the first stack slot.
        #[allow(clippy::cast_possible_truncation)] // Slot offsets are tiny
        let offset = ((index - ARG_REGISTERS) * 4) as u32;
        let address = self.sp.wrapping_add(offset);
        self.memory
            .read()
            .map_err(|_| Error::LockError)?
            .read_value::<u32>(address, Protection::READ)
            .map_err(|_| Error::BadArgumentEncoding { index })
    }

    /// Decodes the next argument as a signed 32-bit value.
    ///
    /// # Errors
    ///
    /// As [`next_u32`](Self::next_u32).
    pub fn next_i32(&mut self) -> Result<i32> {
        Ok(self.next_u32()? as i32)
    }

    /// Decodes the next argument as a typed guest pointer.
    ///
    /// The word must currently resolve to mapped guest memory; the returned
    /// pointer is tagged with the containing region's generation, so it goes
    /// stale if that region is released before the handler uses it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArgumentEncoding`] if the word does not resolve.
    pub fn next_ptr<T: GuestValue>(&mut self) -> Result<GuestPtr<T>> {
        let index = self.index;
        let address = self.next_u32()?;
        self.memory
            .read()
            .map_err(|_| Error::LockError)?
            .tag_ptr::<T>(address)
            .map_err(|_| Error::BadArgumentEncoding { index })
    }

    /// Returns how many arguments have been consumed so far.
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AddressSpace, RegionTag};
    use std::sync::{Arc, RwLock};

    fn shared_space() -> SharedAddressSpace {
        Arc::new(RwLock::new(AddressSpace::default()))
    }

    #[test]
    fn test_register_arguments() {
        let memory = shared_space();
        let mut ctx = CpuContext::new();
        for (i, v) in [11, 22, 33, 44].into_iter().enumerate() {
            ctx.set_reg(i, v);
        }

        let mut args = ArgReader::new(&ctx, &memory);
        assert_eq!(args.next_u32().unwrap(), 11);
        assert_eq!(args.next_u32().unwrap(), 22);
        assert_eq!(args.next_i32().unwrap(), 33);
        assert_eq!(args.next_u32().unwrap(), 44);
        assert_eq!(args.consumed(), 4);
    }

    #[test]
    fn test_stack_spilled_arguments() {
        let memory = shared_space();
        let stack = {
            let mut mem = memory.write().unwrap();
            mem.reserve(0x1000, Protection::RW, RegionTag::Stack).unwrap()
        };

        let mut ctx = CpuContext::new();
        ctx.set_sp(stack.base());
        {
            let mut mem = memory.write().unwrap();
            mem.write(stack.ptr_at::<u32>(0), 55).unwrap();
            mem.write(stack.ptr_at::<u32>(4), 66).unwrap();
        }

        let mut args = ArgReader::new(&ctx, &memory);
        for _ in 0..ARG_REGISTERS {
            args.next_u32().unwrap();
        }
        assert_eq!(args.next_u32().unwrap(), 55);
        assert_eq!(args.next_u32().unwrap(), 66);
    }

    #[test]
    fn test_unmapped_stack_spill_is_bad_encoding() {
        let memory = shared_space();
        let mut ctx = CpuContext::new();
        ctx.set_sp(0xDEAD_0000);

        let mut args = ArgReader::new(&ctx, &memory);
        for _ in 0..ARG_REGISTERS {
            args.next_u32().unwrap();
        }
        assert!(matches!(
            args.next_u32(),
            Err(Error::BadArgumentEncoding { index: 4 })
        ));
    }

    #[test]
    fn test_pointer_argument_is_tagged() {
        let memory = shared_space();
        let data = {
            let mut mem = memory.write().unwrap();
            mem.reserve(0x1000, Protection::RW, RegionTag::Data).unwrap()
        };

        let mut ctx = CpuContext::new();
        ctx.set_reg(0, data.base() + 16);

        let mut args = ArgReader::new(&ctx, &memory);
        let ptr = args.next_ptr::<u32>().unwrap();
        assert_eq!(ptr.address(), data.base() + 16);
        assert_eq!(ptr.generation(), data.generation());
    }

    #[test]
    fn test_bogus_pointer_argument_rejected() {
        let memory = shared_space();
        let mut ctx = CpuContext::new();
        ctx.set_reg(0, 0x10);

        let mut args = ArgReader::new(&ctx, &memory);
        assert!(matches!(
            args.next_ptr::<u32>(),
            Err(Error::BadArgumentEncoding { index: 0 })
        ));
    }
}
