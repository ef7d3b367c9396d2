//! The execution engine: thread creation and the step loop.
//!
//! [`spawn_thread`] carves a stack out of the address space and seeds the
//! context; [`run`] drives a thread's fetch/decode/execute loop until it
//! reaches a terminal state. Executing one thread never touches another
//! thread's state: the engine works on a checked-out copy of the context
//! and goes through the shared address space and dispatcher for everything
//! else, both of which are safe under concurrent callers.

use crate::dispatch::{DispatchOutcome, DispatcherView, Nid};
use crate::memory::{GuestPtr, Protection, SharedAddressSpace};
use crate::thread::isa::{self, Instr};
use crate::thread::{
    CpuContext, Fault, GuestThread, RunOutcome, ThreadHandle, WaitReason, WaitResult,
    WAIT_TIMED_OUT,
};
use crate::{Error, Result};

/// Sentinel the link register is seeded with.
///
/// It lies outside any mappable region; when the program counter lands here
/// the thread has returned from its entry point and finishes with r0 as its
/// exit code.
pub const THREAD_EXIT_ADDR: u32 = 0xFFFF_F000;

/// Byte size of an import thunk (the `IMPORT` word plus the nid literal).
const IMPORT_THUNK_SIZE: u32 = 8;

/// What one executed step asks the run loop to do next.
enum Step {
    /// Fall through to the next fetch.
    Continue,
    /// Transfer to the dispatcher for this nid.
    Import(Nid),
}

/// Creates a guest thread ready to run.
///
/// Reserves a `stack_size` stack in `memory`, seeds the context (program
/// counter at `entry`, stack pointer at the stack top, link register at
/// [`THREAD_EXIT_ADDR`]), and returns the shared handle. The thread's uid is
/// the one `view` is bound to. The caller is responsible for registering
/// the handle with the kernel before starting execution, so other guest
/// threads can reference it by uid.
///
/// # Errors
///
/// Returns [`Error::StackAllocationFailed`] if the stack reservation fails.
pub fn spawn_thread(
    entry: GuestPtr<()>,
    stack_size: u32,
    memory: &SharedAddressSpace,
    view: DispatcherView,
) -> Result<ThreadHandle> {
    let uid = view.caller();
    let thread = std::sync::Arc::new(GuestThread::new(uid, memory.clone(), view));
    thread.initialize(entry.address(), stack_size)?;
    log::debug!("{uid}: thread initialized, entry {entry}");
    Ok(thread)
}

/// Runs a thread on the calling host thread until it reaches a terminal
/// state.
///
/// Blocks the caller for the thread's whole lifetime; the bootstrap runs
/// the main guest thread this way. Returns the terminal [`RunOutcome`] -
/// faults inside the guest are an `Ok(RunOutcome::Faulted(_))`, not an
/// `Err`, because they are local to the thread.
///
/// # Errors
///
/// Returns [`Error::ThreadNotRunnable`] if the thread is not in the
/// `Initialized` state (never started, or already run).
pub fn run(thread: &ThreadHandle) -> Result<RunOutcome> {
    let mut ctx = thread.begin_running()?;
    let uid = thread.uid();

    let outcome = loop {
        if thread.terminate_requested() {
            break RunOutcome::Terminated;
        }
        if ctx.pc() == THREAD_EXIT_ADDR {
            break RunOutcome::Finished(ctx.return_value());
        }

        match step(&mut ctx, thread.memory()) {
            Ok(Step::Continue) => {}
            Ok(Step::Import(nid)) => match thread.view().dispatch(nid, &mut ctx) {
                Ok(DispatchOutcome::Completed) => {
                    ctx.set_pc(ctx.pc().wrapping_add(IMPORT_THUNK_SIZE));
                }
                Ok(DispatchOutcome::Exit(code)) => break RunOutcome::Finished(code),
                Ok(DispatchOutcome::Block(spec)) => {
                    match thread.block(&ctx, spec) {
                        WaitResult::Notified => ctx.set_return(0),
                        WaitResult::TimedOut => {
                            // Expiry is the normal resume path for a sleep.
                            let result = if spec.reason == WaitReason::Sleep {
                                0
                            } else {
                                WAIT_TIMED_OUT
                            };
                            ctx.set_return(result);
                        }
                        WaitResult::Terminated => break RunOutcome::Terminated,
                    }
                    ctx.set_pc(ctx.pc().wrapping_add(IMPORT_THUNK_SIZE));
                }
                Err(error) => {
                    log::warn!("{uid}: import {nid} faulted: {error}");
                    break RunOutcome::Faulted(Fault::Dispatch { nid });
                }
            },
            Err(fault) => break RunOutcome::Faulted(fault),
        }
    };

    thread.finish(ctx, outcome);
    Ok(outcome)
}

/// Starts a thread on its own host thread.
///
/// Secondary guest threads are scheduled this way so one guest thread
/// blocking never stalls the others. The returned join handle yields what
/// [`run`] would have returned.
///
/// # Errors
///
/// Returns an error if the host thread could not be spawned.
pub fn start(thread: &ThreadHandle) -> Result<std::thread::JoinHandle<Result<RunOutcome>>> {
    let handle = std::sync::Arc::clone(thread);
    std::thread::Builder::new()
        .name(format!("guest-{:#x}", thread.uid().value()))
        .spawn(move || run(&handle))
        .map_err(Error::FileError)
}

/// Executes one instruction, updating the context in place.
fn step(ctx: &mut CpuContext, memory: &SharedAddressSpace) -> std::result::Result<Step, Fault> {
    let pc = ctx.pc();
    let word = fetch(memory, pc)?;
    let instr = isa::decode(word).ok_or(Fault::InvalidInstruction { address: pc, word })?;

    match instr {
        Instr::Movw { rd, imm } => {
            ctx.set_reg(rd, u32::from(imm));
        }
        Instr::Movt { rd, imm } => {
            ctx.set_reg(rd, (ctx.reg(rd) & 0xFFFF) | (u32::from(imm) << 16));
        }
        Instr::Mov { rd, ra } => {
            ctx.set_reg(rd, ctx.reg(ra));
        }
        Instr::Add { rd, ra, rb } => {
            ctx.set_reg(rd, ctx.reg(ra).wrapping_add(ctx.reg(rb)));
        }
        Instr::Sub { rd, ra, rb } => {
            ctx.set_reg(rd, ctx.reg(ra).wrapping_sub(ctx.reg(rb)));
        }
        Instr::Ldr { rd, ra, offset } => {
            let address = ctx.reg(ra).wrapping_add(u32::from(offset));
            let value = memory
                .read()
                .map_err(|_| Fault::InvalidMemoryAccess { address })?
                .read_value::<u32>(address, Protection::READ)
                .map_err(|_| Fault::InvalidMemoryAccess { address })?;
            ctx.set_reg(rd, value);
        }
        Instr::Str { rd, ra, offset } => {
            let address = ctx.reg(ra).wrapping_add(u32::from(offset));
            memory
                .write()
                .map_err(|_| Fault::InvalidMemoryAccess { address })?
                .write_value::<u32>(address, ctx.reg(rd), Protection::WRITE)
                .map_err(|_| Fault::InvalidMemoryAccess { address })?;
        }
        Instr::B { offset } => {
            ctx.set_pc(branch_target(pc, offset));
            return Ok(Step::Continue);
        }
        Instr::Cbnz { rd, offset } => {
            if ctx.reg(rd) != 0 {
                ctx.set_pc(branch_target(pc, offset));
                return Ok(Step::Continue);
            }
        }
        Instr::Import => {
            let nid = fetch(memory, pc.wrapping_add(4))?;
            return Ok(Step::Import(Nid::new(nid)));
        }
        Instr::Ret => {
            ctx.set_pc(ctx.lr());
            return Ok(Step::Continue);
        }
    }

    ctx.set_pc(pc.wrapping_add(4));
    Ok(Step::Continue)
}

/// Fetches one instruction word; requires EXEC permission.
fn fetch(memory: &SharedAddressSpace, address: u32) -> std::result::Result<u32, Fault> {
    memory
        .read()
        .map_err(|_| Fault::InvalidMemoryAccess { address })?
        .read_value::<u32>(address, Protection::EXEC)
        .map_err(|_| Fault::InvalidMemoryAccess { address })
}

/// Branch targets are word offsets relative to the next instruction.
fn branch_target(pc: u32, offset: i16) -> u32 {
    let base = pc.wrapping_add(4);
    if offset >= 0 {
        base.wrapping_add(u32::from(offset.unsigned_abs()) * 4)
    } else {
        base.wrapping_sub(u32::from(offset.unsigned_abs()) * 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{
        ImportDispatcher, ImportOutcome, ImportTable, UnimplementedPolicy,
    };
    use crate::kernel::Kernel;
    use crate::memory::{AddressSpace, RegionTag};
    use crate::thread::{RunStatus, WaitSpec};
    use std::sync::{Arc, RwLock};
    use std::time::Duration;

    struct Fixture {
        memory: SharedAddressSpace,
        kernel: Arc<Kernel>,
        dispatcher: Arc<ImportDispatcher>,
    }

    fn fixture(table: ImportTable, policy: UnimplementedPolicy) -> Fixture {
        let memory: SharedAddressSpace = Arc::new(RwLock::new(AddressSpace::default()));
        let kernel = Arc::new(Kernel::new());
        let dispatcher = Arc::new(ImportDispatcher::new(
            table,
            policy,
            Arc::clone(&kernel),
            Arc::clone(&memory),
        ));
        Fixture {
            memory,
            kernel,
            dispatcher,
        }
    }

    fn load_code(fixture: &Fixture, words: &[u32]) -> GuestPtr<()> {
        let mut mem = fixture.memory.write().unwrap();
        let bytes = isa::assemble(words);
        #[allow(clippy::cast_possible_truncation)]
        let region = mem
            .reserve(bytes.len() as u32, Protection::RX, RegionTag::Code)
            .unwrap();
        mem.populate(region, 0, &bytes).unwrap();
        region.ptr()
    }

    fn spawn(fixture: &Fixture, entry: GuestPtr<()>) -> ThreadHandle {
        let uid = fixture.kernel.allocate_uid();
        let view = DispatcherView::new(Arc::clone(&fixture.dispatcher), uid);
        spawn_thread(entry, 0x1000, &fixture.memory, view).unwrap()
    }

    #[test]
    fn test_plain_return_finishes_with_r0() {
        let fixture = fixture(ImportTable::new(), UnimplementedPolicy::FaultThread);
        let entry = load_code(&fixture, &[isa::movw(0, 7), isa::ret()]);
        let thread = spawn(&fixture, entry);

        let outcome = run(&thread).unwrap();
        assert_eq!(outcome, RunOutcome::Finished(7));
        assert_eq!(thread.status(), RunStatus::Finished(7));
    }

    #[test]
    fn test_alu_and_branches() {
        let fixture = fixture(ImportTable::new(), UnimplementedPolicy::FaultThread);
        // Count r0 down from 3 in a cbnz loop, then load 7 into r0.
        let entry = load_code(
            &fixture,
            &[
                isa::movw(0, 3),
                isa::movw(1, 1),
                isa::sub(0, 0, 1),
                isa::cbnz(0, -2), // back to the sub
                isa::movw(2, 7),
                isa::add(0, 0, 2),
                isa::ret(),
            ],
        );
        let thread = spawn(&fixture, entry);
        assert_eq!(run(&thread).unwrap(), RunOutcome::Finished(7));
    }

    #[test]
    fn test_stack_load_store() {
        let fixture = fixture(ImportTable::new(), UnimplementedPolicy::FaultThread);
        // Store r0 at [sp - 8], reload it into r0 via r2.
        let entry = load_code(
            &fixture,
            &[
                isa::movw(0, 0x55),
                isa::movw(1, 8),
                isa::sub(13, 13, 1), // sp -= 8
                isa::str(0, 13, 0),
                isa::movw(0, 0),
                isa::ldr(0, 13, 0),
                isa::ret(),
            ],
        );
        let thread = spawn(&fixture, entry);
        assert_eq!(run(&thread).unwrap(), RunOutcome::Finished(0x55));
    }

    #[test]
    fn test_invalid_instruction_faults() {
        let fixture = fixture(ImportTable::new(), UnimplementedPolicy::FaultThread);
        let entry = load_code(&fixture, &[0xFF00_0000]);
        let thread = spawn(&fixture, entry);

        let outcome = run(&thread).unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Faulted(Fault::InvalidInstruction { word: 0xFF00_0000, .. })
        ));
        assert!(thread.status().is_terminal());
    }

    #[test]
    fn test_invalid_load_faults() {
        let fixture = fixture(ImportTable::new(), UnimplementedPolicy::FaultThread);
        // r1 = 0x10 (unmapped), load through it.
        let entry = load_code(&fixture, &[isa::movw(1, 0x10), isa::ldr(0, 1, 0), isa::ret()]);
        let thread = spawn(&fixture, entry);

        let outcome = run(&thread).unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Faulted(Fault::InvalidMemoryAccess { address: 0x10 })
        ));
    }

    #[test]
    fn test_import_writes_result_and_continues() {
        let mut table = ImportTable::new();
        table
            .register(Nid::new(0x1234), "sceReturn42", |_| {
                Ok(ImportOutcome::Return(42))
            })
            .unwrap();
        let fixture = fixture(table, UnimplementedPolicy::FaultThread);

        let mut words = Vec::new();
        words.extend(isa::import(Nid::new(0x1234)));
        words.push(isa::ret());
        let entry = load_code(&fixture, &words);
        let thread = spawn(&fixture, entry);

        assert_eq!(run(&thread).unwrap(), RunOutcome::Finished(42));
        assert_eq!(thread.context_snapshot().return_value(), 42);
    }

    #[test]
    fn test_unimplemented_import_faults_under_strict_policy() {
        let fixture = fixture(ImportTable::new(), UnimplementedPolicy::FaultThread);

        let mut words = Vec::new();
        words.extend(isa::import(Nid::new(0xDEAD)));
        words.push(isa::ret());
        let entry = load_code(&fixture, &words);
        let thread = spawn(&fixture, entry);

        let outcome = run(&thread).unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Faulted(Fault::Dispatch { nid: Nid::new(0xDEAD) })
        );
    }

    #[test]
    fn test_unimplemented_import_stubs_under_lenient_policy() {
        let fixture = fixture(ImportTable::new(), UnimplementedPolicy::StubZero);

        let mut words = vec![isa::movw(0, 0xAAAA)];
        words.extend(isa::import(Nid::new(0xDEAD)));
        words.push(isa::ret());
        let entry = load_code(&fixture, &words);
        let thread = spawn(&fixture, entry);

        // The stub zeroes r0 and execution continues to a normal finish.
        assert_eq!(run(&thread).unwrap(), RunOutcome::Finished(0));
    }

    #[test]
    fn test_sleep_import_blocks_and_resumes() {
        let mut table = ImportTable::new();
        table
            .register(Nid::new(0x51EE), "sceSleepBrief", |_| {
                Ok(ImportOutcome::Block(WaitSpec::sleep(Duration::from_millis(5))))
            })
            .unwrap();
        let fixture = fixture(table, UnimplementedPolicy::FaultThread);

        let mut words = Vec::new();
        words.extend(isa::import(Nid::new(0x51EE)));
        words.push(isa::ret());
        let entry = load_code(&fixture, &words);
        let thread = spawn(&fixture, entry);

        assert_eq!(run(&thread).unwrap(), RunOutcome::Finished(0));
    }

    #[test]
    fn test_exit_import_finishes_immediately() {
        let mut table = ImportTable::new();
        table
            .register(Nid::new(0xE07), "sceThreadExit", |mut call| {
                let code = call.args.next_u32()?;
                Ok(ImportOutcome::Exit(code))
            })
            .unwrap();
        let fixture = fixture(table, UnimplementedPolicy::FaultThread);

        let mut words = vec![isa::movw(0, 9)];
        words.extend(isa::import(Nid::new(0xE07)));
        // Unreachable: the exit import never resumes.
        words.push(0xFF00_0000);
        let entry = load_code(&fixture, &words);
        let thread = spawn(&fixture, entry);

        assert_eq!(run(&thread).unwrap(), RunOutcome::Finished(9));
    }

    #[test]
    fn test_run_twice_is_rejected() {
        let fixture = fixture(ImportTable::new(), UnimplementedPolicy::FaultThread);
        let entry = load_code(&fixture, &[isa::ret()]);
        let thread = spawn(&fixture, entry);

        run(&thread).unwrap();
        assert!(matches!(run(&thread), Err(Error::ThreadNotRunnable { .. })));
    }
}
