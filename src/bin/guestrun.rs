//! Command-line bootstrap: loads a flat guest code image and runs its main
//! thread to a terminal state.

use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use guestrun::dispatch::{ImportTable, UnimplementedPolicy};
use guestrun::host::{ConsolePlatform, ExitCode, HostState, Platform, MAIN_THREAD_STACK_SIZE};
use guestrun::loader::RawImage;
use guestrun::thread::{run, RunOutcome};

#[derive(Parser)]
#[command(
    name = "guestrun",
    version,
    about = "Runs a flat guest code image under the HLE runtime"
)]
struct Args {
    /// Path to the module to execute.
    module: PathBuf,

    /// Fault the guest thread on unimplemented imports instead of
    /// stubbing them with a zero result.
    #[arg(long)]
    strict_imports: bool,

    /// Main thread stack size in bytes.
    #[arg(long, default_value_t = MAIN_THREAD_STACK_SIZE)]
    stack_size: u32,
}

fn main() -> ProcessExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return process_exit(ExitCode::IncorrectArguments);
        }
    };

    let platform = ConsolePlatform::new();
    match bootstrap(&args, &platform) {
        Ok(code) => process_exit(code),
        Err((code, error)) => {
            platform.present_error(&format!("{error:#}"));
            process_exit(code)
        }
    }
}

type BootstrapError = (ExitCode, anyhow::Error);

fn bootstrap(args: &Args, platform: &ConsolePlatform) -> Result<ExitCode, BootstrapError> {
    let policy = if args.strict_imports {
        UnimplementedPolicy::FaultThread
    } else {
        UnimplementedPolicy::StubZero
    };

    let host = HostState::new(ImportTable::new(), policy)
        .context("host state initialization failed")
        .map_err(|e| (ExitCode::HostInitFailed, e))?;

    let image = RawImage::from_file(&args.module)
        .with_context(|| format!("cannot read module {}", args.module.display()))
        .map_err(|e| (ExitCode::ModuleLoadFailed, e))?;
    let loaded = host
        .load_module(&image)
        .context("module load failed")
        .map_err(|e| (ExitCode::ModuleLoadFailed, e))?;

    let main_thread = host
        .spawn_guest_thread(loaded.entry, args.stack_size)
        .context("main thread creation failed")
        .map_err(|e| (ExitCode::ThreadInitFailed, e))?;

    // Ctrl-C asks the engine to wind the guest down instead of killing the
    // process mid-write.
    let interrupt_target = Arc::clone(&main_thread);
    ctrlc::set_handler(move || interrupt_target.request_terminate())
        .context("cannot install the interrupt handler")
        .map_err(|e| (ExitCode::PlatformInitFailed, e))?;

    host.mark_start(platform);
    let outcome = run(&main_thread)
        .context("main thread failed to run")
        .map_err(|e| (ExitCode::ThreadRunFailed, e))?;

    host.kernel().deregister(main_thread.uid());
    if let Some(start) = host.start_ticks() {
        log::info!("guest ran for {} ms", platform.ticks().saturating_sub(start));
    }

    match outcome {
        RunOutcome::Finished(code) => {
            log::info!("guest main returned {code:#x}");
            Ok(ExitCode::Success)
        }
        RunOutcome::Terminated => {
            log::info!("guest main terminated");
            Ok(ExitCode::Success)
        }
        RunOutcome::Faulted(fault) => Err((
            ExitCode::ThreadRunFailed,
            anyhow::anyhow!("guest main faulted: {fault:?}"),
        )),
    }
}

fn process_exit(code: ExitCode) -> ProcessExitCode {
    ProcessExitCode::from(u8::try_from(code.code()).unwrap_or(1))
}
