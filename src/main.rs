//! vmsim - demand-paging simulator CLI
//!
//! Usage:
//!   vmsim run workload.txt                 # execute a workload script
//!   vmsim run                              # interactive session on stdin
//!   vmsim run --policy lru --log-level verbose workload.txt
//!   vmsim optimal --frames 3 trace.txt     # offline Belady baseline

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use vmsim::constants::{DEFAULT_MEMORY_SIZE, DEFAULT_PAGE_SIZE};
use vmsim::io::{Command as WorkloadCommand, Workload, parse_line, read_trace};
use vmsim::{LogLevel, ReplacementPolicy, VirtualMemoryManager, VmError, optimal};

#[derive(Parser)]
#[command(name = "vmsim", version, about = "Two-level demand-paging simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workload script, or an interactive session when no script is
    /// given
    Run {
        /// Workload script file; omit to type commands interactively
        script: Option<PathBuf>,

        /// Total memory size, in the same unit as the page size
        #[arg(long, default_value_t = DEFAULT_MEMORY_SIZE)]
        memory_size: usize,

        /// Page/frame size
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Replacement policy: fifo, lru, or clock
        #[arg(long, default_value_t = ReplacementPolicy::Fifo)]
        policy: ReplacementPolicy,

        /// Diagnostic verbosity: normal, verbose, or debug
        #[arg(long, default_value_t = LogLevel::Normal)]
        log_level: LogLevel,
    },

    /// Run the offline Optimal (Belady) simulation over a VPN trace
    Optimal {
        /// Whitespace-separated VPN trace file
        trace: PathBuf,

        /// Number of physical frames to simulate
        #[arg(long, default_value_t = 4)]
        frames: usize,
    },
}

fn main() -> ExitCode {
    match Cli::parse().command {
        Commands::Run {
            script,
            memory_size,
            page_size,
            policy,
            log_level,
        } => {
            if page_size == 0 || memory_size < page_size {
                eprintln!("Error: memory size must hold at least one page");
                return ExitCode::FAILURE;
            }
            let mut vmm = VirtualMemoryManager::new(memory_size, page_size, policy);
            vmm.set_log_level(log_level);
            match script {
                Some(path) => run_script(&mut vmm, &path),
                None => run_interactive(&mut vmm),
            }
        }
        Commands::Optimal { trace, frames } => run_optimal(&trace, frames),
    }
}

fn run_script(vmm: &mut VirtualMemoryManager, path: &Path) -> ExitCode {
    let workload = match Workload::from_file(path) {
        Ok(workload) => workload,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    for command in workload.commands {
        if let Err(e) = apply(vmm, command) {
            eprintln!("Fatal: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn run_interactive(vmm: &mut VirtualMemoryManager) -> ExitCode {
    println!(
        "vmsim: {} frames of size {}, {} replacement ('quit' to exit)",
        vmm.total_frames(),
        vmm.page_size(),
        vmm.policy()
    );

    let stdin = std::io::stdin();
    let mut line_no = 0;
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return ExitCode::SUCCESS,
            Ok(_) => {}
        }
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if matches!(trimmed, "quit" | "exit") {
            return ExitCode::SUCCESS;
        }

        match parse_line(trimmed, line_no) {
            Ok(command) => {
                if let Err(e) = apply(vmm, command) {
                    eprintln!("Fatal: {e}");
                    return ExitCode::FAILURE;
                }
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
}

/// Execute one command, printing its result. Caller-input errors are printed
/// and absorbed; only fatal internal errors propagate.
fn apply(vmm: &mut VirtualMemoryManager, command: WorkloadCommand) -> Result<(), VmError> {
    match command {
        WorkloadCommand::Alloc { pid } => absorb(vmm.allocate_process(pid), |()| {
            println!("allocated process {pid}");
        }),
        WorkloadCommand::Access { pid, vpn, access } => {
            absorb(vmm.access_page(pid, vpn, access), |outcome| {
                println!("P{pid} {access} VP{vpn}: {outcome}");
            })
        }
        WorkloadCommand::SetPerms { pid, vpn, perms } => {
            absorb(vmm.set_page_permissions(pid, vpn, perms), |()| {
                println!("P{pid} VP{vpn} permissions: {perms}");
            })
        }
        WorkloadCommand::Free { pid } => absorb(vmm.free_process(pid), |released| {
            println!("freed process {pid} ({released} frames returned)");
        }),
        WorkloadCommand::DumpPageTable { pid } => absorb(vmm.dump_page_table(pid), |dump| {
            print!("{dump}");
        }),
        WorkloadCommand::DumpFrames => {
            print!("{}", vmm.dump_frame_table());
            Ok(())
        }
        WorkloadCommand::Faults => {
            println!(
                "page faults: {}, protection faults: {}",
                vmm.page_fault_count(),
                vmm.protection_fault_count()
            );
            Ok(())
        }
    }
}

fn absorb<T>(result: Result<T, VmError>, on_ok: impl FnOnce(T)) -> Result<(), VmError> {
    match result {
        Ok(value) => {
            on_ok(value);
            Ok(())
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            eprintln!("error: {e}");
            Ok(())
        }
    }
}

fn run_optimal(path: &Path, frames: usize) -> ExitCode {
    let trace = match read_trace(path) {
        Ok(trace) => trace,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let report = optimal::simulate(frames, &trace);
    println!("=== Optimal (Belady) ===");
    println!("Frames:    {frames}");
    println!("Accesses:  {}", report.accesses);
    println!("Faults:    {}", report.faults);
    println!("Evictions: {}", report.evictions.len());
    for eviction in &report.evictions {
        println!(
            "  step {}: evicted VP{} for VP{}",
            eviction.step, eviction.vpn, eviction.replaced_by
        );
    }
    ExitCode::SUCCESS
}
