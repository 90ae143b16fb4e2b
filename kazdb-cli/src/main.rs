//! kazdb CLI - コマンドラインインターフェース
//!
//! サブジェクトプロセスを起動し、停止するたびにスレッドのレジスタを表示する

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kazdb_core::parse::parse_register_list;
use kazdb_core::{RegisterSelection, Session, SessionConfig, SubjectAction, SubjectConfig};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// kazdb - process halt inspector
#[derive(Parser)]
#[command(name = "kazdb")]
#[command(version = "0.1.0")]
#[command(about = "Spawn a subject process and dump its thread registers whenever it halts", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: MonitorCommand,
}

#[derive(Subcommand)]
enum MonitorCommand {
    /// Spawn a subject and monitor it until it exits
    Run(RunArgs),
}

/// What the subject does on each cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Send SIGSTOP to itself
    Stop,
    /// Replace its own image with another program
    Exec,
}

#[derive(Args)]
struct RunArgs {
    /// Halt trigger used by the subject
    #[arg(long, value_enum, default_value_t = Mode::Stop)]
    mode: Mode,

    /// Program the subject replaces itself with (exec mode)
    #[arg(long, required_if_eq("mode", "exec"))]
    exec_path: Option<PathBuf>,

    /// Argument passed to the replacement program (repeatable)
    #[arg(long = "exec-arg", allow_hyphen_values = true)]
    exec_args: Vec<String>,

    /// Milliseconds the subject waits before each cycle
    #[arg(long, default_value_t = 3000)]
    interval_ms: u64,

    /// Number of self-stops before the subject exits (unbounded if omitted)
    #[arg(long)]
    cycles: Option<u32>,

    /// General-purpose registers to print (names or indices, comma separated)
    #[arg(long, default_value = "rax,rdi")]
    registers: String,

    /// Print every general-purpose register and the flags
    #[arg(long, conflicts_with = "registers")]
    all_registers: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        MonitorCommand::Run(args) => run(args),
    }
}

/// ログ出力を初期化する
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Runコマンドを処理する
fn run(args: RunArgs) -> Result<()> {
    let config = session_config(args)?;
    debug!("session config: {:?}", config);

    println!("kazdb - process halt inspector");
    println!("Version 0.1.0");
    println!();

    let session = Session::new(config);
    let outcome = session.run(io::stdout())?;

    println!();
    println!(
        "Monitor finished: {} ({} halts, {} failed inspections)",
        outcome.reason, outcome.stats.halts, outcome.stats.failed_inspections
    );
    Ok(())
}

/// コマンドライン引数からセッションの設定を作る
fn session_config(args: RunArgs) -> Result<SessionConfig> {
    let action = match args.mode {
        Mode::Stop => SubjectAction::SelfStop,
        Mode::Exec => {
            let path = args
                .exec_path
                .ok_or_else(|| anyhow::anyhow!("--exec-path is required in exec mode"))?;
            SubjectAction::ReplaceImage {
                path,
                args: args.exec_args,
            }
        }
    };

    let registers = if args.all_registers {
        RegisterSelection::All
    } else {
        RegisterSelection::Gprs(parse_register_list(&args.registers)?)
    };

    Ok(SessionConfig {
        subject: SubjectConfig {
            action,
            interval: Duration::from_millis(args.interval_ms),
            cycles: args.cycles,
        },
        registers,
    })
}
