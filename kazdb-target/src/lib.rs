//! kazdb ターゲットプロセス制御
//!
//! このクレートは、観測対象のプロセスを制御するための低レベル機能を提供します。
//! fork、waitpid、シグナル送信、/proc と ptrace によるスレッドとレジスタの取得を行います。

pub mod process;
pub mod thread;
pub mod registers;
pub mod port;
pub mod procfs;

pub use process::{LifecycleEvent, NativeControl, ProcessControl, SpawnError, Subject};
pub use thread::SeizedThread;
pub use registers::{gpr_index, RegisterSnapshot, GPR_COUNT, GPR_NAMES};
pub use port::{ContextGuard, PortError, TaskPort, ThreadGuard, ThreadSetGuard};
pub use procfs::{ProcfsTaskPort, TaskDir};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
