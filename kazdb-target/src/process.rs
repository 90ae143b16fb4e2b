//! プロセス制御機能

use crate::Result;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::debug;

/// サブジェクトプロセスの生成失敗
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to fork subject process: {0}")]
    Fork(#[from] Errno),
}

/// 生成したサブジェクトプロセスのハンドル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pid: Pid,
}

impl Subject {
    /// プロセスIDを取得する
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// 子プロセスを生成し、子側で `entry` を実行する
    ///
    /// 子プロセスは `entry` の戻り値を終了コードとして終了し、呼び出し元には戻りません。
    /// 親プロセスには子のハンドルが返ります。
    /// 子は `_exit` で終了するので、`entry` は自分の出力を終了前にフラッシュする必要があります。
    pub fn spawn<F>(entry: F) -> std::result::Result<Self, SpawnError>
    where
        F: FnOnce() -> i32,
    {
        match unsafe { fork()? } {
            ForkResult::Parent { child } => {
                debug!("spawned subject process {}", child);
                Ok(Self { pid: child })
            }
            ForkResult::Child => {
                let code = entry();
                // 親から引き継いだ終了処理（標準出力のロックなど）は走らせない
                unsafe { nix::libc::_exit(code) }
            }
        }
    }
}

/// サブジェクトの状態変化の通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// シグナルで停止した
    Halted(Signal),
    /// 実行を再開した
    Resumed,
    /// 正常終了した
    ExitedNormally(i32),
    /// シグナルで終了した
    ExitedBySignal(Signal),
}

impl LifecycleEvent {
    /// waitpidの結果を分類する
    ///
    /// ptraceイベントなど、ライフサイクルに関係しない状態は `None` になります。
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Stopped(_, signal) => Some(Self::Halted(signal)),
            WaitStatus::Continued(_) => Some(Self::Resumed),
            WaitStatus::Exited(_, code) => Some(Self::ExitedNormally(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::ExitedBySignal(signal)),
            _ => None,
        }
    }
}

/// サブジェクトの待機と再開のプリミティブ
pub trait ProcessControl {
    /// 次の状態変化までブロックする
    fn wait_event(&mut self, subject: Pid) -> Result<LifecycleEvent>;

    /// 停止中のサブジェクトに再開を要求する
    fn resume(&mut self, subject: Pid) -> Result<()>;
}

/// waitpidとkillによるネイティブ実装
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeControl;

impl NativeControl {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessControl for NativeControl {
    fn wait_event(&mut self, subject: Pid) -> Result<LifecycleEvent> {
        let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        loop {
            let status = match waitpid(subject, Some(flags)) {
                Ok(status) => status,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(anyhow::anyhow!("waitpid({}) failed: {}", subject, e));
                }
            };

            match LifecycleEvent::from_wait_status(status) {
                Some(event) => return Ok(event),
                None => debug!("ignoring wait status {:?}", status),
            }
        }
    }

    fn resume(&mut self, subject: Pid) -> Result<()> {
        kill(subject, Signal::SIGCONT)
            .map_err(|e| anyhow::anyhow!("failed to send SIGCONT to {}: {}", subject, e))
    }
}
