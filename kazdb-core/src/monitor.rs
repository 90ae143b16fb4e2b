//! サブジェクトのライフサイクルモニタ
//!
//! waitpid（WUNTRACED | WCONTINUED）で状態変化を一つずつ待ち、
//! 停止するたびに検査器を呼んでから SIGCONT で再開させます。

use crate::inspector::Inspect;
use crate::report::Reporter;
use crate::Result;
use kazdb_target::{LifecycleEvent, ProcessControl};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fmt;
use std::io::Write;
use tracing::{debug, warn};

/// モニタから見たサブジェクトの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Running,
    Halted,
    Terminated,
}

/// サブジェクトが終了した理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// 正常終了（終了コード）
    NormalExit(i32),
    /// シグナルによる終了
    KilledBySignal(Signal),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NormalExit(code) => write!(f, "normal exit (code {})", code),
            Self::KilledBySignal(signal) => write!(f, "killed by signal {}", signal),
        }
    }
}

/// モニタの集計
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorStats {
    /// 観測した停止の回数
    pub halts: usize,
    /// 送った再開要求の回数
    pub resumes_sent: usize,
    /// 失敗した検査の回数
    pub failed_inspections: usize,
}

/// ライフサイクルモニタ
pub struct Monitor<C, I, W: Write> {
    control: C,
    inspector: I,
    reporter: Reporter<W>,
    state: MonitorState,
    stats: MonitorStats,
}

impl<C: ProcessControl, I: Inspect, W: Write> Monitor<C, I, W> {
    /// 新しいモニタを作成する
    pub fn new(control: C, inspector: I, reporter: Reporter<W>) -> Self {
        Self {
            control,
            inspector,
            reporter,
            state: MonitorState::Running,
            stats: MonitorStats::default(),
        }
    }

    /// 現在の状態
    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// これまでの集計
    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    /// 構成要素を取り出す
    pub fn into_parts(self) -> (C, I, Reporter<W>) {
        (self.control, self.inspector, self.reporter)
    }

    /// サブジェクトが終了するまで監視する
    ///
    /// タイムアウトはありません。待機プリミティブ自体が失敗した場合のみエラーを返します。
    pub fn run(&mut self, subject: Pid) -> Result<TerminationReason> {
        self.state = MonitorState::Running;
        self.reporter.monitor_started(nix::unistd::getpid(), subject);

        loop {
            let event = self.control.wait_event(subject)?;
            debug!("subject {}: {:?} while {:?}", subject, event, self.state);
            if let Some(reason) = self.dispatch(subject, event) {
                return Ok(reason);
            }
        }
    }

    fn dispatch(&mut self, subject: Pid, event: LifecycleEvent) -> Option<TerminationReason> {
        match event {
            LifecycleEvent::Halted(signal) => {
                self.state = MonitorState::Halted;
                self.stats.halts += 1;
                self.reporter.halted(signal);

                match self.inspector.inspect(subject) {
                    Ok(inspection) => self.reporter.inspection(&inspection),
                    Err(e) => {
                        self.stats.failed_inspections += 1;
                        self.reporter.inspection_failed(&e);
                    }
                }

                // 検査の成否に関わらず必ず再開させる
                self.reporter.resuming();
                self.stats.resumes_sent += 1;
                if let Err(e) = self.control.resume(subject) {
                    warn!("{:#}", e);
                }
                self.state = MonitorState::Running;
                None
            }
            LifecycleEvent::Resumed => {
                self.state = MonitorState::Running;
                self.reporter.resumed();
                None
            }
            LifecycleEvent::ExitedNormally(code) => {
                self.state = MonitorState::Terminated;
                self.reporter.exited(code);
                Some(TerminationReason::NormalExit(code))
            }
            LifecycleEvent::ExitedBySignal(signal) => {
                self.state = MonitorState::Terminated;
                self.reporter.terminated(signal);
                Some(TerminationReason::KilledBySignal(signal))
            }
        }
    }
}
