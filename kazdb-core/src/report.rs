//! 状態行の出力先
//!
//! モニタはコンソールに直接書かず、注入された `Write` にこのレポータ経由で書きます。
//! 書き込みに失敗してもモニタの処理（特にサブジェクトの再開）は止めません。

use crate::errors::InspectError;
use crate::inspector::{Inspection, ThreadSnapshot};
use kazdb_target::{gpr_index, GPR_NAMES};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fmt;
use std::io::Write;
use tracing::warn;

/// 表示するレジスタの選択
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterSelection {
    /// 指定した汎用レジスタ（インデックス）のみ
    Gprs(Vec<usize>),
    /// すべての汎用レジスタとフラグ
    All,
}

impl Default for RegisterSelection {
    fn default() -> Self {
        let defaults = ["rax", "rdi"];
        Self::Gprs(defaults.iter().filter_map(|name| gpr_index(name)).collect())
    }
}

/// 状態行を書き出すレポータ
pub struct Reporter<W: Write> {
    out: W,
    selection: RegisterSelection,
}

impl<W: Write> Reporter<W> {
    /// 新しいレポータを作成する
    pub fn new(out: W, selection: RegisterSelection) -> Self {
        Self { out, selection }
    }

    /// 出力先を取り出す
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{}", args) {
            warn!("failed to write status line: {}", e);
        }
    }

    pub fn monitor_started(&mut self, monitor: Pid, subject: Pid) {
        self.line(format_args!(
            "Monitor (PID: {}) observing subject (PID: {})",
            monitor, subject
        ));
    }

    pub fn halted(&mut self, signal: Signal) {
        self.line(format_args!(
            "Subject was stopped by signal {} ({})",
            signal as i32,
            signal
        ));
    }

    pub fn inspection(&mut self, inspection: &Inspection) {
        self.line(format_args!(
            "Process has {} threads",
            inspection.thread_count
        ));
        for thread in &inspection.threads {
            self.thread(thread);
        }
    }

    fn thread(&mut self, thread: &ThreadSnapshot) {
        let i = thread.index;
        let regs = thread.registers;
        self.line(format_args!("Thread {} PC: 0x{:x}", i, regs.pc));
        self.line(format_args!("Thread {} SP: 0x{:x}", i, regs.sp));

        let selected: Vec<(&str, u64)> = match &self.selection {
            RegisterSelection::Gprs(indices) => indices
                .iter()
                .filter_map(|&index| regs.gpr(index).map(|value| (GPR_NAMES[index], value)))
                .collect(),
            RegisterSelection::All => GPR_NAMES
                .iter()
                .copied()
                .zip(regs.gpr)
                .chain(std::iter::once(("flags", regs.flags)))
                .collect(),
        };
        for (name, value) in selected {
            self.line(format_args!("Thread {} {}: 0x{:x}", i, name, value));
        }
    }

    pub fn inspection_failed(&mut self, error: &InspectError) {
        self.line(format_args!("Inspection failed: {}", error));
    }

    pub fn resuming(&mut self) {
        self.line(format_args!("Sending SIGCONT to subject..."));
    }

    pub fn resumed(&mut self) {
        self.line(format_args!("Subject was continued"));
    }

    pub fn exited(&mut self, code: i32) {
        self.line(format_args!("Subject exited normally with status {}", code));
    }

    pub fn terminated(&mut self, signal: Signal) {
        self.line(format_args!("Subject was terminated by signal {}", signal));
    }
}
