//! スレッド管理機能

use nix::unistd::Pid;

/// PTRACE_SEIZE 済みのスレッド
///
/// `TaskPort::release_thread` でデタッチされるまで、このプロセスがトレーサです。
#[derive(Debug, PartialEq, Eq)]
pub struct SeizedThread {
    tid: Pid,
}

impl SeizedThread {
    pub(crate) fn new(tid: Pid) -> Self {
        Self { tid }
    }

    pub(crate) fn pid(&self) -> Pid {
        self.tid
    }
}
