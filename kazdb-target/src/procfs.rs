//! /proc と ptrace によるネイティブの `TaskPort` 実装
//!
//! 実行コンテキストは `/proc/<pid>/task` のディレクトリハンドル、
//! スレッドハンドルは PTRACE_SEIZE したスレッドです。
//! デタッチはシグナルを注入しないので、グループ停止中のスレッドは停止したままです。

use crate::port::{PortError, TaskPort};
use crate::thread::SeizedThread;
use crate::RegisterSnapshot;
use nix::dir::Dir;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::ptrace;
use nix::sys::stat::Mode;
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

/// `/proc/<pid>/task` のディレクトリハンドル
pub struct TaskDir {
    pid: Pid,
    dir: Dir,
}

/// ネイティブの `TaskPort`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsTaskPort;

impl ProcfsTaskPort {
    pub fn new() -> Self {
        Self
    }
}

impl TaskPort for ProcfsTaskPort {
    type Context = TaskDir;
    type Thread = SeizedThread;
    type ThreadList = Vec<Pid>;

    fn acquire_context(&self, pid: Pid) -> Result<TaskDir, PortError> {
        let path = format!("/proc/{}/task", pid);
        let dir = Dir::open(
            path.as_str(),
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| PortError::new("open task directory", e))?;
        trace!("acquired task directory for pid {}", pid);
        Ok(TaskDir { pid, dir })
    }

    fn enumerate_threads(
        &self,
        context: &mut TaskDir,
    ) -> Result<(Vec<Pid>, Vec<SeizedThread>), PortError> {
        let mut tids = Vec::new();
        for entry in context.dir.iter() {
            let entry = entry.map_err(|e| PortError::new("read task directory", e))?;
            // "." と ".." は数値として解釈できないので自然に除外される
            let tid = std::str::from_utf8(entry.file_name().to_bytes())
                .ok()
                .and_then(|name| name.parse::<i32>().ok());
            if let Some(tid) = tid {
                tids.push(Pid::from_raw(tid));
            }
        }

        let leader = context.pid;
        let threads = seize_all(
            &tids,
            |tid| seize_thread(tid, tid == leader),
            |thread| self.release_thread(thread),
        )?;

        trace!(
            "enumerated {} threads of pid {} ({} listed)",
            threads.len(),
            context.pid,
            tids.len()
        );
        Ok((tids, threads))
    }

    fn read_registers(&self, thread: &SeizedThread) -> Result<RegisterSnapshot, PortError> {
        ptrace::getregs(thread.pid())
            .map(RegisterSnapshot::from)
            .map_err(|e| PortError::new("PTRACE_GETREGS", e))
    }

    fn release_thread(&self, thread: SeizedThread) {
        detach(thread.pid());
    }

    fn release_thread_list(&self, list: Vec<Pid>) {
        trace!("released thread list ({} entries)", list.len());
    }

    fn release_context(&self, context: TaskDir) {
        trace!("released task directory for pid {}", context.pid);
    }
}

/// 列挙順にスレッドをシーズする
///
/// ESRCH で失敗したスレッド（シーズ前に終了した）は集合から外します。
/// それ以外の失敗では、シーズ済みのスレッドをすべて解放してからエラーを返します。
fn seize_all<T>(
    tids: &[Pid],
    mut seize: impl FnMut(Pid) -> Result<T, PortError>,
    mut release: impl FnMut(T),
) -> Result<Vec<T>, PortError> {
    let mut threads = Vec::with_capacity(tids.len());
    for &tid in tids {
        match seize(tid) {
            Ok(thread) => threads.push(thread),
            Err(e) if e.errno == Errno::ESRCH => {
                debug!("thread {} vanished before it could be seized", tid);
            }
            Err(e) => {
                for thread in threads {
                    release(thread);
                }
                return Err(e);
            }
        }
    }
    Ok(threads)
}

/// スレッドをシーズし、トレース停止するまで待つ
fn seize_thread(tid: Pid, leader: bool) -> Result<SeizedThread, PortError> {
    ptrace::seize(tid, ptrace::Options::empty())
        .map_err(|e| PortError::new("PTRACE_SEIZE", e))?;

    if let Err(e) = ptrace::interrupt(tid) {
        detach(tid);
        return Err(PortError::new("PTRACE_INTERRUPT", e));
    }

    match wait_for_trap(tid, leader) {
        Ok(()) => Ok(SeizedThread::new(tid)),
        Err(e) if e.errno == Errno::ESRCH => Err(e),
        Err(e) => {
            detach(tid);
            Err(e)
        }
    }
}

/// スレッドのトレース停止を待って回収する
///
/// スレッドが終了していた場合は ESRCH を返します。
/// `leader` のとき（サブジェクト本体、つまりモニタの実の子）は終了状態を回収せずに残し、
/// モニタの次の待機が終了を受け取れるようにします。
fn wait_for_trap(tid: Pid, leader: bool) -> Result<(), PortError> {
    let status = if leader {
        let peek = WaitPidFlag::WEXITED
            | WaitPidFlag::WSTOPPED
            | WaitPidFlag::__WALL
            | WaitPidFlag::WNOWAIT;
        match retry_eintr(|| waitid(Id::Pid(tid), peek))? {
            WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                return Err(PortError::new("waitid", Errno::ESRCH));
            }
            // 停止だけを回収する
            _ => retry_eintr(|| waitpid(tid, Some(WaitPidFlag::__WALL)))?,
        }
    } else {
        retry_eintr(|| waitpid(tid, Some(WaitPidFlag::__WALL)))?
    };

    match status {
        WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
            Err(PortError::new("waitpid", Errno::ESRCH))
        }
        status => {
            trace!("thread {} trapped: {:?}", tid, status);
            Ok(())
        }
    }
}

fn retry_eintr(
    mut wait: impl FnMut() -> nix::Result<WaitStatus>,
) -> Result<WaitStatus, PortError> {
    loop {
        match wait() {
            Err(Errno::EINTR) => continue,
            result => return result.map_err(|e| PortError::new("waitpid", e)),
        }
    }
}

fn detach(tid: Pid) {
    match ptrace::detach(tid, None) {
        Ok(()) => trace!("detached thread {}", tid),
        Err(e) => warn!("failed to detach thread {}: {}", tid, e),
    }
}
