//! 停止中のサブジェクトのスレッドとレジスタを検査する

use crate::errors::InspectError;
use kazdb_target::{ContextGuard, RegisterSnapshot, TaskPort};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// 一つのスレッドの検査結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadSnapshot {
    /// 列挙順のインデックス
    pub index: usize,
    pub registers: RegisterSnapshot,
}

/// 一回の検査結果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inspection {
    /// 列挙されたスレッド数
    pub thread_count: usize,
    /// 読み取りに成功したスレッド（列挙順）
    pub threads: Vec<ThreadSnapshot>,
}

/// モニタから見た検査器
pub trait Inspect {
    /// 停止中のプロセスを検査する
    fn inspect(&mut self, pid: Pid) -> Result<Inspection, InspectError>;
}

/// `TaskPort` を使う検査器
///
/// サブジェクトが停止していることは呼び出し側の責任です。
/// 検査はレジスタもメモリも書き換えず、サブジェクトの状態も変えません。
pub struct Inspector<P: TaskPort> {
    port: P,
}

impl<P: TaskPort> Inspector<P> {
    /// 新しい検査器を作成する
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// 下位のポートを取得する
    pub fn port(&self) -> &P {
        &self.port
    }

    /// プロセスの全スレッドのレジスタを読み取る
    ///
    /// 1. 実行コンテキストを取得する（失敗時は何も保持していない）
    /// 2. スレッドを列挙する（失敗時はコンテキストを解放して返る）
    /// 3. 列挙順に各スレッドのレジスタを読み、読めたかどうかに関わらずそのスレッドを解放する
    /// 4. 一覧の領域、コンテキストの順に解放する
    pub fn inspect(&self, pid: Pid) -> Result<Inspection, InspectError> {
        let mut context =
            ContextGuard::acquire(&self.port, pid).map_err(InspectError::ContextUnavailable)?;
        let mut threads = context.threads().map_err(InspectError::EnumerationFailed)?;

        let thread_count = threads.thread_count();
        debug!("inspecting {} threads of pid {}", thread_count, pid);

        let mut snapshots = Vec::with_capacity(thread_count);
        for (index, thread) in threads.by_ref().enumerate() {
            match thread.read_registers() {
                Ok(registers) => snapshots.push(ThreadSnapshot { index, registers }),
                Err(e) => warn!("skipping thread {} of pid {}: {}", index, pid, e),
            }
        }

        drop(threads);
        drop(context);

        Ok(Inspection {
            thread_count,
            threads: snapshots,
        })
    }
}

impl<P: TaskPort> Inspect for Inspector<P> {
    fn inspect(&mut self, pid: Pid) -> Result<Inspection, InspectError> {
        Inspector::inspect(self, pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kazdb_target::PortError;
    use nix::errno::Errno;
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;

    /// 取得と解放の回数を数える偽のポート
    #[derive(Default)]
    struct CountingPort {
        threads: usize,
        deny_context: bool,
        fail_enumeration: bool,
        failing_reads: HashSet<usize>,

        contexts_acquired: Cell<usize>,
        contexts_released: Cell<usize>,
        threads_acquired: Cell<usize>,
        threads_released: Cell<usize>,
        lists_released: Cell<usize>,
        live_threads: Cell<usize>,
        max_live_threads: Cell<usize>,
        /// 解放時点の (スレッド, 解放直前の生存ハンドル数)
        releases: RefCell<Vec<(usize, usize)>>,
        /// 読み取り時点の (スレッド, 生存ハンドル数)
        reads: RefCell<Vec<(usize, usize)>>,
        released_out_of_order: Cell<bool>,
    }

    impl CountingPort {
        fn with_threads(threads: usize) -> Self {
            Self {
                threads,
                ..Default::default()
            }
        }
    }

    impl TaskPort for CountingPort {
        type Context = Pid;
        type Thread = usize;
        type ThreadList = usize;

        fn acquire_context(&self, pid: Pid) -> Result<Pid, PortError> {
            if self.deny_context {
                return Err(PortError::new("acquire_context", Errno::EPERM));
            }
            self.contexts_acquired.set(self.contexts_acquired.get() + 1);
            Ok(pid)
        }

        fn enumerate_threads(&self, _context: &mut Pid) -> Result<(usize, Vec<usize>), PortError> {
            if self.fail_enumeration {
                return Err(PortError::new("enumerate_threads", Errno::EINVAL));
            }
            self.threads_acquired.set(self.threads_acquired.get() + self.threads);
            let live = self.live_threads.get() + self.threads;
            self.live_threads.set(live);
            self.max_live_threads.set(self.max_live_threads.get().max(live));
            Ok((self.threads, (0..self.threads).collect()))
        }

        fn read_registers(&self, thread: &usize) -> Result<RegisterSnapshot, PortError> {
            self.reads.borrow_mut().push((*thread, self.live_threads.get()));
            if self.failing_reads.contains(thread) {
                return Err(PortError::new("read_registers", Errno::EFAULT));
            }
            let mut registers = RegisterSnapshot {
                pc: 0x1000 * (*thread as u64 + 1),
                sp: 0x7fff_0000 - (*thread as u64) * 0x100,
                ..Default::default()
            };
            registers.gpr[0] = *thread as u64;
            Ok(registers)
        }

        fn release_thread(&self, thread: usize) {
            self.releases.borrow_mut().push((thread, self.live_threads.get()));
            self.threads_released.set(self.threads_released.get() + 1);
            self.live_threads.set(self.live_threads.get() - 1);
        }

        fn release_thread_list(&self, list: usize) {
            assert_eq!(list, self.threads);
            if self.live_threads.get() != 0 {
                self.released_out_of_order.set(true);
            }
            self.lists_released.set(self.lists_released.get() + 1);
        }

        fn release_context(&self, _context: Pid) {
            if self.live_threads.get() != 0 || self.lists_released.get() != self.contexts_acquired.get() {
                self.released_out_of_order.set(true);
            }
            self.contexts_released.set(self.contexts_released.get() + 1);
        }
    }

    fn pid() -> Pid {
        Pid::from_raw(4242)
    }

    #[test]
    fn test_inspect_all_threads() {
        let inspector = Inspector::new(CountingPort::with_threads(4));
        let inspection = inspector.inspect(pid()).unwrap();

        assert_eq!(inspection.thread_count, 4);
        let indices: Vec<usize> = inspection.threads.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(inspection.threads[2].registers.pc, 0x3000);

        let port = inspector.port();
        assert_eq!(port.threads_acquired.get(), 4);
        assert_eq!(port.threads_released.get(), 4);
        assert_eq!(port.lists_released.get(), 1);
        assert_eq!(port.contexts_released.get(), 1);
        assert_eq!(port.max_live_threads.get(), 4);
        assert!(!port.released_out_of_order.get());
    }

    #[test]
    fn test_context_unavailable_releases_nothing() {
        let inspector = Inspector::new(CountingPort {
            threads: 3,
            deny_context: true,
            ..Default::default()
        });

        let err = inspector.inspect(pid()).unwrap_err();
        assert!(matches!(err, InspectError::ContextUnavailable(e) if e.errno == Errno::EPERM));

        let port = inspector.port();
        assert_eq!(port.threads_acquired.get(), 0);
        assert_eq!(port.contexts_released.get(), 0);
        assert_eq!(port.lists_released.get(), 0);
    }

    #[test]
    fn test_enumeration_failure_releases_context_once() {
        let inspector = Inspector::new(CountingPort {
            threads: 3,
            fail_enumeration: true,
            ..Default::default()
        });

        let err = inspector.inspect(pid()).unwrap_err();
        assert!(matches!(err, InspectError::EnumerationFailed(_)));

        let port = inspector.port();
        assert_eq!(port.threads_acquired.get(), 0);
        assert_eq!(port.threads_released.get(), 0);
        assert_eq!(port.lists_released.get(), 0);
        assert_eq!(port.contexts_released.get(), 1);
    }

    #[test]
    fn test_register_read_failure_skips_thread() {
        let inspector = Inspector::new(CountingPort {
            threads: 5,
            failing_reads: [2].into_iter().collect(),
            ..Default::default()
        });

        let inspection = inspector.inspect(pid()).unwrap();
        assert_eq!(inspection.thread_count, 5);
        let indices: Vec<usize> = inspection.threads.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1, 3, 4]);

        let port = inspector.port();
        assert_eq!(port.threads_released.get(), 5);
        assert_eq!(port.contexts_released.get(), 1);
        assert!(!port.released_out_of_order.get());
    }

    #[test]
    fn test_multiple_read_failures_keep_order() {
        let inspector = Inspector::new(CountingPort {
            threads: 6,
            failing_reads: [0, 3, 5].into_iter().collect(),
            ..Default::default()
        });

        let inspection = inspector.inspect(pid()).unwrap();
        let values: Vec<u64> = inspection.threads.iter().map(|t| t.registers.gpr[0]).collect();
        assert_eq!(values, vec![1, 2, 4]);
        assert_eq!(inspector.port().threads_released.get(), 6);
    }

    #[test]
    fn test_every_read_fails() {
        let inspector = Inspector::new(CountingPort {
            threads: 2,
            failing_reads: [0, 1].into_iter().collect(),
            ..Default::default()
        });

        let inspection = inspector.inspect(pid()).unwrap();
        assert_eq!(inspection.thread_count, 2);
        assert!(inspection.threads.is_empty());
        assert_eq!(inspector.port().threads_released.get(), 2);
    }

    #[test]
    fn test_repeated_inspections_do_not_leak() {
        let mut inspector = Inspector::new(CountingPort::with_threads(3));
        for _ in 0..4 {
            Inspect::inspect(&mut inspector, pid()).unwrap();
        }

        let port = inspector.port();
        assert_eq!(port.contexts_acquired.get(), 4);
        assert_eq!(port.contexts_released.get(), 4);
        assert_eq!(port.threads_acquired.get(), 12);
        assert_eq!(port.threads_released.get(), 12);
        assert_eq!(port.live_threads.get(), 0);
        assert_eq!(port.max_live_threads.get(), 3);
    }

    #[test]
    fn test_each_thread_released_before_next_read() {
        let inspector = Inspector::new(CountingPort {
            threads: 5,
            failing_reads: [1].into_iter().collect(),
            ..Default::default()
        });
        inspector.inspect(pid()).unwrap();

        let port = inspector.port();
        // k番目のスレッドを解放する時点で生きているのは k..n の n - k 個
        assert_eq!(
            *port.releases.borrow(),
            vec![(0, 5), (1, 4), (2, 3), (3, 2), (4, 1)]
        );
        // 読み取りも同様で、前のスレッドはすでに解放されている
        assert_eq!(
            *port.reads.borrow(),
            vec![(0, 5), (1, 4), (2, 3), (3, 2), (4, 1)]
        );
        assert_eq!(port.max_live_threads.get(), 5);
    }
}
