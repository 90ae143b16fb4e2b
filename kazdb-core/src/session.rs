//! サブジェクトの起動から終了までをまとめるセッション

use crate::inspector::Inspector;
use crate::monitor::{Monitor, MonitorStats, TerminationReason};
use crate::report::{RegisterSelection, Reporter};
use crate::subject::{run_subject, SubjectConfig};
use crate::Result;
use kazdb_target::{NativeControl, ProcfsTaskPort, Subject};
use std::io::{self, Write};

/// セッションの設定
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub subject: SubjectConfig,
    pub registers: RegisterSelection,
}

/// セッションの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub reason: TerminationReason,
    pub stats: MonitorStats,
}

/// サブジェクトを起動し、終了するまで監視するセッション
pub struct Session {
    config: SessionConfig,
}

impl Session {
    /// 新しいセッションを作成する
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// サブジェクトを起動して監視する
    ///
    /// 起動の失敗は致命的で、そのままエラーとして返します（再試行はしません）。
    /// サブジェクト自身の出力は標準出力に書かれます。
    pub fn run<W: Write>(&self, out: W) -> Result<SessionOutcome> {
        let subject_config = &self.config.subject;
        let subject = Subject::spawn(|| run_subject(subject_config, &mut io::stdout()))?;

        let mut monitor = Monitor::new(
            NativeControl::new(),
            Inspector::new(ProcfsTaskPort::new()),
            Reporter::new(out, self.config.registers.clone()),
        );
        let reason = monitor.run(subject.pid())?;

        Ok(SessionOutcome {
            reason,
            stats: monitor.stats(),
        })
    }
}
