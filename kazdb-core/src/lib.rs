//! kazdb のコア機能
//!
//! このクレートは、サブジェクトプロセスの監視と検査の中核となるロジックを提供します。
//! 停止・再開・終了の通知を待つモニタ、停止中のスレッドのレジスタを読む検査器、
//! 自分を停止させ続けるサブジェクト、状態行のレポータを統合します。

pub mod errors;
pub mod inspector;
pub mod monitor;
pub mod parse;
pub mod report;
pub mod session;
pub mod subject;

pub use errors::InspectError;
pub use inspector::{Inspect, Inspection, Inspector, ThreadSnapshot};
pub use monitor::{Monitor, MonitorState, MonitorStats, TerminationReason};
pub use report::{RegisterSelection, Reporter};
pub use session::{Session, SessionConfig, SessionOutcome};
pub use subject::{run_subject, SubjectAction, SubjectConfig};

// 他のクレートから使用するために再エクスポート
pub use kazdb_target::{LifecycleEvent, RegisterSnapshot, SpawnError};

/// コア処理の結果型
pub type Result<T> = anyhow::Result<T>;
