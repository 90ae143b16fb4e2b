//! 検査のエラー

use kazdb_target::PortError;

/// 検査全体の失敗
///
/// スレッドごとのレジスタ読み取り失敗はここには現れません。
/// そのスレッドを飛ばして検査を続けます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InspectError {
    /// 実行コンテキストを取得できなかった（権限がない、プロセスが存在しない）
    #[error("execution context unavailable: {0}")]
    ContextUnavailable(PortError),
    /// スレッドを列挙できなかった
    #[error("thread enumeration failed: {0}")]
    EnumerationFailed(PortError),
}
