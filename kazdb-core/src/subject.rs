//! サブジェクト側のループ
//!
//! fork された子プロセスで実行され、一定間隔で自分を停止させるか、
//! 別のプログラムに置き換わります。fork後の子で動くので tracing は使わず、
//! 渡された出力先にだけ書きます。

use crate::Result;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{execv, getpid};
use std::convert::Infallible;
use std::ffi::CString;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// execに失敗したときの終了コード
pub const EXIT_EXEC_FAILED: i32 = 127;

/// 各サイクルでサブジェクトが行うこと
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectAction {
    /// 自分に SIGSTOP を送る
    SelfStop,
    /// 別のプログラムに置き換わる
    ReplaceImage { path: PathBuf, args: Vec<String> },
}

/// サブジェクトの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectConfig {
    pub action: SubjectAction,
    /// 各サイクルの前に待つ時間
    pub interval: Duration,
    /// 自己停止の回数の上限（`None` なら無限）
    pub cycles: Option<u32>,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            action: SubjectAction::SelfStop,
            interval: Duration::from_secs(3),
            cycles: None,
        }
    }
}

/// サブジェクトのループを実行し、終了コードを返す
///
/// 置き換えに成功した場合は戻りません。
pub fn run_subject<W: Write>(config: &SubjectConfig, out: &mut W) -> i32 {
    let pid = getpid();
    say(out, format_args!("Subject process (PID: {}) starting", pid));

    let mut completed = 0u32;
    loop {
        if config.cycles.is_some_and(|limit| completed >= limit) {
            return 0;
        }

        say(out, format_args!("Subject running..."));
        std::thread::sleep(config.interval);

        match &config.action {
            SubjectAction::SelfStop => {
                if let Err(e) = kill(pid, Signal::SIGSTOP) {
                    say(out, format_args!("Failed to stop subject: {}", e));
                    return 1;
                }
            }
            SubjectAction::ReplaceImage { path, args } => match replace_image(path, args) {
                Ok(never) => match never {},
                Err(e) => {
                    say(out, format_args!("{:#}", e));
                    return EXIT_EXEC_FAILED;
                }
            },
        }
        completed += 1;
    }
}

fn say<W: Write>(out: &mut W, args: std::fmt::Arguments<'_>) {
    let _ = writeln!(out, "{}", args);
    let _ = out.flush();
}

/// プログラムイメージを置き換える
fn replace_image(path: &Path, args: &[String]) -> Result<Infallible> {
    let program = CString::new(path.as_os_str().as_bytes())?;
    let mut argv = vec![program.clone()];
    for arg in args {
        argv.push(CString::new(arg.as_str())?);
    }
    execv(&program, &argv).map_err(|e| anyhow::anyhow!("Failed to exec {}: {}", path.display(), e))
}
