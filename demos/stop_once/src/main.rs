//! kazdb の exec モード用の置き換え先プログラム
//! 起動すると一度だけ自分を停止させ、再開されたら終了コード0で終了します。
//!
//! ```text
//! kazdb run --mode exec --exec-path target/debug/stop_once
//! ```

use nix::sys::signal::{kill, Signal};
use nix::unistd::getpid;

fn main() {
    let pid = getpid();
    println!("stop_once (PID: {}) replaced the subject image", pid);

    if let Err(e) = kill(pid, Signal::SIGSTOP) {
        eprintln!("Failed to stop: {}", e);
        std::process::exit(1);
    }

    println!("stop_once resumed, exiting");
}
