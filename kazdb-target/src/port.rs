//! 実行コンテキスト（タスク）とスレッドのケーパビリティ
//!
//! `TaskPort` はOSのタスク/スレッド取得プリミティブを抽象化します。
//! 取得したハンドルはガード型（`ContextGuard`、`ThreadSetGuard`、`ThreadGuard`）
//! に包まれ、どの経路で抜けても解放がちょうど一回行われます。

use crate::RegisterSnapshot;
use nix::errno::Errno;
use nix::unistd::Pid;
use std::collections::VecDeque;

/// ケーパビリティ操作の失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{op} failed: {errno}")]
pub struct PortError {
    /// 失敗した操作名
    pub op: &'static str,
    /// OSのエラーコード
    pub errno: Errno,
}

impl PortError {
    pub fn new(op: &'static str, errno: Errno) -> Self {
        Self { op, errno }
    }
}

/// タスク/スレッド取得プリミティブ
///
/// 解放系のメソッドは冪等ではありません。各ハンドルはちょうど一回だけ
/// 解放する必要があり、通常はガード型経由でのみ呼び出します。
pub trait TaskPort {
    /// 実行コンテキストのハンドル
    type Context;
    /// スレッドのハンドル
    type Thread;
    /// スレッド一覧の領域
    type ThreadList;

    /// プロセスの実行コンテキストを取得する
    fn acquire_context(&self, pid: Pid) -> Result<Self::Context, PortError>;

    /// スレッドを列挙する
    ///
    /// 返されるスレッドハンドルはすべて取得済みです。順序は列挙順です。
    fn enumerate_threads(
        &self,
        context: &mut Self::Context,
    ) -> Result<(Self::ThreadList, Vec<Self::Thread>), PortError>;

    /// スレッドのレジスタを読み取る
    fn read_registers(&self, thread: &Self::Thread) -> Result<RegisterSnapshot, PortError>;

    /// スレッドハンドルを解放する
    fn release_thread(&self, thread: Self::Thread);

    /// スレッド一覧の領域を解放する
    fn release_thread_list(&self, list: Self::ThreadList);

    /// 実行コンテキストを解放する
    fn release_context(&self, context: Self::Context);
}

/// 実行コンテキストのガード
pub struct ContextGuard<'p, P: TaskPort + ?Sized> {
    port: &'p P,
    context: Option<P::Context>,
}

impl<'p, P: TaskPort + ?Sized> ContextGuard<'p, P> {
    /// 実行コンテキストを取得する
    ///
    /// 失敗した場合は何も保持していないので、解放も行われません。
    pub fn acquire(port: &'p P, pid: Pid) -> Result<Self, PortError> {
        let context = port.acquire_context(pid)?;
        Ok(Self {
            port,
            context: Some(context),
        })
    }

    /// スレッドを列挙してスレッド集合のガードを返す
    pub fn threads(&mut self) -> Result<ThreadSetGuard<'p, P>, PortError> {
        let context = self
            .context
            .as_mut()
            .ok_or(PortError::new("enumerate_threads", Errno::EBADF))?;
        let (list, threads) = self.port.enumerate_threads(context)?;
        Ok(ThreadSetGuard {
            port: self.port,
            count: threads.len(),
            list: Some(list),
            threads: threads.into(),
        })
    }
}

impl<P: TaskPort + ?Sized> Drop for ContextGuard<'_, P> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.port.release_context(context);
        }
    }
}

/// スレッド集合のガード
///
/// イテレータとして列挙順に `ThreadGuard` を一つずつ渡します。
/// 取り出されなかったスレッドはドロップ時に解放され、その後で一覧の領域が解放されます。
pub struct ThreadSetGuard<'p, P: TaskPort + ?Sized> {
    port: &'p P,
    count: usize,
    list: Option<P::ThreadList>,
    threads: VecDeque<P::Thread>,
}

impl<P: TaskPort + ?Sized> ThreadSetGuard<'_, P> {
    /// 列挙されたスレッド数
    pub fn thread_count(&self) -> usize {
        self.count
    }
}

impl<'p, P: TaskPort + ?Sized> Iterator for ThreadSetGuard<'p, P> {
    type Item = ThreadGuard<'p, P>;

    fn next(&mut self) -> Option<Self::Item> {
        let thread = self.threads.pop_front()?;
        Some(ThreadGuard {
            port: self.port,
            thread: Some(thread),
        })
    }
}

impl<P: TaskPort + ?Sized> Drop for ThreadSetGuard<'_, P> {
    fn drop(&mut self) {
        while let Some(thread) = self.threads.pop_front() {
            self.port.release_thread(thread);
        }
        if let Some(list) = self.list.take() {
            self.port.release_thread_list(list);
        }
    }
}

/// スレッドハンドルのガード
pub struct ThreadGuard<'p, P: TaskPort + ?Sized> {
    port: &'p P,
    thread: Option<P::Thread>,
}

impl<P: TaskPort + ?Sized> ThreadGuard<'_, P> {
    /// レジスタを読み取る
    pub fn read_registers(&self) -> Result<RegisterSnapshot, PortError> {
        match &self.thread {
            Some(thread) => self.port.read_registers(thread),
            None => Err(PortError::new("read_registers", Errno::EBADF)),
        }
    }
}

impl<P: TaskPort + ?Sized> Drop for ThreadGuard<'_, P> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.port.release_thread(thread);
        }
    }
}
