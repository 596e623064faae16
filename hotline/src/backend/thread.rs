//! 投递线程
//!
//! 每个后端实例拥有一条专用线程，所有操作系统注册/注销都在这条线程上完成。
//! 这里统一处理线程的启动握手、存活标记和带超时的回收。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::error::{OsError, ResourceLeakWarning};

// 握手状态：线程体先报告或启动方先放弃，两者只有一个能成功
const HANDSHAKE_WAITING: u8 = 0;
const HANDSHAKE_REPORTED: u8 = 1;
const HANDSHAKE_ABANDONED: u8 = 2;

/// 启动握手信号
///
/// 线程体在完成注册后调用 [`StartupSignal::ready`]，失败时调用 [`StartupSignal::fail`]
pub struct StartupSignal<T> {
    tx: mpsc::SyncSender<Result<T, OsError>>,
    handshake: Arc<AtomicU8>,
}

impl<T> StartupSignal<T> {
    /// 报告就绪
    ///
    /// 返回 `false` 表示启动方已超时放弃，线程体必须释放已获取的资源并退出
    #[must_use]
    pub fn ready(self, info: T) -> bool {
        self.report() && self.tx.send(Ok(info)).is_ok()
    }

    pub fn fail(self, error: OsError) {
        if self.report() {
            let _ = self.tx.send(Err(error));
        }
    }

    fn report(&self) -> bool {
        self.handshake
            .compare_exchange(
                HANDSHAKE_WAITING,
                HANDSHAKE_REPORTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// 启动方放弃等待，线程体已经报告时返回 `false`
fn abandon(handshake: &AtomicU8) -> bool {
    handshake
        .compare_exchange(
            HANDSHAKE_WAITING,
            HANDSHAKE_ABANDONED,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
}

/// 线程退出时清除存活标记，panic 时同样生效
struct ExitGuard {
    alive: Arc<AtomicBool>,
    exited_tx: mpsc::Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        let _ = self.exited_tx.send(());
    }
}

/// 正在运行的投递线程
pub struct DeliveryThread {
    name: String,
    join: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    exited_rx: mpsc::Receiver<()>,
}

impl DeliveryThread {
    /// 启动线程并等待其报告就绪
    ///
    /// # Arguments
    ///
    /// * `name` - 线程名，出现在日志和泄漏警告中
    /// * `startup_timeout` - 等待就绪的最长时间
    /// * `body` - 线程体，必须恰好调用一次 `ready` 或 `fail`；`ready` 返回
    ///   `false` 时启动已超时，线程体自行清理后退出
    ///
    /// # Errors
    ///
    /// 线程体报告的错误，或 [`OsError::StartupTimeout`] / [`OsError::StartupAborted`]
    pub fn spawn<T, F>(name: &str, startup_timeout: Duration, body: F) -> Result<(Self, T), OsError>
    where
        T: Send + 'static,
        F: FnOnce(StartupSignal<T>) + Send + 'static,
    {
        let alive = Arc::new(AtomicBool::new(true));
        let (exited_tx, exited_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let handshake = Arc::new(AtomicU8::new(HANDSHAKE_WAITING));
        let signal = StartupSignal {
            tx: ready_tx,
            handshake: Arc::clone(&handshake),
        };

        let guard_alive = Arc::clone(&alive);
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = ExitGuard {
                    alive: guard_alive,
                    exited_tx,
                };
                body(signal);
            })
            .map_err(|e| OsError::ThreadSpawnFailed(e.to_string()))?;

        let thread = Self {
            name: name.to_string(),
            join: Some(join),
            alive,
            exited_rx,
        };

        let outcome = match ready_rx.recv_timeout(startup_timeout) {
            // 线程体恰好在超时的同时报告，结果已经在路上
            Err(RecvTimeoutError::Timeout) if !abandon(&handshake) => ready_rx
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
            other => other,
        };

        match outcome {
            Ok(Ok(info)) => {
                tracing::debug!(thread = %thread.name, "Delivery thread ready");
                Ok((thread, info))
            }
            Ok(Err(e)) => {
                if let Err(leak) = thread.join_timeout(startup_timeout) {
                    tracing::warn!(error = %leak, "Failed delivery thread did not exit");
                }
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    thread = %thread.name,
                    timeout_ms = startup_timeout.as_millis() as u64,
                    "Delivery thread startup timed out, abandoning it"
                );
                Err(OsError::StartupTimeout(startup_timeout.as_millis() as u64))
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Err(leak) = thread.join_timeout(startup_timeout) {
                    tracing::warn!(error = %leak, "Aborted delivery thread did not exit");
                }
                Err(OsError::StartupAborted)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// 共享的存活标记，放入 [`BackendHandle`](super::BackendHandle)
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// 等待线程退出，最多 `timeout`
    ///
    /// 超时后放弃线程并返回 [`ResourceLeakWarning`]，不会阻塞更久
    pub fn join_timeout(mut self, timeout: Duration) -> Result<(), ResourceLeakWarning> {
        match self.exited_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(join) = self.join.take() {
                    if join.join().is_err() {
                        tracing::warn!(thread = %self.name, "Delivery thread panicked");
                    }
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(ResourceLeakWarning {
                thread: self.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl std::fmt::Debug for DeliveryThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryThread")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}
