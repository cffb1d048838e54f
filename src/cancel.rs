//! 协作式取消令牌
//!
//! 每个流式请求持有一个可克隆的令牌，调度器的stop()从控制侧触发取消，
//! 消费循环在每个挂起点检查令牌状态。取消是一等公民参数而非旁路标志。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// 可克隆的取消令牌
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// 创建未取消的令牌
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// 触发取消，幂等
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// 是否已取消
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// 挂起直到取消发生
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            // 注册等待者之后再检查一次，补上通知与注册之间的窗口
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
