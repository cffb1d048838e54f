//! 流式翻译任务调度器
//!
//! 维护FIFO任务队列和有界的在途任务集：每当一个任务终结（成功、失败
//! 或取消）就从队首补位。任务状态机为 queued → running →
//! {completed | failed | cancelled}，不重试也不退避，首次终结即为终态。
//!
//! 所有任务future都持有DOM侧的Rc句柄，因此整个池在单线程上协作调度；
//! 任务间的完成顺序由网络延迟决定，补丁引擎对任意交错都安全。

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::cancel::CancelToken;
use crate::config::{ApiSettings, TranslationMode};
use crate::core::patcher::PatchEngine;
use crate::error::log_task_error;
use crate::messages::{ProgressEvent, ProgressSink};
use crate::net::chat::{ChatClient, ChatRequest};
use crate::pipeline::collector::SharedUnit;
use crate::storage::cache::{CacheManager, Partitioned};

/// 进度快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub cached_hits: usize,
}

impl Progress {
    /// 完成百分比，恒在[0,100]内；空任务集视为完成
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed * 100 / self.total).min(100)) as u8
    }
}

#[derive(Default)]
struct ProgressCounters {
    total: AtomicUsize,
    completed: AtomicUsize,
    cached_hits: AtomicUsize,
}

impl ProgressCounters {
    fn begin(&self, total: usize, cached_hits: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(cached_hits, Ordering::SeqCst);
        self.cached_hits.store(cached_hits, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.begin(0, 0);
    }

    fn snapshot(&self) -> Progress {
        Progress {
            total: self.total.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            cached_hits: self.cached_hits.load(Ordering::SeqCst),
        }
    }
}

/// 调度器的控制句柄
///
/// 可跨线程克隆与调用：stop()来自UI侧，而任务本体跑在文档线程上。
#[derive(Clone, Default)]
pub struct SchedulerHandle {
    stopped: Arc<AtomicBool>,
    running: Arc<AtomicUsize>,
    counters: Arc<ProgressCounters>,
    cancellations: Arc<Mutex<HashMap<u64, CancelToken>>>,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 停止本轮翻译：设置停止标志、逐个触发在途请求的取消令牌、
    /// 清空队列登记并重置进度。幂等。
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);

        let mut cancellations = self.cancellations.lock().unwrap();
        for (_, token) in cancellations.drain() {
            token.cancel();
        }

        self.counters.reset();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// 当前在途任务数
    pub fn running_tasks(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> Progress {
        self.counters.snapshot()
    }

    fn begin_run(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        self.cancellations.lock().unwrap().clear();
        self.counters.reset();
    }

    fn register_cancel(&self, id: u64, token: CancelToken) {
        self.cancellations.lock().unwrap().insert(id, token);
    }

    fn remove_cancel(&self, id: u64) {
        self.cancellations.lock().unwrap().remove(&id);
    }
}

/// 一个调度单位：未命中缓存的段落进入队列时创建，请求终结时销毁
struct Task {
    id: u64,
    unit: SharedUnit,
    target_lang: String,
}

/// 有界并发的流式翻译调度器
pub struct TaskScheduler {
    handle: SchedulerHandle,
    client: Rc<dyn ChatClient>,
    cache: CacheManager,
    patcher: Rc<PatchEngine>,
    sink: Rc<dyn ProgressSink>,
    page_url: String,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(
        client: Rc<dyn ChatClient>,
        cache: CacheManager,
        patcher: Rc<PatchEngine>,
        sink: Rc<dyn ProgressSink>,
        page_url: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            handle: SchedulerHandle::new(),
            client,
            cache,
            patcher,
            sink,
            page_url: page_url.into(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }

    /// 执行一轮整页翻译
    ///
    /// 先还原上一轮的改动并重置状态，再分拣缓存：命中的立即写回，
    /// 未命中的按FIFO入队流式翻译。返回true当且仅当全部段落终结且
    /// 期间未被停止。
    pub async fn run(
        &self,
        units: Vec<SharedUnit>,
        mode: TranslationMode,
        target_lang: &str,
        settings: &ApiSettings,
    ) -> bool {
        self.patcher.restore_all();
        self.handle.begin_run();

        let Partitioned { hits, misses } = self
            .cache
            .partition(units, &self.page_url, target_lang, mode)
            .await;
        let total = hits.len() + misses.len();
        self.handle.counters.begin(total, hits.len());

        for unit in &hits {
            if let Err(error) = self.patcher.apply(unit, mode) {
                log_task_error("应用缓存译文", &error);
            }
        }
        if !hits.is_empty() {
            emit_progress(&self.handle, self.sink.as_ref());
        }

        if misses.is_empty() {
            tracing::info!("翻译任务全部完成 ({}/{})", total, total);
            self.sink.emit(ProgressEvent::Progress {
                completed: total,
                total,
                percent: 100,
            });
            self.sink.emit(ProgressEvent::TranslationComplete);
            return true;
        }

        let mut queue: VecDeque<Task> = misses
            .into_iter()
            .enumerate()
            .map(|(index, unit)| Task {
                id: index as u64,
                unit,
                target_lang: target_lang.to_string(),
            })
            .collect();

        let mut in_flight: FuturesUnordered<LocalBoxFuture<'static, ()>> =
            FuturesUnordered::new();
        while in_flight.len() < self.max_concurrent {
            match queue.pop_front() {
                Some(task) => in_flight.push(self.spawn_task(task, mode, settings)),
                None => break,
            }
        }

        // 每个任务终结后从队首补位；停止后只排空在途任务，不再出队
        while in_flight.next().await.is_some() {
            if self.handle.is_stopped() {
                continue;
            }
            if let Some(task) = queue.pop_front() {
                in_flight.push(self.spawn_task(task, mode, settings));
            }
        }

        if self.handle.is_stopped() {
            tracing::info!("翻译任务被用户中止");
            self.sink.emit(ProgressEvent::TranslationStopped);
            return false;
        }

        let progress = self.handle.progress();
        self.sink.emit(ProgressEvent::Progress {
            completed: progress.completed,
            total: progress.total,
            percent: progress.percent(),
        });
        self.sink.emit(ProgressEvent::TranslationComplete);
        tracing::info!(
            "翻译任务全部完成 ({}/{}) [缓存命中: {}]",
            progress.completed,
            progress.total,
            progress.cached_hits
        );
        progress.completed == progress.total
    }

    /// 把任务打包成自持的future：克隆所需的全部Rc句柄，使其生命期
    /// 不受调度器借用约束
    fn spawn_task(
        &self,
        task: Task,
        mode: TranslationMode,
        settings: &ApiSettings,
    ) -> LocalBoxFuture<'static, ()> {
        let request = ChatRequest {
            endpoint: settings.api_endpoint.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            system_prompt: settings.prompts.render(mode, &task.target_lang),
            user_text: task.unit.borrow().original_text.clone(),
        };
        let client = Rc::clone(&self.client);
        let cache = self.cache.clone();
        let patcher = Rc::clone(&self.patcher);
        let handle = self.handle.clone();
        let sink = Rc::clone(&self.sink);
        let page_url = self.page_url.clone();

        Box::pin(async move {
            run_task(task, mode, request, client, cache, patcher, handle, sink, page_url).await;
        })
    }
}

/// 单个任务的完整生命周期：流式读取、增量写回、终态收尾
#[allow(clippy::too_many_arguments)]
async fn run_task(
    task: Task,
    mode: TranslationMode,
    request: ChatRequest,
    client: Rc<dyn ChatClient>,
    cache: CacheManager,
    patcher: Rc<PatchEngine>,
    handle: SchedulerHandle,
    sink: Rc<dyn ProgressSink>,
    page_url: String,
) {
    if handle.is_stopped() {
        return;
    }

    handle.running.fetch_add(1, Ordering::SeqCst);
    let cancel = CancelToken::new();
    handle.register_cancel(task.id, cancel.clone());
    if handle.is_stopped() {
        // stop()可能在登记令牌之前从别的线程赶到，自行补一刀取消
        cancel.cancel();
    }

    let mut stream = client.stream_chat(request, cancel.clone());
    let mut accumulated = String::new();
    let mut failed = false;

    while let Some(item) = stream.next_delta().await {
        // 每个增量应用前都检查停止标志
        if handle.is_stopped() {
            break;
        }
        match item {
            Ok(delta) => {
                accumulated.push_str(&delta);
                task.unit.borrow_mut().translated_text = accumulated.clone();
                if let Err(error) = patcher.apply(&task.unit, mode) {
                    log_task_error("应用译文", &error);
                }
            }
            Err(error) => {
                // 失败只影响本段：记日志、不重试、照常推进进度
                log_task_error("流式翻译", &error);
                if !error.is_cancellation() {
                    failed = true;
                }
                break;
            }
        }
    }

    // 只有完整走完且未取消未失败的流才写缓存，半截译文绝不落盘
    let final_text = accumulated.trim().to_string();
    if !handle.is_stopped() && !failed && !final_text.is_empty() {
        let source_text = task.unit.borrow().original_text.clone();
        if let Err(error) = cache
            .write_entry(&page_url, &source_text, &final_text, &task.target_lang, mode)
            .await
        {
            log_task_error("写入翻译缓存", &error);
        }
    }

    handle.remove_cancel(task.id);
    handle.running.fetch_sub(1, Ordering::SeqCst);

    if !handle.is_stopped() {
        handle.counters.completed.fetch_add(1, Ordering::SeqCst);
        emit_progress(&handle, sink.as_ref());
    }
}

fn emit_progress(handle: &SchedulerHandle, sink: &dyn ProgressSink) {
    let progress = handle.progress();
    sink.emit(ProgressEvent::Progress {
        completed: progress.completed,
        total: progress.total,
        percent: progress.percent(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_clamped() {
        let progress = Progress {
            total: 3,
            completed: 1,
            cached_hits: 0,
        };
        assert_eq!(progress.percent(), 33);

        let done = Progress {
            total: 3,
            completed: 3,
            cached_hits: 1,
        };
        assert_eq!(done.percent(), 100);

        let empty = Progress {
            total: 0,
            completed: 0,
            cached_hits: 0,
        };
        assert_eq!(empty.percent(), 100);
    }

    #[test]
    fn test_stop_is_idempotent_and_resets_progress() {
        let handle = SchedulerHandle::new();
        handle.counters.begin(5, 1);
        handle.register_cancel(1, CancelToken::new());

        handle.stop();
        handle.stop();

        assert!(handle.is_stopped());
        assert_eq!(handle.progress().total, 0);
        assert_eq!(handle.progress().completed, 0);
        assert!(handle.cancellations.lock().unwrap().is_empty());
    }
}
