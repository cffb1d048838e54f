//! 核心翻译引擎模块
//!
//! - `scheduler` - 有界并发的流式翻译任务调度器
//! - `patcher` - DOM补丁/恢复引擎（对照与替换两种模式）
//! - `service` - 按文档构造的翻译服务门面

pub mod patcher;
pub mod scheduler;
pub mod service;

pub use patcher::PatchEngine;
pub use scheduler::{Progress, SchedulerHandle, TaskScheduler};
pub use service::PageTranslator;
