//! 配额与用量统计模块。
//!
//! 每个 virtual key 维护一个一小时的计数窗口，窗口到期后在下一次请求时整体重置；
//! 同时聚合进程级别的转发统计，供 /metrics 读取快照。

mod tracker;
mod types;

pub use tracker::QuotaTracker;
pub use types::UsageStats;
