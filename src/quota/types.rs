use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// 配额窗口长度。
pub const QUOTA_WINDOW: Duration = Duration::from_secs(60 * 60);

/// 单个 virtual key 的计数窗口。
#[derive(Debug, Clone)]
pub struct QuotaWindow {
    /// 当前窗口内已放行的请求数。
    pub count: u64,
    /// 窗口起点：窗口过期后的第一个请求时刻，而非整点。
    pub window_start: Instant,
    pub limit: u64,
}

impl QuotaWindow {
    pub fn new(now: Instant, limit: u64) -> Self {
        Self {
            count: 1,
            window_start: now,
            limit,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= QUOTA_WINDOW
    }

    pub fn reset(&mut self, now: Instant) {
        self.count = 1;
        self.window_start = now;
    }
}

/// 一次配额检查的结果。拒绝是正常返回值，不是错误。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { reason: String },
}

impl Admission {
    #[cfg(test)]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Rejected { reason } => Some(reason),
        }
    }
}

/// 进程级别的转发统计（/metrics 输出）。
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub requests_by_provider: BTreeMap<String, u64>,
    pub total_duration_ms: u64,
    pub average_response_ms: f64,
    pub last_updated: DateTime<Utc>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            requests_by_provider: BTreeMap::new(),
            total_duration_ms: 0,
            average_response_ms: 0.0,
            last_updated: Utc::now(),
        }
    }
}

impl Default for UsageStats {
    fn default() -> Self {
        Self::new()
    }
}
