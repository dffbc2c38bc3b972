use crate::quota::types::{Admission, QuotaWindow, UsageStats};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::RwLock;

/// 配额与统计的唯一持有者：所有写入经由 admit/record，读取经由 snapshot。
///
/// 窗口表与统计共用一把读写锁；锁只在内存操作期间持有，绝不跨越上游网络调用。
#[derive(Debug)]
pub struct QuotaTracker {
    enabled: bool,
    limit: u64,
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    windows: HashMap<String, QuotaWindow>,
    stats: UsageStats,
}

impl QuotaTracker {
    pub fn new(enabled: bool, limit: u64) -> Self {
        Self {
            enabled,
            limit,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// 检查并占用一个配额名额（检查与计数在同一临界区内完成）。
    pub async fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now()).await
    }

    async fn admit_at(&self, key: &str, now: Instant) -> Admission {
        // 关闭配额时不创建任何窗口，避免 key 表无界增长。
        if !self.enabled {
            return Admission::Allowed;
        }

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        match inner.windows.get_mut(key) {
            None => {
                inner
                    .windows
                    .insert(key.to_string(), QuotaWindow::new(now, self.limit));
                Admission::Allowed
            }
            Some(window) if window.is_expired(now) => {
                window.reset(now);
                Admission::Allowed
            }
            Some(window) if window.count < window.limit => {
                window.count += 1;
                Admission::Allowed
            }
            // 拒绝时不计数。
            Some(window) => Admission::Rejected {
                reason: format!(
                    "quota exceeded: {} requests per hour limit reached",
                    window.limit
                ),
            },
        }
    }

    /// 记录一次已完成的转发（包括上游返回 4xx/5xx 的情况）。
    pub async fn record(&self, provider: &str, duration_ms: u64) {
        let mut guard = self.inner.write().await;
        let stats = &mut guard.stats;

        stats.total_requests += 1;
        *stats
            .requests_by_provider
            .entry(provider.to_string())
            .or_insert(0) += 1;
        stats.total_duration_ms = stats.total_duration_ms.saturating_add(duration_ms);
        stats.average_response_ms = stats.total_duration_ms as f64 / stats.total_requests as f64;
        stats.last_updated = Utc::now();
    }

    /// 返回统计的深拷贝。
    pub async fn snapshot(&self) -> UsageStats {
        self.inner.read().await.stats.clone()
    }

    #[cfg(test)]
    async fn window(&self, key: &str) -> Option<QuotaWindow> {
        self.inner.read().await.windows.get(key).cloned()
    }

    #[cfg(test)]
    pub(crate) async fn window_count(&self) -> usize {
        self.inner.read().await.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::types::QUOTA_WINDOW;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects_without_counting() {
        let tracker = QuotaTracker::new(true, 10);

        for i in 0..10 {
            assert!(
                tracker.admit("test_key").await.is_allowed(),
                "request {i} should be allowed"
            );
        }

        let res = tracker.admit("test_key").await;
        assert!(!res.is_allowed());
        assert_eq!(
            res.reason(),
            Some("quota exceeded: 10 requests per hour limit reached")
        );
        assert_eq!(tracker.window("test_key").await.unwrap().count, 10);

        // 连续拒绝也不会推高计数。
        for _ in 0..5 {
            assert!(!tracker.admit("test_key").await.is_allowed());
        }
        assert_eq!(tracker.window("test_key").await.unwrap().count, 10);
    }

    #[tokio::test]
    async fn disabled_tracker_allows_everything_and_keeps_no_state() {
        let tracker = QuotaTracker::new(false, 100);

        for i in 0..200 {
            assert!(
                tracker.admit("test_key").await.is_allowed(),
                "request {i} should be allowed when quota disabled"
            );
        }
        assert_eq!(tracker.window_count().await, 0);
    }

    #[tokio::test]
    async fn expired_window_is_reset_on_next_request() {
        let tracker = QuotaTracker::new(true, 5);
        let start = Instant::now();

        for _ in 0..5 {
            assert!(tracker.admit_at("test_key", start).await.is_allowed());
        }
        assert!(!tracker.admit_at("test_key", start).await.is_allowed());

        // 刚好差一点到期：仍然拒绝。
        let almost = start + QUOTA_WINDOW - Duration::from_millis(1);
        assert!(!tracker.admit_at("test_key", almost).await.is_allowed());

        let later = start + QUOTA_WINDOW + Duration::from_secs(60);
        assert!(tracker.admit_at("test_key", later).await.is_allowed());

        let window = tracker.window("test_key").await.unwrap();
        assert_eq!(window.count, 1);
        assert_eq!(window.window_start, later);
    }

    #[tokio::test]
    async fn window_boundary_is_inclusive() {
        let tracker = QuotaTracker::new(true, 1);
        let start = Instant::now();

        assert!(tracker.admit_at("k", start).await.is_allowed());
        assert!(!tracker.admit_at("k", start).await.is_allowed());
        assert!(
            tracker
                .admit_at("k", start + QUOTA_WINDOW)
                .await
                .is_allowed()
        );
    }

    #[tokio::test]
    async fn keys_have_independent_quotas() {
        let tracker = QuotaTracker::new(true, 5);

        for i in 0..5 {
            assert!(tracker.admit("key1").await.is_allowed(), "key1 request {i}");
        }
        assert!(!tracker.admit("key1").await.is_allowed());

        // key1 耗尽不影响 key2。
        for i in 0..5 {
            assert!(tracker.admit("key2").await.is_allowed(), "key2 request {i}");
        }
        assert_eq!(tracker.window("key2").await.unwrap().count, 5);
        assert!(!tracker.admit("key2").await.is_allowed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_never_exceed_limit() {
        let tracker = Arc::new(QuotaTracker::new(true, 10));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.admit("shared").await.is_allowed() })
            })
            .collect();

        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 10);
        assert_eq!(tracker.window("shared").await.unwrap().count, 10);
    }

    #[tokio::test]
    async fn record_aggregates_by_provider() {
        let tracker = QuotaTracker::new(false, 0);

        tracker.record("openai", 100).await;
        tracker.record("openai", 200).await;
        tracker.record("anthropic", 150).await;

        let stats = tracker.snapshot().await;
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.requests_by_provider["openai"], 2);
        assert_eq!(stats.requests_by_provider["anthropic"], 1);
        assert_eq!(stats.total_duration_ms, 450);
        assert_eq!(stats.average_response_ms, 150.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_are_not_lost() {
        let tracker = Arc::new(QuotaTracker::new(true, 100));
        let m: u64 = 200;

        let handles: Vec<_> = (0..m)
            .map(|i| {
                let tracker = tracker.clone();
                let provider = if i % 2 == 0 { "openai" } else { "anthropic" };
                tokio::spawn(async move { tracker.record(provider, i).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let stats = tracker.snapshot().await;
        let sum: u64 = (0..m).sum();
        assert_eq!(stats.total_requests, m);
        assert_eq!(stats.requests_by_provider.values().sum::<u64>(), m);
        assert_eq!(stats.total_duration_ms, sum);
        assert_eq!(stats.average_response_ms, sum as f64 / m as f64);
    }

    #[tokio::test]
    async fn snapshot_is_detached_from_tracker() {
        let tracker = QuotaTracker::new(true, 5);
        tracker.record("openai", 10).await;

        let mut snap = tracker.snapshot().await;
        snap.total_requests = 999;
        snap.requests_by_provider.insert("bogus".to_string(), 1);
        tracker.record("openai", 10).await;

        let fresh = tracker.snapshot().await;
        assert_eq!(fresh.total_requests, 2);
        assert!(!fresh.requests_by_provider.contains_key("bogus"));
        assert_eq!(snap.requests_by_provider["openai"], 1);
    }

    #[tokio::test]
    async fn five_requests_then_quota_rejection_keeps_stats() {
        let tracker = QuotaTracker::new(true, 5);

        for _ in 0..5 {
            assert!(tracker.admit("key1").await.is_allowed());
            tracker.record("openai", 100).await;
        }

        let stats = tracker.snapshot().await;
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.requests_by_provider["openai"], 5);
        assert_eq!(stats.average_response_ms, 100.0);

        let res = tracker.admit("key1").await;
        assert!(res.reason().unwrap().contains("quota exceeded"));
        assert_eq!(tracker.snapshot().await.total_requests, 5);
    }
}
