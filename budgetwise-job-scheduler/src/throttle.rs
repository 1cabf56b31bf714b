use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

const SHARD_COUNT: usize = 16;

#[derive(Debug)]
struct LimiterEntry {
    count: AtomicU32,
    first_access: AtomicU64, // milliseconds since the throttle was created
}

struct LimiterTable<K> {
    map: HashMap<K, LimiterEntry>,
    last_clear: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckAndRecordResult {
    Allowed,
    /// Contains the updated count (including this blocked attempt) and how long until the
    /// key's window reopens.
    Blocked { count: u32, retry_after: Duration },
}

/// Fixed-window limiter keyed by `K`, split across shards so unrelated keys rarely contend
/// for the same lock.
pub struct KeyedThrottle<K> {
    shards: [RwLock<LimiterTable<K>>; SHARD_COUNT],
    start: Instant,
    max_per_period: u32,
    period: Duration,
    clear_frequency: Duration,
}

impl<K: Eq + Hash> KeyedThrottle<K> {
    pub fn new(max_per_period: u32, period: Duration) -> Self {
        let start = Instant::now();

        Self {
            shards: std::array::from_fn(|_| {
                RwLock::new(LimiterTable {
                    map: HashMap::new(),
                    last_clear: start,
                })
            }),
            start,
            max_per_period,
            period,
            clear_frequency: period.saturating_mul(10),
        }
    }

    pub fn max_per_period(&self) -> u32 {
        self.max_per_period
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Records a hit against `key` if the key is under its limit for the current window.
    pub async fn check_and_record(&self, key: K, now: Instant) -> CheckAndRecordResult {
        let shard = &self.shards[shard_index(&key)];
        let now_millis = self.millis_since_start(now);
        let period_millis = duration_millis(self.period);

        let result = {
            // Read lock must be dropped before the write lock below is taken
            let table = shard.read().await;

            table.map.get(&key).map(|entry| {
                let first_access_millis = entry.first_access.load(Ordering::Relaxed);
                let elapsed = now_millis.wrapping_sub(first_access_millis);

                if elapsed >= period_millis {
                    // Racing resets are acceptable; the window restarts either way
                    entry.first_access.store(now_millis, Ordering::Relaxed);
                    entry.count.store(1, Ordering::Relaxed);
                    CheckAndRecordResult::Allowed
                } else {
                    let prev = entry.count.fetch_add(1, Ordering::Relaxed);

                    if prev < self.max_per_period {
                        CheckAndRecordResult::Allowed
                    } else {
                        CheckAndRecordResult::Blocked {
                            count: prev + 1,
                            retry_after: Duration::from_millis(period_millis - elapsed),
                        }
                    }
                }
            })
        };

        if let Some(result) = result {
            return result;
        }

        let mut table = shard.write().await;

        if now.saturating_duration_since(table.last_clear) >= self.clear_frequency {
            // Only drop keys whose window has closed so active limits survive the cleanup
            table.map.retain(|_, entry| {
                now_millis.wrapping_sub(entry.first_access.load(Ordering::Relaxed)) < period_millis
            });
            table.map.shrink_to_fit();
            table.last_clear = now;
        }

        let mut result = CheckAndRecordResult::Allowed;

        table
            .map
            .entry(key)
            .and_modify(|entry| {
                // Inserted by another task before the write lock was acquired
                let prev = entry.count.fetch_add(1, Ordering::Relaxed);

                if prev >= self.max_per_period {
                    let elapsed =
                        now_millis.wrapping_sub(entry.first_access.load(Ordering::Relaxed));

                    result = CheckAndRecordResult::Blocked {
                        count: prev + 1,
                        retry_after: Duration::from_millis(
                            period_millis.saturating_sub(elapsed),
                        ),
                    };
                }
            })
            .or_insert_with(|| LimiterEntry {
                first_access: AtomicU64::new(now_millis),
                count: AtomicU32::new(1),
            });

        result
    }

    fn millis_since_start(&self, now: Instant) -> u64 {
        duration_millis(now.saturating_duration_since(self.start))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn shard_index<K: Hash>(key: &K) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_limit_within_window() {
        let throttle = KeyedThrottle::new(3, Duration::from_secs(60));
        let key = Uuid::now_v7();
        let now = Instant::now();

        for _ in 0..3 {
            assert_eq!(
                throttle.check_and_record(key, now).await,
                CheckAndRecordResult::Allowed
            );
        }

        let later = now + Duration::from_secs(15);
        assert_eq!(
            throttle.check_and_record(key, later).await,
            CheckAndRecordResult::Blocked {
                count: 4,
                retry_after: Duration::from_secs(45),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reopens_after_period() {
        let throttle = KeyedThrottle::new(1, Duration::from_secs(60));
        let key = Uuid::now_v7();
        let now = Instant::now();

        assert_eq!(
            throttle.check_and_record(key, now).await,
            CheckAndRecordResult::Allowed
        );
        assert!(matches!(
            throttle.check_and_record(key, now).await,
            CheckAndRecordResult::Blocked { .. }
        ));

        let next_window = now + Duration::from_secs(60);
        assert_eq!(
            throttle.check_and_record(key, next_window).await,
            CheckAndRecordResult::Allowed
        );
        assert!(matches!(
            throttle.check_and_record(key, next_window).await,
            CheckAndRecordResult::Blocked { count: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let throttle = KeyedThrottle::new(1, Duration::from_secs(60));
        let now = Instant::now();
        let keys: Vec<Uuid> = (0..64).map(|_| Uuid::now_v7()).collect();

        for key in &keys {
            assert_eq!(
                throttle.check_and_record(*key, now).await,
                CheckAndRecordResult::Allowed
            );
        }

        for key in &keys {
            assert!(matches!(
                throttle.check_and_record(*key, now).await,
                CheckAndRecordResult::Blocked { .. }
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_periods_keep_full_window() {
        // 60 days does not fit in a u32 count of milliseconds
        let period = Duration::from_secs(60 * 24 * 3600);
        let throttle = KeyedThrottle::new(1, period);
        let key = Uuid::now_v7();
        let now = Instant::now();

        assert_eq!(
            throttle.check_and_record(key, now).await,
            CheckAndRecordResult::Allowed
        );

        let later = now + Duration::from_secs(50 * 24 * 3600);
        assert_eq!(
            throttle.check_and_record(key, later).await,
            CheckAndRecordResult::Blocked {
                count: 2,
                retry_after: Duration::from_secs(10 * 24 * 3600),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_keeps_active_windows() {
        let throttle = KeyedThrottle::new(1, Duration::from_secs(1));
        let stale = Uuid::now_v7();
        let now = Instant::now();

        throttle.check_and_record(stale, now).await;

        // Past the clear frequency, a new key triggers cleanup of the stale one
        let later = now + Duration::from_secs(11);
        let active = Uuid::now_v7();
        throttle.check_and_record(active, later).await;

        assert!(matches!(
            throttle.check_and_record(active, later).await,
            CheckAndRecordResult::Blocked { .. }
        ));
        assert_eq!(
            throttle.check_and_record(stale, later).await,
            CheckAndRecordResult::Allowed
        );
    }
}
