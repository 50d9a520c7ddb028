//! Best-effort Redis cache.
//!
//! The cache is never the source of truth. Every operation absorbs
//! connection failures: reads degrade to a miss, writes and invalidations to
//! a no-op, each with a warn log. Requests never block on cache recovery.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Cache TTLs (seconds).
pub const TTL_LOAN: u64 = 300;
pub const TTL_LIST: u64 = 60;
pub const TTL_STATS: u64 = 120;

/// Cloneable handle; `None` inside means Redis was unreachable at startup
/// and the process runs cache-less.
#[derive(Clone)]
pub struct Cache {
    conn: Option<ConnectionManager>,
}

impl Cache {
    /// Connect to Redis. A failed connection yields a disabled cache rather
    /// than an error.
    pub async fn connect(redis_url: &str) -> Self {
        match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => Self { conn: Some(conn) },
                Err(e) => {
                    warn!(error = %e, "cache unavailable, continuing without it");
                    Self { conn: None }
                }
            },
            Err(e) => {
                warn!(error = %e, "invalid redis url, continuing without cache");
                Self { conn: None }
            }
        }
    }

    /// A cache that is always a miss (tests, workers that do not need one).
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "cache entry failed to deserialize");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "cache get failed");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache value failed to serialize");
                return;
            }
        };
        if let Err(e) = conn.set_ex::<_, _, ()>(key, raw, ttl_seconds).await {
            warn!(key, error = %e, "cache set failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if let Err(e) = conn.del::<_, ()>(key).await {
            warn!(key, error = %e, "cache delete failed");
        }
    }

    /// Delete all keys matching a glob pattern (e.g. `loans:*`).
    pub async fn delete_pattern(&self, pattern: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };

        let keys: Vec<String> = match conn.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern, error = %e, "cache pattern scan failed");
                return;
            }
        };
        if keys.is_empty() {
            return;
        }
        if let Err(e) = conn.del::<_, ()>(keys).await {
            warn!(pattern, error = %e, "cache pattern delete failed");
        }
    }

    pub async fn ping(&self) -> bool {
        let Some(mut conn) = self.conn.clone() else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

/// Cache key conventions shared by the service and invalidation paths.
pub mod keys {
    pub fn loan(loan_id: &str) -> String {
        format!("loan:{loan_id}")
    }

    pub fn loan_list(country: Option<&str>, status: Option<&str>, page: i64, size: i64) -> String {
        let mut parts = vec!["loans".to_string()];
        if let Some(cc) = country {
            parts.push(format!("country:{cc}"));
        }
        if let Some(st) = status {
            parts.push(format!("status:{st}"));
        }
        parts.push(format!("page:{page}"));
        parts.push(format!("size:{size}"));
        parts.join(":")
    }

    pub fn loan_stats(country: Option<&str>) -> String {
        match country {
            Some(cc) => format!("stats:loans:{cc}"),
            None => "stats:loans:all".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_helpers_are_stable() {
        assert_eq!(keys::loan("abc"), "loan:abc");
        assert_eq!(keys::loan_stats(None), "stats:loans:all");
        assert_eq!(keys::loan_stats(Some("ES")), "stats:loans:ES");
        assert_eq!(
            keys::loan_list(Some("ES"), Some("PENDING"), 1, 20),
            "loans:country:ES:status:PENDING:page:1:size:20"
        );
        assert_eq!(keys::loan_list(None, None, 2, 50), "loans:page:2:size:50");
    }

    #[tokio::test]
    async fn disabled_cache_degrades_to_misses() {
        let cache = Cache::disabled();
        assert!(!cache.is_enabled());
        cache.set("k", &42u32, 60).await;
        assert_eq!(cache.get::<u32>("k").await, None);
        cache.delete("k").await;
        cache.delete_pattern("loans:*").await;
        assert!(!cache.ping().await);
    }
}
