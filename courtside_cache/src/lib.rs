//! Optional redis backed read-through cache for courts and their schedules.
//!
//! Every operation degrades to a no-op when the cache is disabled or redis is
//! unreachable, a cache problem never fails a request.
#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate serde_derive;

use std::fmt::{Debug, Display};

use deadpool_redis::cmd;
use deadpool_redis::Connection;
use deadpool_redis::Pool as RedisPool;
use redis::{ErrorKind, RedisError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use tracing_futures::Instrument;

mod stats;

pub use stats::{LoadedStats, Stats};

/// default time to live of a cached object: 12 hours
pub const DEFAULT_TTL: usize = 3600 * 12;

lazy_static! {
    static ref CACHE: RwLock<Cache> = RwLock::new(Cache::default());
    static ref SETTINGS: RwLock<Option<Settings>> = RwLock::new(None);
}

#[derive(Debug, Clone)]
struct Settings {
    url: String,
    ttl: usize,
}

pub struct Cache {
    pool: Option<RedisPool>,
    ttl: usize,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct CacheStatus {
    /// is true when the cache has been configured and is not disabled
    pub enabled: bool,
    /// is true when the cache is enabled and a connection can be retrieved
    pub healthy: bool,
}

/// Types that can be stored in the cache, identified by a prefixed key
pub trait CacheIdentifier {
    fn cache_key<T: Display>(id: T) -> String;
}

impl Cache {
    fn default() -> Self {
        Cache {
            pool: None,
            ttl: DEFAULT_TTL,
        }
    }

    /// Connect the cache to redis, `ttl` is the lifetime of stored objects in seconds
    pub async fn init(url: String, ttl: usize) -> Result<(), RedisError> {
        let cfg = deadpool_redis::Config {
            url: Some(url.clone()),
            ..Default::default()
        };

        let pool = cfg.create_pool()?;

        *CACHE.write().await = Cache {
            pool: Some(pool),
            ttl,
        };

        // remembered so the cache can be re-enabled after being disabled
        *SETTINGS.write().await = Some(Settings { url, ttl });

        Ok(())
    }

    /// returns true if the cache is initialized and ready for usage
    pub async fn is_enabled() -> bool {
        CACHE.read().await.pool.is_some()
    }

    async fn connection() -> Option<Connection> {
        let cache = CACHE.read().await;

        match cache.pool.as_ref()?.get().await {
            Ok(connection) => Some(connection),
            Err(err) => {
                error!("unable to get cache connection: {}", err);
                None
            }
        }
    }

    /// Fetch an object from the cache, `None` on a miss or when the cache is unavailable
    pub async fn get<T: DeserializeOwned + CacheIdentifier, I: Display + Debug>(
        id: I,
    ) -> Option<T> {
        let cache_key: String = T::cache_key(id);

        async move {
            let mut conn = Cache::connection().await?;

            let res: Result<Option<Vec<u8>>, RedisError> =
                cmd("GET").arg(&cache_key).query_async(&mut conn).await;

            match res {
                Ok(Some(res)) => match serde_json::from_slice::<T>(&res) {
                    Ok(hit) => {
                        Stats::cache_hit();
                        debug!("found {} in cache", &cache_key);
                        Some(hit)
                    }
                    Err(err) => {
                        // stale layout after a deploy, treat it as a miss
                        warn!("unable to decode {} from cache: {}", &cache_key, err);
                        Stats::cache_miss();
                        None
                    }
                },
                Ok(None) => {
                    Stats::cache_miss();
                    None
                }
                Err(err) => {
                    error!("unable to fetch {} from cache: {}", &cache_key, err);
                    None
                }
            }
        }
        .instrument(tracing::debug_span!("cache::get"))
        .await
    }

    /// Store an object for the configured ttl
    pub async fn set<T: Serialize + CacheIdentifier, I: Display + Debug>(object: &T, id: I) {
        let cache_key: String = T::cache_key(id);

        let payload = match serde_json::to_vec(object) {
            Ok(res) => res,
            Err(err) => {
                error!("unable to serialize {} for cache: {}", cache_key, err);
                return;
            }
        };

        async move {
            let mut conn = match Cache::connection().await {
                Some(conn) => conn,
                None => return,
            };

            let ttl = CACHE.read().await.ttl;

            let res = cmd("SETEX")
                .arg(&cache_key)
                .arg(ttl)
                .arg(payload)
                .execute_async(&mut conn)
                .await;

            if let Err(err) = res {
                error!("unable to store {} in cache: {}", cache_key, err);
            }
        }
        .instrument(tracing::debug_span!("cache::set"))
        .await
    }

    /// Remove the object of type `T` identified by `id`
    pub async fn forget<T: CacheIdentifier, I: Display + Debug>(id: I) {
        let cache_key: String = T::cache_key(id);

        async move {
            let mut conn = match Cache::connection().await {
                Some(conn) => conn,
                None => return,
            };

            let res = cmd("DEL").arg(&cache_key).execute_async(&mut conn).await;

            if let Err(err) = res {
                error!("unable to delete {} from cache: {}", cache_key, err);
            }
        }
        .instrument(tracing::debug_span!("cache::forget"))
        .await
    }

    pub async fn disable_cache() {
        CACHE.write().await.pool = None;
    }

    /// Reconnect with the settings passed to `init`, does nothing if the cache was never configured
    ///
    /// Invalidations sent while the cache was off never reached redis, so the
    /// database is flushed before the cache is used again. When that fails the
    /// cache stays disabled.
    pub async fn enable_cache() -> Result<(), RedisError> {
        let settings = SETTINGS.read().await.clone();

        let settings = match settings {
            Some(settings) => settings,
            None => {
                warn!("the cache can't be enabled, no redis url was configured");
                return Ok(());
            }
        };

        Cache::init(settings.url, settings.ttl).await?;

        if let Err(err) = Cache::flush().await {
            error!("unable to flush the cache, keeping it disabled: {}", err);
            Cache::disable_cache().await;
            return Err(err);
        }

        Ok(())
    }

    /// Drop every cached object
    pub async fn flush() -> Result<(), RedisError> {
        let mut conn = Cache::connection().await.ok_or_else(|| {
            RedisError::from((ErrorKind::IoError, "no cache connection available"))
        })?;

        cmd("FLUSHDB")
            .execute_async(&mut conn)
            .instrument(tracing::debug_span!("cache::flush"))
            .await
    }

    pub async fn status() -> CacheStatus {
        let enabled = Cache::is_enabled().await;
        let healthy = enabled && Cache::connection().await.is_some();

        CacheStatus { enabled, healthy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[derive(Serialize, Deserialize, Debug)]
    struct Thing {
        id: i64,
    }

    impl CacheIdentifier for Thing {
        fn cache_key<T: Display>(id: T) -> String {
            format!("thing.{}", id)
        }
    }

    #[test]
    fn unconfigured_cache_is_a_noop() {
        block_on(async {
            assert!(!Cache::is_enabled().await);

            Cache::set(&Thing { id: 1 }, 1).await;
            assert!(Cache::get::<Thing, _>(1).await.is_none());
            Cache::forget::<Thing, _>(1).await;

            assert!(Cache::enable_cache().await.is_ok());
            assert!(Cache::flush().await.is_err());
            assert_eq!(
                Cache::status().await,
                CacheStatus {
                    enabled: false,
                    healthy: false
                }
            );
        });
    }

    #[test]
    fn cache_keys_are_prefixed() {
        assert_eq!(Thing::cache_key(42), "thing.42");
    }
}
