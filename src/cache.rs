pub use courtside_cache::{Cache, CacheIdentifier, Stats};

use crate::config::Config;

/// Connect the cache when a redis url is configured, the api works fine without it
pub async fn init() {
    let url = match Config::redis_url() {
        Some(url) => url,
        None => {
            info!("REDIS_URL is not set, running without a cache");
            return;
        }
    };

    match Cache::init(url.to_string(), Config::cache_ttl()).await {
        Ok(()) => info!("redis cache initialized"),
        Err(err) => error!("unable to initialize the redis cache: {}", err),
    }
}
