use actix_identity::Identity;
use actix_web::web::Data;
use actix_web::{get, post, web};

use crate::auth;
use crate::bookings::CourtBooking;
use crate::cache::{self, Cache};
use crate::courts::Court;
use crate::errors::ServiceError;
use crate::queue::{QueueMatch, QueueSession};
use crate::server::{Response, State};
use crate::stats::{RequestStats, Stats};
use crate::users::User;
use crate::websocket::server::ConnectionCount;

#[derive(Debug, Serialize)]
pub struct ServerStats {
    #[serde(flatten)]
    pub requests: RequestStats,
    pub users: i64,
    pub courts: i64,
    pub bookings: i64,
    pub open_queue_sessions: i64,
    pub active_matches: i64,
    pub websocket_connections: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub db_connections: u32,
    pub idle_db_connections: usize,
}

#[get("/admin/stats")]
async fn server_stats(stats: Data<Stats>, id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    auth::verify_superadmin(&user)?;

    let cache = cache::Stats::load();

    http_ok_json!(ServerStats {
        requests: stats.load(),
        users: User::count(&state.db).await?,
        courts: Court::count(&state.db).await?,
        bookings: CourtBooking::count(&state.db).await?,
        open_queue_sessions: QueueSession::count_open(&state.db).await?,
        active_matches: QueueMatch::count_active(&state.db).await?,
        websocket_connections: state.notifier.send(ConnectionCount).await?,
        cache_hits: cache.cache_hits,
        cache_misses: cache.cache_misses,
        db_connections: state.db.size(),
        idle_db_connections: state.db.num_idle(),
    });
}

#[get("/admin/cache")]
async fn cache_status(id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    auth::verify_superadmin(&user)?;

    http_ok_json!(Cache::status().await);
}

#[post("/admin/cache/disable")]
async fn disable_cache(id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    auth::verify_superadmin(&user)?;

    Cache::disable_cache().await;
    warn!("user {} disabled the cache", user.id);

    http_ok_json!(Cache::status().await);
}

#[post("/admin/cache/enable")]
async fn enable_cache(id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    auth::verify_superadmin(&user)?;

    Cache::enable_cache().await.map_err(ServiceError::from)?;
    info!("user {} enabled the cache", user.id);

    http_ok_json!(Cache::status().await);
}

pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(server_stats);
    cfg.service(cache_status);
    cfg.service(disable_cache);
    cfg.service(enable_cache);
}
