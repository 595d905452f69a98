use actix::{Actor, Addr};
use actix_identity::IdentityService;
use actix_web::{get, middleware, web, App, HttpRequest, HttpResponse, HttpServer};
use actix_web_opentelemetry::RequestTracing;

use crate::admin;
use crate::auth;
use crate::availability;
use crate::bookings;
use crate::config::Config;
use crate::courts;
use crate::db;
use crate::errors::{self, ServiceError};
use crate::queue;
use crate::stats;
use crate::users;
use crate::websocket;
use crate::websocket::server::QueueNotifier;

pub type Response = Result<HttpResponse, ServiceError>;

/// Access log line with the path only, the query string can carry a bearer token
const ACCESS_LOG_FORMAT: &str = r#"%a "%U" %s %b "%{User-Agent}i" %T"#;

/// Shared by every request handler
pub struct State {
    pub db: db::Pool,
    pub notifier: Addr<QueueNotifier>,
}

#[get("/health")]
async fn health(_: HttpRequest) -> &'static str {
    "ok"
}

pub async fn launch(db_pool: db::Pool) -> std::io::Result<()> {
    let state = web::Data::new(State {
        db: db_pool,
        notifier: QueueNotifier::default().start(),
    });
    let stats = web::Data::new(stats::Stats::new());

    let address = format!("{}:{}", Config::api_host(), Config::api_port());
    info!("listening on {}", address);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(stats.clone())
            .wrap(stats::Middleware::default())
            .wrap(IdentityService::new(auth::BearerTokenPolicy))
            .wrap(sentry_actix::Sentry::new())
            .wrap(RequestTracing::new())
            .wrap(middleware::DefaultHeaders::new().header("X-Version", env!("CARGO_PKG_VERSION")))
            .wrap(middleware::Compress::default())
            .wrap(middleware::Logger::new(ACCESS_LOG_FORMAT))
            .app_data(web::QueryConfig::default().error_handler(errors::query_error_handler))
            .app_data(web::PayloadConfig::default().limit(262_144))
            .service(
                web::scope("/api")
                    .configure(auth::routes::init_routes)
                    .configure(users::routes::register)
                    .configure(courts::routes::register)
                    .configure(availability::routes::register)
                    .configure(bookings::routes::register)
                    .configure(queue::routes::register)
                    .configure(websocket::routes::register)
                    .configure(admin::routes::register)
                    .service(health),
            )
    })
    .bind(address)?
    .run()
    .await
}
