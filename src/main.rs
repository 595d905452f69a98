//! Court booking and walk-in queue management api
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_derive;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;

use anyhow::{anyhow, Error};
use dotenv::dotenv;

#[macro_use]
mod macros;

mod admin;
mod auth;
mod availability;
mod bookings;
mod cache;
mod config;
mod courts;
mod db;
mod errors;
mod queue;
mod server;
mod stats;
mod timefmt;
mod users;
mod validator;
mod websocket;

use crate::config::Config;

#[actix_web::main]
async fn main() -> anyhow::Result<(), Error> {
    dotenv().ok();
    Config::init();

    let (tracer, _uninstall) = opentelemetry_jaeger::new_pipeline()
        .with_service_name("courtside")
        .with_agent_endpoint(Config::opentelemetry_endpoint())
        .install()
        .map_err(|err| anyhow!("unable to connect to the opentelemetry agent: {}", err))?;

    let opentelemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(opentelemetry)
        .try_init()?;

    // errors are only reported when a dsn is configured
    let _sentry = Config::sentry_dsn().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    cache::init().await;

    let pool =
        db::build_connection_pool(Config::database_url(), Config::database_max_connections())
            .await?;
    db::migrate(&pool).await?;

    debug!("launching the actix webserver");
    server::launch(pool).await?;

    Ok(())
}
