use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll};

use actix_service::{Service, Transform};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::web::Data;
use actix_web::Error;
use futures::future::{ok, Ready};
use futures::Future;

/// Request counters since the server started
#[derive(Debug, Default)]
pub struct Stats {
    requests: AtomicU32,
    errors: AtomicU32,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RequestStats {
    pub requests: u32,
    /// responses with a 5xx status
    pub errors: u32,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    pub fn load(&self) -> RequestStats {
        RequestStats {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Counts every request and every server error, needs `Data<Stats>` in the app data
pub struct Middleware;

impl Middleware {
    pub fn default() -> Middleware {
        Middleware
    }
}

impl<S, B> Transform<S> for Middleware
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestCountMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestCountMiddleware { service })
    }
}

pub struct RequestCountMiddleware<S> {
    service: S,
}

impl<S, B> Service for RequestCountMiddleware<S>
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: ServiceRequest) -> Self::Future {
        let stats = request.app_data::<Data<Stats>>().cloned();

        if let Some(stats) = &stats {
            stats.requests.fetch_add(1, Ordering::Relaxed);
        } else {
            warn!("request statistics are not configured");
        }

        let fut = self.service.call(request);

        Box::pin(async move {
            let res = fut.await?;

            if let Some(stats) = stats {
                if res.response().status().is_server_error() {
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                }
            }

            Ok(res)
        })
    }
}
