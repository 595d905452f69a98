use actix_identity::IdentityPolicy;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::AUTHORIZATION;
use actix_web::Error;
use futures::future::{ok, Ready};

/// Reads the identity from an `Authorization: Bearer <token>` header
///
/// The identity is the raw token, it's resolved to a user by `auth::get_user`.
/// Tokens are handed out in response bodies, so nothing is ever written back.
#[derive(Debug, Default, Clone, Copy)]
pub struct BearerTokenPolicy;

impl BearerTokenPolicy {
    fn token(request: &ServiceRequest) -> Option<String> {
        let header = request.headers().get(AUTHORIZATION)?.to_str().ok()?;

        let mut parts = header.splitn(2, ' ');
        let scheme = parts.next()?;
        let token = parts.next()?.trim();

        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
            return None;
        }

        Some(token.to_string())
    }
}

impl IdentityPolicy for BearerTokenPolicy {
    type Future = Ready<Result<Option<String>, Error>>;
    type ResponseFuture = Ready<Result<(), Error>>;

    fn from_request(&self, request: &mut ServiceRequest) -> Self::Future {
        ok(BearerTokenPolicy::token(request))
    }

    fn to_response<B>(
        &self,
        _identity: Option<String>,
        _changed: bool,
        _response: &mut ServiceResponse<B>,
    ) -> Self::ResponseFuture {
        ok(())
    }
}
