use actix_identity::Identity;
use actix_web::web::Data;
use actix_web::{get, post, put, web};
use serde_json::json;

use crate::auth;
use crate::auth::models::{
    AuthResponse, Credentials, ForgotPassword, PasswordChange, PasswordReset, Registration,
};
use crate::auth::tokens::{self, AccessToken, PasswordResetToken};
use crate::errors::{FieldErrors, ServiceError};
use crate::server::{Response, State};
use crate::users::User;
use crate::validator::Validator;

#[post("/register")]
async fn register(registration: Validator<Registration>, state: Data<State>) -> Response {
    let registration = registration.validate()?;

    let password = registration.password.clone();
    let hash = web::block(move || User::hash_password(&password)).await?;

    let device_name = registration.device_name.clone();
    let user = User::create(registration.into_new_user(hash), &state.db).await?;
    let token = AccessToken::issue(user.id, &device_name, &state.db).await?;

    info!("user {} registered as {}", user.id, user.role);

    http_created_json!(AuthResponse {
        user,
        token: token.plain_text,
    });
}

#[post("/login")]
async fn login(credentials: Validator<Credentials>, state: Data<State>) -> Response {
    let credentials = credentials.validate()?;

    let user = User::find_by_email(&credentials.email, &state.db)
        .await?
        .ok_or(ServiceError::Unauthorized)?;

    let password = credentials.password;
    let user = web::block(move || {
        user.verify_password(password.as_bytes())?;
        Ok::<User, ServiceError>(user)
    })
    .await?;

    let token = AccessToken::issue(user.id, &credentials.device_name, &state.db).await?;

    http_ok_json!(AuthResponse {
        user,
        token: token.plain_text,
    });
}

#[post("/logout")]
async fn logout(id: Identity, state: Data<State>) -> Response {
    auth::get_user(&id, &state.db).await?;

    if let Some(token) = id.identity() {
        AccessToken::revoke(&token, &state.db).await?;
    }
    id.forget();

    http_ok_json!(json!({ "message": "Successfully signed out" }));
}

#[get("/me")]
async fn me(id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;

    http_ok_json!(user);
}

#[put("/me/password")]
async fn change_password(
    change: Validator<PasswordChange>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let change = change.validate()?;

    let hash = web::block(move || {
        user.verify_password(change.current_password.as_bytes())
            .map_err(|_| {
                ServiceError::Validation(FieldErrors::single(
                    "current_password",
                    "the current password is incorrect",
                ))
            })?;
        User::hash_password(&change.password).map(|hash| (user, hash))
    })
    .await?;
    let (user, hash) = hash;

    // the token used for this request stays valid, every other session is signed out
    let current_token = id
        .identity()
        .and_then(|token| tokens::split(&token).map(|(token_id, _)| token_id));

    let mut tx = state.db.begin().await?;
    User::update_password(user.id, &hash, &mut tx).await?;
    let revoked = AccessToken::revoke_all(user.id, current_token, &mut tx).await?;
    tx.commit().await?;

    info!(
        "user {} changed their password, {} other tokens revoked",
        user.id, revoked
    );

    http_ok_json!(json!({ "message": "Your password has been changed" }));
}

#[post("/forgot-password")]
async fn forgot_password(request: Validator<ForgotPassword>, state: Data<State>) -> Response {
    let request = request.into_inner();
    if let Some(user) = User::find_by_email(&request.email, &state.db).await? {
        let secret = PasswordResetToken::create(user.id, &state.db).await?;

        // TODO: hand the token to a mail transport once one is configured
        debug!("password reset token for user {}: {}", user.id, secret);
    }

    // known and unknown addresses get the same answer
    http_ok_json!(json!({
        "message": "If the email address is known, a password reset link has been sent"
    }));
}

#[post("/reset-password")]
async fn reset_password(reset: Validator<PasswordReset>, state: Data<State>) -> Response {
    let reset = reset.validate()?;

    let invalid_token = || {
        ServiceError::Validation(FieldErrors::single(
            "token",
            "this password reset token is invalid",
        ))
    };

    let user = User::find_by_email(&reset.email, &state.db)
        .await?
        .ok_or_else(invalid_token)?;

    let password = reset.password.clone();
    let hash = web::block(move || User::hash_password(&password)).await?;

    let mut tx = state.db.begin().await?;

    if !PasswordResetToken::consume(user.id, &reset.token, &mut tx).await? {
        return Err(invalid_token());
    }

    User::update_password(user.id, &hash, &mut tx).await?;
    AccessToken::revoke_all(user.id, None, &mut tx).await?;
    tx.commit().await?;

    info!("user {} reset their password", user.id);

    http_ok_json!(json!({ "message": "Your password has been reset" }));
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(register);
    cfg.service(login);
    cfg.service(logout);
    cfg.service(me);
    cfg.service(change_password);
    cfg.service(forgot_password);
    cfg.service(reset_password);
}
