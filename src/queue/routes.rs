use actix_identity::Identity;
use actix_web::web::{Data, Path, Query};
use actix_web::{delete, get, patch, post, web};

use crate::auth;
use crate::config::Config;
use crate::errors::ServiceError;
use crate::queue::{
    CompleteMatch, CreateMatch, CreateSession, JoinQueue, QueueEntry, QueueMatch, QueueSession,
    SessionFilter, SessionStatusChange,
};
use crate::server::{Response, State};
use crate::users::{Role, User};
use crate::validator::Validator;
use crate::websocket::server::QueueUpdate;

fn notify(state: &State, session_id: i64, reason: &'static str) {
    state.notifier.do_send(QueueUpdate::new(session_id, reason));
}

#[post("/queue-sessions")]
async fn create_session(
    session: Validator<CreateSession>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    auth::require_role(&user, &[Role::QueueMaster, Role::Owner])?;

    let session = session.validate()?;
    let session = QueueSession::create(user.id, session, &state.db).await?;
    info!("user {} scheduled queue session {}", user.id, session.id);

    http_created_json!(session);
}

#[get("/queue-sessions")]
async fn list_sessions(filter: Query<SessionFilter>, id: Identity, state: Data<State>) -> Response {
    auth::get_user(&id, &state.db).await?;

    let sessions = QueueSession::find_all(filter.into_inner(), &state.db).await?;

    http_ok_json!(sessions);
}

#[get("/queue-sessions/{session_id}")]
async fn show_session(session_id: Path<i64>, id: Identity, state: Data<State>) -> Response {
    auth::get_user(&id, &state.db).await?;

    let session = QueueSession::find(*session_id, &state.db).await?;

    http_ok_json!(session.detail(&state.db).await?);
}

#[patch("/queue-sessions/{session_id}/status")]
async fn change_status(
    session_id: Path<i64>,
    change: Validator<SessionStatusChange>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let session = QueueSession::find(*session_id, &state.db).await?;
    session.authorize(&user)?;

    let change = change.into_inner();
    let session = session.change_status(change.status, &state.db).await?;
    info!("queue session {} is now {}", session.id, session.status);
    notify(&state, session.id, "session_status_changed");

    http_ok_json!(session);
}

/// Players add themselves, the organizer can add guests and other users
#[post("/queue-sessions/{session_id}/entries")]
async fn join(
    session_id: Path<i64>,
    request: Validator<JoinQueue>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let session = QueueSession::find(*session_id, &state.db).await?;
    let request = request.validate()?;

    let user_id = if request.is_on_behalf() {
        session.authorize(&user)?;
        match request.user_id {
            Some(user_id) => Some(User::find(user_id, &state.db).await?.id),
            None => None,
        }
    } else {
        Some(user.id)
    };

    let entry = QueueEntry::join(
        &session,
        user_id,
        request.guest_name,
        request.level,
        Config::queue_max_entries(),
        &state.db,
    )
    .await?;
    notify(&state, session.id, "entry_joined");

    http_created_json!(entry);
}

#[get("/queue-sessions/{session_id}/entries")]
async fn list_entries(session_id: Path<i64>, id: Identity, state: Data<State>) -> Response {
    auth::get_user(&id, &state.db).await?;
    let session = QueueSession::find(*session_id, &state.db).await?;

    let entries = QueueEntry::find_for_session(session.id, &state.db).await?;

    http_ok_json!(entries);
}

#[delete("/queue-sessions/{session_id}/entries/{entry_id}")]
async fn leave(path: Path<(i64, i64)>, id: Identity, state: Data<State>) -> Response {
    let (session_id, entry_id) = path.into_inner();

    let user = auth::get_user(&id, &state.db).await?;
    let session = QueueSession::find(session_id, &state.db).await?;
    let entry = QueueEntry::find(session.id, entry_id, &state.db).await?;

    if entry.user_id != Some(user.id) && !session.can_manage(&user) {
        forbidden!("you can only take yourself out of the queue");
    }

    let entry = entry.leave(&state.db).await?;
    notify(&state, session.id, "entry_left");

    http_ok_json!(entry);
}

#[post("/queue-sessions/{session_id}/matches")]
async fn start_match(
    session_id: Path<i64>,
    request: Validator<CreateMatch>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let session = QueueSession::find(*session_id, &state.db).await?;
    session.authorize(&user)?;

    let game = QueueMatch::start(&session, request.into_inner(), &state.db).await?;
    info!(
        "queue session {} started match {} on court {}",
        session.id, game.game.id, game.game.court_id
    );
    notify(&state, session.id, "match_started");

    http_created_json!(game);
}

#[get("/queue-sessions/{session_id}/matches")]
async fn list_matches(session_id: Path<i64>, id: Identity, state: Data<State>) -> Response {
    auth::get_user(&id, &state.db).await?;
    let session = QueueSession::find(*session_id, &state.db).await?;

    let matches = QueueMatch::find_for_session(session.id, &state.db).await?;

    http_ok_json!(matches);
}

/// the match the organizer of the session is about to change
async fn managed_match(
    path: Path<(i64, i64)>,
    id: &Identity,
    state: &State,
) -> Result<QueueMatch, ServiceError> {
    let (session_id, match_id) = path.into_inner();

    let user = auth::get_user(id, &state.db).await?;
    let session = QueueSession::find(session_id, &state.db).await?;
    session.authorize(&user)?;

    QueueMatch::find(session.id, match_id, &state.db).await
}

#[post("/queue-sessions/{session_id}/matches/{match_id}/complete")]
async fn complete_match(
    path: Path<(i64, i64)>,
    result: Validator<CompleteMatch>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let game = managed_match(path, &id, &state).await?;
    let result = result.validate()?;

    let game = game.complete(result, &state.db).await?;
    notify(&state, game.session_id, "match_completed");

    http_ok_json!(game);
}

#[post("/queue-sessions/{session_id}/matches/{match_id}/cancel")]
async fn cancel_match(path: Path<(i64, i64)>, id: Identity, state: Data<State>) -> Response {
    let game = managed_match(path, &id, &state).await?;

    let game = game.cancel(&state.db).await?;
    notify(&state, game.session_id, "match_cancelled");

    http_ok_json!(game);
}

pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(create_session);
    cfg.service(list_sessions);
    cfg.service(show_session);
    cfg.service(change_status);
    cfg.service(join);
    cfg.service(list_entries);
    cfg.service(leave);
    cfg.service(start_match);
    cfg.service(list_matches);
    cfg.service(complete_match);
    cfg.service(cancel_match);
}
