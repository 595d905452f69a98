use actix_identity::Identity;
use actix_web::web::{Data, Path, Query};
use actix_web::{delete, get, patch, post, web, HttpResponse};

use crate::auth;
use crate::courts::{Court, CourtFilter, CourtScope, CreateCourt, UpdateCourt};
use crate::server::{Response, State};
use crate::users::Role;
use crate::validator::Validator;

#[get("/courts")]
async fn index(filter: Query<CourtFilter>, id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;

    let courts =
        Court::find_all(filter.into_inner(), CourtScope::for_user(&user), &state.db).await?;

    http_ok_json!(courts);
}

#[post("/courts")]
async fn create(court: Validator<CreateCourt>, id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    auth::require_role(&user, &[Role::Owner])?;

    let mut court = court.validate()?;
    court.owner_id = user.id;

    let court = Court::create(court, &state.db).await?;
    info!("user {} created court {}", user.id, court.id);

    http_created_json!(court);
}

#[get("/courts/{court_id}")]
async fn show(court_id: Path<i64>, id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let court = Court::find(*court_id, &state.db).await?;

    // inactive courts only exist for the people managing them
    if !court.is_active && !court.can_manage(&user) {
        return Err(crate::errors::ServiceError::NotFound);
    }

    http_ok_json!(court);
}

#[patch("/courts/{court_id}")]
async fn update(
    court_id: Path<i64>,
    changes: Validator<UpdateCourt>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let court = Court::find(*court_id, &state.db).await?;
    court.authorize(&user)?;

    let changes = changes.validate()?;
    let court = Court::update(court.id, changes, &state.db).await?;

    http_ok_json!(court);
}

#[delete("/courts/{court_id}")]
async fn destroy(court_id: Path<i64>, id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let court = Court::find(*court_id, &state.db).await?;
    court.authorize(&user)?;

    court.delete(&state.db).await?;
    info!("user {} deleted court {}", user.id, court.id);

    Ok(HttpResponse::NoContent().finish())
}

#[get("/player/courts")]
async fn bookable(id: Identity, state: Data<State>) -> Response {
    auth::get_user(&id, &state.db).await?;

    let courts = Court::find_bookable(&state.db).await?;

    http_ok_json!(courts);
}

pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(index);
    cfg.service(create);
    cfg.service(show);
    cfg.service(update);
    cfg.service(destroy);
    cfg.service(bookable);
}
