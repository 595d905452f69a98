use actix_identity::Identity;
use actix_web::web::{Data, Path};
use actix_web::{delete, get, post, put, web, HttpResponse};

use crate::auth;
use crate::availability::{AvailabilityRequest, CourtAvailability};
use crate::courts::Court;
use crate::server::{Response, State};
use crate::validator::Validator;

#[get("/owner/courts/{court_id}/availability")]
async fn index(court_id: Path<i64>, id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let court = Court::find(*court_id, &state.db).await?;
    court.authorize(&user)?;

    let schedule = CourtAvailability::find_for_court(court.id, &state.db).await?;

    http_ok_json!(schedule);
}

#[post("/owner/courts/{court_id}/availability")]
async fn create(
    court_id: Path<i64>,
    request: Validator<AvailabilityRequest>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let court = Court::find(*court_id, &state.db).await?;
    court.authorize(&user)?;

    let request = request.validate()?;
    let availability = CourtAvailability::create(court.id, request, &state.db).await?;

    http_created_json!(availability);
}

#[put("/owner/courts/{court_id}/availability/{availability_id}")]
async fn update(
    path: Path<(i64, i64)>,
    request: Validator<AvailabilityRequest>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let (court_id, availability_id) = path.into_inner();

    let user = auth::get_user(&id, &state.db).await?;
    let court = Court::find(court_id, &state.db).await?;
    court.authorize(&user)?;

    let availability = CourtAvailability::find(court.id, availability_id, &state.db).await?;
    let request = request.validate()?;
    let availability = availability.update(request, &state.db).await?;

    http_ok_json!(availability);
}

#[delete("/owner/courts/{court_id}/availability/{availability_id}")]
async fn destroy(path: Path<(i64, i64)>, id: Identity, state: Data<State>) -> Response {
    let (court_id, availability_id) = path.into_inner();

    let user = auth::get_user(&id, &state.db).await?;
    let court = Court::find(court_id, &state.db).await?;
    court.authorize(&user)?;

    let availability = CourtAvailability::find(court.id, availability_id, &state.db).await?;
    availability.delete(&state.db).await?;

    Ok(HttpResponse::NoContent().finish())
}

pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(index);
    cfg.service(create);
    cfg.service(update);
    cfg.service(destroy);
}
