use actix_identity::Identity;
use actix_web::web::{Data, Path, Query};
use actix_web::{delete, get, patch, post, web};
use chrono::Local;

use crate::auth;
use crate::bookings::{
    BookingFilter, BookingRequest, BookingUpdate, CourtBooking, MyBookingFilter, SlotQuery,
};
use crate::config::Config;
use crate::courts::Court;
use crate::server::{Response, State};
use crate::validator::Validator;

#[post("/courts/{court_id}/bookings")]
async fn create(
    court_id: Path<i64>,
    request: Validator<BookingRequest>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = auth::get_user(&id, &state.db).await?;

    let booking = CourtBooking::place(
        *court_id,
        user.id,
        request.into_inner(),
        &Config::booking_rules(),
        Local::now().naive_local(),
        &state.db,
    )
    .await?;

    info!(
        "user {} booked court {} on {} from {} to {}",
        user.id, booking.court_id, booking.booking_date, booking.start_time, booking.end_time
    );

    http_created_json!(booking);
}

#[get("/courts/{court_id}/bookings")]
async fn index(
    court_id: Path<i64>,
    filter: Query<BookingFilter>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let court = Court::find(*court_id, &state.db).await?;

    let only_user = if court.can_manage(&user) {
        None
    } else {
        Some(user.id)
    };

    let bookings =
        CourtBooking::find_for_court(court.id, filter.into_inner(), only_user, &state.db).await?;

    http_ok_json!(bookings);
}

#[get("/courts/{court_id}/slots")]
async fn free_slots(
    court_id: Path<i64>,
    query: Query<SlotQuery>,
    id: Identity,
    state: Data<State>,
) -> Response {
    auth::get_user(&id, &state.db).await?;
    let court = Court::find(*court_id, &state.db).await?;

    let slots =
        CourtBooking::slots(&court, query.date, Local::now().naive_local(), &state.db).await?;

    http_ok_json!(slots);
}

#[get("/bookings")]
async fn mine(filter: Query<MyBookingFilter>, id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;

    let bookings = CourtBooking::find_for_user(
        user.id,
        filter.into_inner(),
        Local::today().naive_local(),
        &state.db,
    )
    .await?;

    http_ok_json!(bookings);
}

#[get("/bookings/{booking_id}")]
async fn show(booking_id: Path<i64>, id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let booking = CourtBooking::find(*booking_id, &state.db).await?;
    let court = Court::find(booking.court_id, &state.db).await?;

    if !booking.can_view(&user, &court) {
        forbidden!("this is not your booking");
    }

    http_ok_json!(booking);
}

#[patch("/bookings/{booking_id}")]
async fn update_booking(
    booking_id: Path<i64>,
    update: Validator<BookingUpdate>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let booking = CourtBooking::find(*booking_id, &state.db).await?;
    let court = Court::find(booking.court_id, &state.db).await?;
    court.authorize(&user)?;

    let update = update.into_inner();
    if update.status.is_none() && update.payment_status.is_none() {
        bad_request!("nothing to update, send a status and/or a payment_status");
    }

    let booking = booking.change(update, &state.db).await?;
    info!(
        "user {} set booking {} to {}/{}",
        user.id, booking.id, booking.status, booking.payment_status
    );

    http_ok_json!(booking);
}

#[delete("/bookings/{booking_id}")]
async fn cancel(booking_id: Path<i64>, id: Identity, state: Data<State>) -> Response {
    let user = auth::get_user(&id, &state.db).await?;
    let booking = CourtBooking::find(*booking_id, &state.db).await?;
    let court = Court::find(booking.court_id, &state.db).await?;

    if !booking.can_view(&user, &court) {
        forbidden!("this is not your booking");
    }

    let booking = booking
        .cancel(
            &Config::booking_rules(),
            !court.can_manage(&user),
            Local::now().naive_local(),
            &state.db,
        )
        .await?;
    info!("user {} cancelled booking {}", user.id, booking.id);

    http_ok_json!(booking);
}

pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(create);
    cfg.service(index);
    cfg.service(free_slots);
    cfg.service(mine);
    cfg.service(show);
    cfg.service(update_booking);
    cfg.service(cancel);
}
