use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{PgConnection, Postgres, Transaction};

use crate::availability::CourtAvailability;
use crate::courts::Court;
use crate::db;
use crate::errors::{FieldErrors, ServiceError};
use crate::users::User;

use super::rules::{self, BookingRules, TimeRange};

text_enum! {
    pub enum BookingStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Cancelled => "cancelled",
        Completed => "completed",
    }
}

text_enum! {
    pub enum PaymentStatus {
        Unpaid => "unpaid",
        Paid => "paid",
        Refunded => "refunded",
    }
}

impl BookingStatus {
    /// pending and confirmed bookings keep other people off the court
    pub fn blocks_slot(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

impl PaymentStatus {
    /// what is owed once a booking ends up in `status`, a cancelled booking gets its money back
    pub fn after(self, status: BookingStatus) -> PaymentStatus {
        match (status, self) {
            (BookingStatus::Cancelled, PaymentStatus::Paid) => PaymentStatus::Refunded,
            (_, payment_status) => payment_status,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CourtBooking {
    pub id: i64,
    pub court_id: i64,
    pub user_id: i64,
    pub booking_date: NaiveDate,
    #[serde(with = "crate::timefmt")]
    pub start_time: NaiveTime,
    #[serde(with = "crate::timefmt")]
    pub end_time: NaiveTime,
    pub status: String,
    pub payment_status: String,
    pub shuttlecock_count: i32,
    /// in cents
    pub total_amount: i64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

///
/// **POST /api/courts/{court}/bookings**
///
/// ``` shell
/// curl --location --request POST 'localhost:8080/api/courts/1/bookings' \
///     --header 'Authorization: Bearer 3|...' \
///     --header 'Content-Type: application/json' \
///     --data-raw '{
///         "booking_date": "2024-06-08",
///         "start_time": "18:00",
///         "end_time": "19:30",
///         "shuttlecock_count": 3
///     }'
/// ```
#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub booking_date: NaiveDate,
    #[serde(with = "crate::timefmt")]
    pub start_time: NaiveTime,
    #[serde(with = "crate::timefmt")]
    pub end_time: NaiveTime,
    #[serde(default)]
    pub shuttlecock_count: i32,
    pub notes: Option<String>,
}

impl BookingRequest {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn validate(&self, rules: &BookingRules) -> Result<(), ServiceError> {
        rules.check_request(&self.range(), self.shuttlecock_count)?;

        if let Some(notes) = &self.notes {
            if notes.chars().count() > 1000 {
                return Err(ServiceError::Validation(FieldErrors::single(
                    "notes",
                    "the notes may not be greater than 1000 characters",
                )));
            }
        }

        Ok(())
    }
}

/// Filters for the bookings of a court
#[derive(Debug, Deserialize)]
pub struct BookingFilter {
    pub date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
}

/// Filters for the bookings of the current user
#[derive(Debug, Deserialize)]
pub struct MyBookingFilter {
    pub status: Option<BookingStatus>,
    /// only bookings from today on
    #[serde(default)]
    pub upcoming: bool,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
}

/// **PATCH /api/bookings/{booking}**
#[derive(Debug, Default, Deserialize)]
pub struct BookingUpdate {
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
}

/// The opening hours and the free parts of a court on one date
#[derive(Debug, Serialize)]
pub struct CourtSlots {
    pub court_id: i64,
    pub date: NaiveDate,
    pub open: Vec<TimeRange>,
    pub free: Vec<TimeRange>,
}

impl CourtBooking {
    pub fn status(&self) -> Result<BookingStatus, ServiceError> {
        BookingStatus::from_str(&self.status)
    }

    pub fn payment_status(&self) -> Result<PaymentStatus, ServiceError> {
        PaymentStatus::from_str(&self.payment_status)
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn can_view(&self, user: &User, court: &Court) -> bool {
        self.user_id == user.id || court.can_manage(user)
    }

    /// Run every check and store a new pending booking
    ///
    /// The court row stays locked until the booking is committed, so two
    /// requests for the same slot are handled one after the other.
    #[tracing::instrument(name = "CourtBooking::place", skip(request, rules, db))]
    pub async fn place(
        court_id: i64,
        user_id: i64,
        request: BookingRequest,
        rules: &BookingRules,
        now: NaiveDateTime,
        db: &db::Pool,
    ) -> Result<CourtBooking, ServiceError> {
        request.validate(rules)?;
        let range = request.range();

        let mut tx = db.begin().await?;
        let court = Court::lock(court_id, &mut tx).await?;

        if !court.is_active {
            return Err(ServiceError::CourtNotAvailable);
        }

        rules.check_booking_window(request.booking_date, range.start, now)?;

        let day = rules::day_of_week(request.booking_date);
        let windows = CourtAvailability::open_windows_locked(court.id, day, &mut tx).await?;
        if !rules::fits_in_windows(&windows, &range) {
            return Err(ServiceError::CourtClosed);
        }

        let booked = CourtBooking::blocking_ranges(
            court.id,
            request.booking_date,
            &[BookingStatus::Pending, BookingStatus::Confirmed],
            None,
            &mut tx,
        )
        .await?;
        if rules::conflicts_with(&booked, &range) {
            return Err(ServiceError::TimeSlotUnavailable);
        }

        let total = rules::total_amount(
            court.hourly_rate,
            court.shuttlecock_price,
            range.minutes(),
            request.shuttlecock_count,
        );

        let booking = sqlx::query_as::<_, CourtBooking>(
            "INSERT INTO court_bookings
            (court_id, user_id, booking_date, start_time, end_time, status, payment_status, shuttlecock_count, total_amount, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *",
        )
        .bind(court.id)
        .bind(user_id)
        .bind(request.booking_date)
        .bind(range.start)
        .bind(range.end)
        .bind(BookingStatus::Pending.as_str())
        .bind(PaymentStatus::Unpaid.as_str())
        .bind(request.shuttlecock_count)
        .bind(total)
        .bind(request.notes)
        .fetch_one(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(booking)
    }

    /// The time ranges taken by bookings in one of `statuses` on a court and date
    pub async fn blocking_ranges(
        court_id: i64,
        date: NaiveDate,
        statuses: &[BookingStatus],
        except: Option<i64>,
        conn: &mut PgConnection,
    ) -> Result<Vec<TimeRange>, ServiceError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();

        let rows = sqlx::query_as::<_, (NaiveTime, NaiveTime)>(
            "SELECT start_time, end_time FROM court_bookings
            WHERE court_id = $1 AND booking_date = $2
            AND status = ANY($3)
            AND ($4::bigint IS NULL OR id <> $4)
            ORDER BY start_time",
        )
        .bind(court_id)
        .bind(date)
        .bind(statuses)
        .bind(except)
        .fetch_all(conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(start, end)| TimeRange::new(start, end))
            .collect())
    }

    /// Opening hours of the court on `date` minus whatever is taken or already over
    #[tracing::instrument(name = "CourtBooking::slots", skip(court, db), fields(court = court.id))]
    pub async fn slots(
        court: &Court,
        date: NaiveDate,
        now: NaiveDateTime,
        db: &db::Pool,
    ) -> Result<CourtSlots, ServiceError> {
        let open = rules::merge_windows(
            CourtAvailability::open_windows(court.id, rules::day_of_week(date), db).await?,
        );

        let free = if date < now.date() || !court.is_active {
            Vec::new()
        } else {
            let mut conn = db.acquire().await?;
            let booked = CourtBooking::blocking_ranges(
                court.id,
                date,
                &[BookingStatus::Pending, BookingStatus::Confirmed],
                None,
                &mut conn,
            )
            .await?;

            let not_before = if date == now.date() {
                Some(now.time())
            } else {
                None
            };

            rules::free_slots(&open, &booked, not_before)
        };

        Ok(CourtSlots {
            court_id: court.id,
            date,
            open,
            free,
        })
    }

    #[tracing::instrument(name = "CourtBooking::find", skip(db))]
    pub async fn find(id: i64, db: &db::Pool) -> Result<CourtBooking, ServiceError> {
        let booking = sqlx::query_as::<_, CourtBooking>("SELECT * FROM court_bookings WHERE id = $1")
            .bind(id)
            .fetch_one(db)
            .await?;

        Ok(booking)
    }

    /// Bookings of a court, limited to the ones of `user_id` when given
    #[tracing::instrument(name = "CourtBooking::find_for_court", skip(db))]
    pub async fn find_for_court(
        court_id: i64,
        filter: BookingFilter,
        user_id: Option<i64>,
        db: &db::Pool,
    ) -> Result<Vec<CourtBooking>, ServiceError> {
        let status = filter.status.map(|status| status.as_str());

        let bookings = sqlx::query_as::<_, CourtBooking>(
            "SELECT * FROM court_bookings
            WHERE court_id = $1
            AND ($2::date IS NULL OR booking_date = $2)
            AND ($3::text IS NULL OR status = $3)
            AND ($4::bigint IS NULL OR user_id = $4)
            ORDER BY booking_date, start_time",
        )
        .bind(court_id)
        .bind(filter.date)
        .bind(status)
        .bind(user_id)
        .fetch_all(db)
        .await?;

        Ok(bookings)
    }

    #[tracing::instrument(name = "CourtBooking::find_for_user", skip(db))]
    pub async fn find_for_user(
        user_id: i64,
        filter: MyBookingFilter,
        today: NaiveDate,
        db: &db::Pool,
    ) -> Result<Vec<CourtBooking>, ServiceError> {
        let status = filter.status.map(|status| status.as_str());
        let from = if filter.upcoming { Some(today) } else { None };

        let bookings = sqlx::query_as::<_, CourtBooking>(
            "SELECT * FROM court_bookings
            WHERE user_id = $1
            AND ($2::text IS NULL OR status = $2)
            AND ($3::date IS NULL OR booking_date >= $3)
            ORDER BY booking_date DESC, start_time DESC",
        )
        .bind(user_id)
        .bind(status)
        .bind(from)
        .fetch_all(db)
        .await?;

        Ok(bookings)
    }

    /// Change the status and/or payment status of a booking
    ///
    /// Confirming a booking checks again that no other confirmed booking
    /// claims the same time, with the court locked. Cancelling a paid booking
    /// refunds it, the same as `DELETE` does.
    #[tracing::instrument(name = "CourtBooking::change", skip(self, db), fields(booking = self.id))]
    pub async fn change(
        &self,
        update: BookingUpdate,
        db: &db::Pool,
    ) -> Result<CourtBooking, ServiceError> {
        let mut status = self.status()?;
        let mut payment_status = self.payment_status()?;

        if let Some(next) = update.payment_status {
            if next != payment_status {
                rules::check_payment_transition(payment_status, next)?;
                payment_status = next;
            }
        }

        let mut tx = db.begin().await?;

        if let Some(next) = update.status {
            if next != status {
                rules::check_status_transition(status, next)?;

                if next == BookingStatus::Confirmed {
                    Court::lock(self.court_id, &mut tx).await?;

                    let confirmed = CourtBooking::blocking_ranges(
                        self.court_id,
                        self.booking_date,
                        &[BookingStatus::Confirmed],
                        Some(self.id),
                        &mut tx,
                    )
                    .await?;

                    if rules::conflicts_with(&confirmed, &self.range()) {
                        return Err(ServiceError::TimeSlotUnavailable);
                    }
                }

                status = next;
            }
        }

        if status != self.status()? {
            payment_status = payment_status.after(status);
        }
        let booking = CourtBooking::store_status(self.id, status, payment_status, &mut tx).await?;
        tx.commit().await?;

        Ok(booking)
    }

    /// Cancel a booking, paid bookings get refunded
    ///
    /// `enforce_cutoff` is false for the people managing the court.
    #[tracing::instrument(name = "CourtBooking::cancel", skip(self, rules, db), fields(booking = self.id))]
    pub async fn cancel(
        &self,
        rules: &BookingRules,
        enforce_cutoff: bool,
        now: NaiveDateTime,
        db: &db::Pool,
    ) -> Result<CourtBooking, ServiceError> {
        if !self.status()?.blocks_slot() {
            booking_error!(format!("a {} booking can't be cancelled", self.status));
        }

        if enforce_cutoff {
            rules.check_cancellation(self.booking_date, self.start_time, now)?;
        }

        let payment_status = self.payment_status()?.after(BookingStatus::Cancelled);

        let mut tx = db.begin().await?;
        let booking =
            CourtBooking::store_status(self.id, BookingStatus::Cancelled, payment_status, &mut tx)
                .await?;
        tx.commit().await?;

        Ok(booking)
    }

    async fn store_status(
        id: i64,
        status: BookingStatus,
        payment_status: PaymentStatus,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<CourtBooking, ServiceError> {
        let booking = sqlx::query_as::<_, CourtBooking>(
            "UPDATE court_bookings SET status = $1, payment_status = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING *",
        )
        .bind(status.as_str())
        .bind(payment_status.as_str())
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        Ok(booking)
    }

    /// pending and confirmed bookings from today on
    pub async fn count_upcoming(court_id: i64, db: &db::Pool) -> Result<i64, ServiceError> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM court_bookings
            WHERE court_id = $1
            AND status IN ('pending', 'confirmed')
            AND booking_date >= CURRENT_DATE",
        )
        .bind(court_id)
        .fetch_one(db)
        .await?;

        Ok(count)
    }

    pub async fn count(db: &db::Pool) -> Result<i64, ServiceError> {
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM court_bookings")
            .fetch_one(db)
            .await?;

        Ok(count)
    }
}
