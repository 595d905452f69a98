use chrono::{DateTime, NaiveTime, Utc};
use sqlx::PgConnection;

use crate::bookings::rules::TimeRange;
use crate::cache::{Cache, CacheIdentifier};
use crate::db;
use crate::errors::{FieldErrors, ServiceError};

/// A weekly opening window of a court, day_of_week 0 is sunday
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CourtAvailability {
    pub id: i64,
    pub court_id: i64,
    pub day_of_week: i16,
    #[serde(with = "crate::timefmt")]
    pub open_time: NaiveTime,
    #[serde(with = "crate::timefmt")]
    pub close_time: NaiveTime,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// All the windows of a court, cached as a whole
#[derive(Debug, Serialize, Deserialize)]
struct CourtSchedule(Vec<CourtAvailability>);

impl CacheIdentifier for CourtSchedule {
    fn cache_key<T: std::fmt::Display>(court_id: T) -> String {
        format!("court.{}.schedule", court_id)
    }
}

fn default_true() -> bool {
    true
}

///
/// **POST /api/owner/courts/{court}/availability**
/// **PUT /api/owner/courts/{court}/availability/{availability}**
///
/// ``` shell
/// curl --location --request POST 'localhost:8080/api/owner/courts/1/availability' \
///     --header 'Authorization: Bearer 1|...' \
///     --header 'Content-Type: application/json' \
///     --data-raw '{ "day_of_week": 6, "open_time": "08:00", "close_time": "22:00" }'
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityRequest {
    pub day_of_week: i16,
    #[serde(with = "crate::timefmt")]
    pub open_time: NaiveTime,
    #[serde(with = "crate::timefmt")]
    pub close_time: NaiveTime,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

impl AvailabilityRequest {
    fn range(&self) -> TimeRange {
        TimeRange::new(self.open_time, self.close_time)
    }

    /// Windows of the same court on the same day can't overlap
    pub fn check_overlap(
        &self,
        existing: &[CourtAvailability],
        except: Option<i64>,
    ) -> Result<(), ServiceError> {
        let range = self.range();

        let overlaps = existing
            .iter()
            .filter(|window| Some(window.id) != except)
            .filter(|window| window.day_of_week == self.day_of_week)
            .any(|window| window.range().overlaps(&range));

        if overlaps {
            return Err(ServiceError::Validation(FieldErrors::single(
                "open_time",
                "this window overlaps with another window on the same day",
            )));
        }

        Ok(())
    }
}

impl crate::validator::Validate for AvailabilityRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();

        if !(0..=6).contains(&self.day_of_week) {
            errors.add(
                "day_of_week",
                "the day of week must be between 0 (sunday) and 6 (saturday)",
            );
        }

        if self.open_time >= self.close_time {
            errors.add("close_time", "the closing time must be after the opening time");
        }

        errors.into_result()
    }
}

impl CourtAvailability {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.open_time, self.close_time)
    }

    /// Every window of a court, ordered by day and opening time
    ///
    /// Served from the cache, only fit for display. Checks that guard a write
    /// read the rows with [`CourtAvailability::load`].
    #[tracing::instrument(name = "CourtAvailability::find_for_court", skip(db))]
    pub async fn find_for_court(
        court_id: i64,
        db: &db::Pool,
    ) -> Result<Vec<CourtAvailability>, ServiceError> {
        if let Some(CourtSchedule(schedule)) = Cache::get::<CourtSchedule, _>(court_id).await {
            return Ok(schedule);
        }

        let mut conn = db.acquire().await?;
        let schedule = CourtSchedule(CourtAvailability::load(court_id, &mut conn).await?);
        Cache::set(&schedule, court_id).await;

        Ok(schedule.0)
    }

    /// Every window of a court straight from the database, on the caller's connection
    pub async fn load(
        court_id: i64,
        conn: &mut PgConnection,
    ) -> Result<Vec<CourtAvailability>, ServiceError> {
        let schedule = sqlx::query_as::<_, CourtAvailability>(
            "SELECT * FROM court_availabilities
            WHERE court_id = $1
            ORDER BY day_of_week, open_time",
        )
        .bind(court_id)
        .fetch_all(conn)
        .await?;

        Ok(schedule)
    }

    /// The open windows of a court on one day of the week, as shown to players
    pub async fn open_windows(
        court_id: i64,
        day_of_week: i16,
        db: &db::Pool,
    ) -> Result<Vec<TimeRange>, ServiceError> {
        let schedule = CourtAvailability::find_for_court(court_id, db).await?;

        Ok(windows_on(&schedule, day_of_week))
    }

    /// The open windows of a court on one day of the week, read inside the
    /// transaction that holds the court lock
    pub async fn open_windows_locked(
        court_id: i64,
        day_of_week: i16,
        conn: &mut PgConnection,
    ) -> Result<Vec<TimeRange>, ServiceError> {
        let schedule = CourtAvailability::load(court_id, conn).await?;

        Ok(windows_on(&schedule, day_of_week))
    }

    /// Find a window, it has to belong to the given court
    #[tracing::instrument(name = "CourtAvailability::find", skip(db))]
    pub async fn find(
        court_id: i64,
        id: i64,
        db: &db::Pool,
    ) -> Result<CourtAvailability, ServiceError> {
        let availability = sqlx::query_as::<_, CourtAvailability>(
            "SELECT * FROM court_availabilities WHERE id = $1 AND court_id = $2",
        )
        .bind(id)
        .bind(court_id)
        .fetch_one(db)
        .await?;

        Ok(availability)
    }

    #[tracing::instrument(name = "CourtAvailability::create", skip(db))]
    pub async fn create(
        court_id: i64,
        request: AvailabilityRequest,
        db: &db::Pool,
    ) -> Result<CourtAvailability, ServiceError> {
        let mut conn = db.acquire().await?;
        let existing = CourtAvailability::load(court_id, &mut conn).await?;
        request.check_overlap(&existing, None)?;

        let availability = sqlx::query_as::<_, CourtAvailability>(
            "INSERT INTO court_availabilities (court_id, day_of_week, open_time, close_time, is_available)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *",
        )
        .bind(court_id)
        .bind(request.day_of_week)
        .bind(request.open_time)
        .bind(request.close_time)
        .bind(request.is_available)
        .fetch_one(&mut conn)
        .await?;

        CourtAvailability::forget_schedule(court_id).await;

        Ok(availability)
    }

    #[tracing::instrument(name = "CourtAvailability::update", skip(self, db), fields(availability = self.id))]
    pub async fn update(
        &self,
        request: AvailabilityRequest,
        db: &db::Pool,
    ) -> Result<CourtAvailability, ServiceError> {
        let mut conn = db.acquire().await?;
        let existing = CourtAvailability::load(self.court_id, &mut conn).await?;
        request.check_overlap(&existing, Some(self.id))?;

        let availability = sqlx::query_as::<_, CourtAvailability>(
            "UPDATE court_availabilities SET
            day_of_week = $1, open_time = $2, close_time = $3, is_available = $4, updated_at = NOW()
            WHERE id = $5
            RETURNING *",
        )
        .bind(request.day_of_week)
        .bind(request.open_time)
        .bind(request.close_time)
        .bind(request.is_available)
        .bind(self.id)
        .fetch_one(&mut conn)
        .await?;

        CourtAvailability::forget_schedule(self.court_id).await;

        Ok(availability)
    }

    #[tracing::instrument(name = "CourtAvailability::delete", skip(self, db), fields(availability = self.id))]
    pub async fn delete(&self, db: &db::Pool) -> Result<(), ServiceError> {
        sqlx::query("DELETE FROM court_availabilities WHERE id = $1")
            .bind(self.id)
            .execute(db)
            .await?;

        CourtAvailability::forget_schedule(self.court_id).await;

        Ok(())
    }

    pub async fn forget_schedule(court_id: i64) {
        Cache::forget::<CourtSchedule, _>(court_id).await;
    }
}

fn windows_on(schedule: &[CourtAvailability], day_of_week: i16) -> Vec<TimeRange> {
    schedule
        .iter()
        .filter(|window| window.day_of_week == day_of_week && window.is_available)
        .map(CourtAvailability::range)
        .collect()
}
