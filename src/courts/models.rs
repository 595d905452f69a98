use chrono::{DateTime, Utc};

use crate::availability::CourtAvailability;
use crate::bookings::CourtBooking;
use crate::cache::{Cache, CacheIdentifier};
use crate::db;
use crate::errors::{FieldErrors, ServiceError};
use crate::users::{Role, User};
use crate::validator::check_name;

/// A bookable badminton court, prices are in cents
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Court {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub surface: Option<String>,
    pub hourly_rate: i64,
    pub shuttlecock_price: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

///
/// **POST /api/courts**
///
/// The owner_id is ignored when sent, it's the id of the authenticated user.
///
/// ``` shell
/// curl --location --request POST 'localhost:8080/api/courts' \
///     --header 'Authorization: Bearer 1|...' \
///     --header 'Content-Type: application/json' \
///     --data-raw '{
///         "name": "Court 1",
///         "location": "Hall A",
///         "hourly_rate": 1500,
///         "shuttlecock_price": 350
///     }'
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCourt {
    #[serde(skip)]
    pub owner_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub surface: Option<String>,
    #[serde(default)]
    pub hourly_rate: i64,
    #[serde(default)]
    pub shuttlecock_price: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// **PATCH /api/courts/{id}**, only the fields that are sent are changed
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCourt {
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub surface: Option<String>,
    pub hourly_rate: Option<i64>,
    pub shuttlecock_price: Option<i64>,
    pub is_active: Option<bool>,
}

/// CourtFilter can be used by the client to query for courts
#[derive(Debug, Deserialize)]
pub struct CourtFilter {
    /// filter these courts by %name%
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

/// Which courts a user gets to see when listing courts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CourtScope {
    All,
    OwnedBy(i64),
    Active,
}

impl CourtScope {
    pub fn for_user(user: &User) -> Self {
        match user.role() {
            Role::Superadmin => CourtScope::All,
            Role::Owner => CourtScope::OwnedBy(user.id),
            Role::Player | Role::QueueMaster => CourtScope::Active,
        }
    }
}

/// A court with its weekly opening hours
#[derive(Debug, Serialize)]
pub struct CourtWithSchedule {
    #[serde(flatten)]
    pub court: Court,
    pub availabilities: Vec<CourtAvailability>,
}

impl Court {
    /// returns true if a user may change the court, its hours and its bookings
    pub fn can_manage(&self, user: &User) -> bool {
        user.is_superadmin() || user.id == self.owner_id
    }

    pub fn authorize(&self, user: &User) -> Result<(), ServiceError> {
        if !self.can_manage(user) {
            forbidden!("only the owner of this court can manage it");
        }

        Ok(())
    }

    #[tracing::instrument(name = "Court::find", skip(db))]
    pub async fn find(id: i64, db: &db::Pool) -> Result<Court, ServiceError> {
        if let Some(court) = Cache::get::<Court, _>(id).await {
            return Ok(court);
        }

        let court = sqlx::query_as::<_, Court>("SELECT * FROM courts WHERE id = $1")
            .bind(id)
            .fetch_one(db)
            .await?;

        Cache::set(&court, court.id).await;

        Ok(court)
    }

    /// Lock the court row for the rest of the transaction
    ///
    /// Every booking or match on a court is created while holding this lock,
    /// which serializes the conflict checks of concurrent requests.
    #[tracing::instrument(name = "Court::lock", skip(tx))]
    pub async fn lock(
        id: i64,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<Court, ServiceError> {
        let court = sqlx::query_as::<_, Court>("SELECT * FROM courts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        Ok(court)
    }

    #[tracing::instrument(name = "Court::find_all", skip(db))]
    pub async fn find_all(
        filter: CourtFilter,
        scope: CourtScope,
        db: &db::Pool,
    ) -> Result<Vec<Court>, ServiceError> {
        let (owner_id, only_active) = match scope {
            CourtScope::All => (None, filter.is_active),
            CourtScope::OwnedBy(owner_id) => (Some(owner_id), filter.is_active),
            CourtScope::Active => (None, Some(true)),
        };

        let courts = sqlx::query_as::<_, Court>(
            "SELECT * FROM courts
            WHERE ($1::bigint IS NULL OR owner_id = $1)
            AND ($2::boolean IS NULL OR is_active = $2)
            AND ($3::text IS NULL OR name ILIKE '%' || $3 || '%')
            ORDER BY name, id",
        )
        .bind(owner_id)
        .bind(only_active)
        .bind(filter.name)
        .fetch_all(db)
        .await?;

        Ok(courts)
    }

    /// All active courts along with their opening hours
    #[tracing::instrument(name = "Court::find_bookable", skip(db))]
    pub async fn find_bookable(db: &db::Pool) -> Result<Vec<CourtWithSchedule>, ServiceError> {
        let filter = CourtFilter {
            name: None,
            is_active: Some(true),
        };
        let courts = Court::find_all(filter, CourtScope::Active, db).await?;

        let mut res = Vec::with_capacity(courts.len());
        for court in courts {
            let availabilities = CourtAvailability::find_for_court(court.id, db).await?;
            res.push(CourtWithSchedule {
                court,
                availabilities,
            });
        }

        Ok(res)
    }

    #[tracing::instrument(name = "Court::create", skip(db))]
    pub async fn create(court: CreateCourt, db: &db::Pool) -> Result<Court, ServiceError> {
        let court = sqlx::query_as::<_, Court>(
            "INSERT INTO courts
            (owner_id, name, description, location, surface, hourly_rate, shuttlecock_price, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *",
        )
        .bind(court.owner_id)
        .bind(court.name.trim())
        .bind(court.description)
        .bind(court.location)
        .bind(court.surface)
        .bind(court.hourly_rate)
        .bind(court.shuttlecock_price)
        .bind(court.is_active)
        .fetch_one(db)
        .await?;

        Ok(court)
    }

    /// Apply a partial update, the changes should be validated beforehand
    pub fn apply(mut self, changes: UpdateCourt) -> Court {
        if let Some(name) = changes.name {
            self.name = name.trim().to_string();
        }
        if changes.description.is_some() {
            self.description = changes.description;
        }
        if changes.location.is_some() {
            self.location = changes.location;
        }
        if changes.surface.is_some() {
            self.surface = changes.surface;
        }
        if let Some(hourly_rate) = changes.hourly_rate {
            self.hourly_rate = hourly_rate;
        }
        if let Some(shuttlecock_price) = changes.shuttlecock_price {
            self.shuttlecock_price = shuttlecock_price;
        }
        if let Some(is_active) = changes.is_active {
            self.is_active = is_active;
        }
        self
    }

    /// Apply a partial update to the court as it is stored right now
    ///
    /// The row is read under lock, a cached copy could put back columns that
    /// changed in the meantime.
    #[tracing::instrument(name = "Court::update", skip(changes, db))]
    pub async fn update(
        id: i64,
        changes: UpdateCourt,
        db: &db::Pool,
    ) -> Result<Court, ServiceError> {
        let mut tx = db.begin().await?;
        let court = Court::lock(id, &mut tx).await?.apply(changes);

        let court = sqlx::query_as::<_, Court>(
            "UPDATE courts SET
            name = $1, description = $2, location = $3, surface = $4,
            hourly_rate = $5, shuttlecock_price = $6, is_active = $7, updated_at = NOW()
            WHERE id = $8
            RETURNING *",
        )
        .bind(&court.name)
        .bind(&court.description)
        .bind(&court.location)
        .bind(&court.surface)
        .bind(court.hourly_rate)
        .bind(court.shuttlecock_price)
        .bind(court.is_active)
        .bind(court.id)
        .fetch_one(&mut tx)
        .await?;

        tx.commit().await?;
        Cache::set(&court, court.id).await;

        Ok(court)
    }

    /// Delete the court, refused while people still expect to play on it
    #[tracing::instrument(name = "Court::delete", skip(self, db), fields(court = self.id))]
    pub async fn delete(&self, db: &db::Pool) -> Result<(), ServiceError> {
        let upcoming = CourtBooking::count_upcoming(self.id, db).await?;
        if upcoming > 0 {
            return Err(ServiceError::Conflict(format!(
                "the court still has {} upcoming bookings",
                upcoming
            )));
        }

        sqlx::query("DELETE FROM courts WHERE id = $1")
            .bind(self.id)
            .execute(db)
            .await?;

        Cache::forget::<Court, _>(self.id).await;
        CourtAvailability::forget_schedule(self.id).await;

        Ok(())
    }

    pub async fn count(db: &db::Pool) -> Result<i64, ServiceError> {
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM courts")
            .fetch_one(db)
            .await?;

        Ok(count)
    }
}

impl CacheIdentifier for Court {
    fn cache_key<T: std::fmt::Display>(id: T) -> String {
        format!("court.{}", id)
    }
}

fn check_optional_text(errors: &mut FieldErrors, field: &str, value: &Option<String>, max: usize) {
    if let Some(value) = value {
        if value.chars().count() > max {
            errors.add(
                field,
                &format!("the {} may not be greater than {} characters", field, max),
            );
        }
    }
}

fn check_amount(errors: &mut FieldErrors, field: &str, amount: i64) {
    if amount < 0 {
        errors.add(field, &format!("the {} can't be negative", field));
    }
}

impl crate::validator::Validate for CreateCourt {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();

        check_name(&mut errors, "name", &self.name, 100);
        check_optional_text(&mut errors, "description", &self.description, 2000);
        check_optional_text(&mut errors, "location", &self.location, 255);
        check_optional_text(&mut errors, "surface", &self.surface, 50);
        check_amount(&mut errors, "hourly_rate", self.hourly_rate);
        check_amount(&mut errors, "shuttlecock_price", self.shuttlecock_price);

        errors.into_result()
    }
}

impl crate::validator::Validate for UpdateCourt {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();

        if let Some(name) = &self.name {
            check_name(&mut errors, "name", name, 100);
        }
        check_optional_text(&mut errors, "description", &self.description, 2000);
        check_optional_text(&mut errors, "location", &self.location, 255);
        check_optional_text(&mut errors, "surface", &self.surface, 50);
        if let Some(hourly_rate) = self.hourly_rate {
            check_amount(&mut errors, "hourly_rate", hourly_rate);
        }
        if let Some(shuttlecock_price) = self.shuttlecock_price {
            check_amount(&mut errors, "shuttlecock_price", shuttlecock_price);
        }

        errors.into_result()
    }
}
