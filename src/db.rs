use sqlx::postgres::{PgPool, PgPoolOptions};

pub type Pool = PgPool;

/// Open the connection pool, fails when the database can't be reached
pub async fn build_connection_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<Pool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run the embedded migrations found in `./migrations`
pub async fn migrate(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("running database migrations");
    sqlx::migrate!("./migrations").run(pool).await
}

/// Helpers for tests that need a real database
///
/// They run against `DATABASE_URL` and are skipped when it isn't set, every
/// test creates its own users, courts and sessions so they can share a database.
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::availability::{AvailabilityRequest, CourtAvailability};
    use crate::courts::{Court, CreateCourt};
    use crate::users::{NewUser, Role, User};

    pub(crate) async fn pool(max_connections: u32) -> Option<Pool> {
        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("DATABASE_URL is not set, skipping");
                return None;
            }
        };

        let pool = build_connection_pool(&database_url, max_connections)
            .await
            .expect("can't connect to the test database");
        migrate(&pool).await.expect("can't migrate the test database");

        Some(pool)
    }

    pub(crate) async fn user(role: Role, db: &Pool) -> User {
        let id: u64 = rand::random();

        User::create(
            NewUser {
                name: String::from("Test Player"),
                email: format!("player-{}@example.com", id),
                password: String::from("not a hash"),
                role,
                phone: None,
            },
            db,
        )
        .await
        .expect("can't create test user")
    }

    /// An active court owned by `owner_id` at 1200 per hour and 300 per shuttlecock
    pub(crate) async fn court(owner_id: i64, db: &Pool) -> Court {
        Court::create(
            CreateCourt {
                owner_id,
                name: String::from("Court 1"),
                description: None,
                location: Some(String::from("Hall A")),
                surface: None,
                hourly_rate: 1200,
                shuttlecock_price: 300,
                is_active: true,
            },
            db,
        )
        .await
        .expect("can't create test court")
    }

    /// Open the court on `day_of_week` between the given hours
    pub(crate) async fn open(court_id: i64, day_of_week: i16, open: &str, close: &str, db: &Pool) {
        let request: AvailabilityRequest = serde_json::from_value(serde_json::json!({
            "day_of_week": day_of_week,
            "open_time": open,
            "close_time": close,
        }))
        .expect("invalid test window");

        CourtAvailability::create(court_id, request, db)
            .await
            .expect("can't open test court");
    }
}
