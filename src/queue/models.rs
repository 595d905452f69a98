use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{Postgres, Transaction};

use crate::courts::Court;
use crate::db;
use crate::errors::{FieldErrors, ServiceError};
use crate::users::User;
use crate::validator::check_name;

use super::assignment::{self, Teams};

text_enum! {
    pub enum SessionStatus {
        Scheduled => "scheduled",
        Open => "open",
        Closed => "closed",
    }
}

text_enum! {
    pub enum PlayerLevel {
        Beginner => "beginner",
        Intermediate => "intermediate",
        Advanced => "advanced",
    }
}

text_enum! {
    pub enum EntryStatus {
        Waiting => "waiting",
        Playing => "playing",
        Left => "left",
    }
}

text_enum! {
    pub enum MatchStatus {
        Active => "active",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

impl PlayerLevel {
    /// used to balance teams
    pub fn weight(&self) -> i32 {
        match self {
            PlayerLevel::Beginner => 1,
            PlayerLevel::Intermediate => 2,
            PlayerLevel::Advanced => 3,
        }
    }
}

/// A walk-in session where players queue up for matches on the courts
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueSession {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub session_date: NaiveDate,
    #[serde(with = "crate::timefmt")]
    pub start_time: NaiveTime,
    #[serde(with = "crate::timefmt")]
    pub end_time: NaiveTime,
    pub status: String,
    pub players_per_team: i16,
    pub fee_per_game: i64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: i64,
    pub session_id: i64,
    pub user_id: Option<i64>,
    pub guest_name: Option<String>,
    pub level: String,
    pub status: String,
    pub games_played: i32,
    pub queued_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueMatch {
    pub id: i64,
    pub session_id: i64,
    pub court_id: i64,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub shuttlecocks_used: i32,
    pub winning_team: Option<i16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueMatchPlayer {
    pub id: i64,
    pub match_id: i64,
    pub entry_id: i64,
    pub team: i16,
}

#[derive(Debug, Serialize)]
pub struct MatchDetail {
    #[serde(flatten)]
    pub game: QueueMatch,
    pub players: Vec<QueueMatchPlayer>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: QueueSession,
    pub entries: Vec<QueueEntry>,
    pub matches: Vec<MatchDetail>,
}

fn default_players_per_team() -> i16 {
    2
}

///
/// **POST /api/queue-sessions**
///
/// ``` shell
/// curl --location --request POST 'localhost:8080/api/queue-sessions' \
///     --header 'Authorization: Bearer 2|...' \
///     --header 'Content-Type: application/json' \
///     --data-raw '{
///         "name": "Friday night doubles",
///         "session_date": "2024-06-07",
///         "start_time": "19:00",
///         "end_time": "23:00",
///         "players_per_team": 2,
///         "fee_per_game": 200
///     }'
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateSession {
    pub name: String,
    pub session_date: NaiveDate,
    #[serde(with = "crate::timefmt")]
    pub start_time: NaiveTime,
    #[serde(with = "crate::timefmt")]
    pub end_time: NaiveTime,
    #[serde(default = "default_players_per_team")]
    pub players_per_team: i16,
    #[serde(default)]
    pub fee_per_game: i64,
    pub notes: Option<String>,
}

impl crate::validator::Validate for CreateSession {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();

        check_name(&mut errors, "name", &self.name, 100);

        if self.start_time >= self.end_time {
            errors.add("end_time", "the end time must be after the start time");
        }
        if self.players_per_team != 1 && self.players_per_team != 2 {
            errors.add("players_per_team", "a team has either 1 or 2 players");
        }
        if self.fee_per_game < 0 {
            errors.add("fee_per_game", "the fee per game can't be negative");
        }

        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionFilter {
    pub date: Option<NaiveDate>,
    pub status: Option<SessionStatus>,
}

/// **PATCH /api/queue-sessions/{session}/status**
#[derive(Debug, Deserialize)]
pub struct SessionStatusChange {
    pub status: SessionStatus,
}

/// **POST /api/queue-sessions/{session}/entries**
///
/// Without `user_id` or `guest_name` the current user joins the queue.
#[derive(Debug, Deserialize)]
pub struct JoinQueue {
    pub level: PlayerLevel,
    pub user_id: Option<i64>,
    pub guest_name: Option<String>,
}

impl JoinQueue {
    /// true when someone is added on behalf of somebody else
    pub fn is_on_behalf(&self) -> bool {
        self.user_id.is_some() || self.guest_name.is_some()
    }
}

impl crate::validator::Validate for JoinQueue {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();

        if self.user_id.is_some() && self.guest_name.is_some() {
            errors.add("guest_name", "send either a user_id or a guest_name, not both");
        }
        if let Some(guest_name) = &self.guest_name {
            check_name(&mut errors, "guest_name", guest_name, 100);
        }

        errors.into_result()
    }
}

/// **POST /api/queue-sessions/{session}/matches**
///
/// Leave out both teams to let the queue pick the players.
#[derive(Debug, Deserialize)]
pub struct CreateMatch {
    pub court_id: i64,
    pub team_one: Option<Vec<i64>>,
    pub team_two: Option<Vec<i64>>,
}

/// **POST /api/queue-sessions/{session}/matches/{match}/complete**
#[derive(Debug, Deserialize)]
pub struct CompleteMatch {
    pub winning_team: Option<i16>,
    #[serde(default)]
    pub shuttlecocks_used: i32,
}

impl crate::validator::Validate for CompleteMatch {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();

        if let Some(team) = self.winning_team {
            if team != 1 && team != 2 {
                errors.add("winning_team", "the winning team is either 1 or 2");
            }
        }
        if self.shuttlecocks_used < 0 {
            errors.add("shuttlecocks_used", "the shuttlecocks used can't be negative");
        }

        errors.into_result()
    }
}

/// Allowed changes of a session status
pub fn check_session_transition(
    from: SessionStatus,
    to: SessionStatus,
) -> Result<(), ServiceError> {
    use SessionStatus::*;

    match (from, to) {
        (Scheduled, Open) | (Scheduled, Closed) | (Open, Closed) => Ok(()),
        (from, to) => Err(ServiceError::Validation(FieldErrors::single(
            "status",
            &format!("a {} session can't become {}", from, to),
        ))),
    }
}

fn session_closed() -> ServiceError {
    ServiceError::Validation(FieldErrors::single("session", "the session is closed"))
}

fn session_not_open() -> ServiceError {
    ServiceError::Validation(FieldErrors::single("session", "the session is not open"))
}

const QUEUE_ORDER: &str = "ORDER BY CASE status WHEN 'waiting' THEN 0 WHEN 'playing' THEN 1 ELSE 2 END,
    games_played, queued_at, id";

impl QueueSession {
    pub fn status(&self) -> Result<SessionStatus, ServiceError> {
        SessionStatus::from_str(&self.status)
    }

    pub fn can_manage(&self, user: &User) -> bool {
        user.is_superadmin() || user.id == self.owner_id
    }

    pub fn authorize(&self, user: &User) -> Result<(), ServiceError> {
        if !self.can_manage(user) {
            forbidden!("only the organizer of this session can manage it");
        }

        Ok(())
    }

    #[tracing::instrument(name = "QueueSession::create", skip(db))]
    pub async fn create(
        owner_id: i64,
        session: CreateSession,
        db: &db::Pool,
    ) -> Result<QueueSession, ServiceError> {
        let session = sqlx::query_as::<_, QueueSession>(
            "INSERT INTO queue_sessions
            (owner_id, name, session_date, start_time, end_time, status, players_per_team, fee_per_game, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *",
        )
        .bind(owner_id)
        .bind(session.name.trim())
        .bind(session.session_date)
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(SessionStatus::Scheduled.as_str())
        .bind(session.players_per_team)
        .bind(session.fee_per_game)
        .bind(session.notes)
        .fetch_one(db)
        .await?;

        Ok(session)
    }

    #[tracing::instrument(name = "QueueSession::find", skip(db))]
    pub async fn find(id: i64, db: &db::Pool) -> Result<QueueSession, ServiceError> {
        let session = sqlx::query_as::<_, QueueSession>("SELECT * FROM queue_sessions WHERE id = $1")
            .bind(id)
            .fetch_one(db)
            .await?;

        Ok(session)
    }

    /// Lock the session row for the rest of the transaction
    ///
    /// Everything that changes who is queued or playing in a session takes
    /// this lock first, before any court or entry, and looks at the status of
    /// the returned row.
    #[tracing::instrument(name = "QueueSession::lock", skip(tx))]
    pub async fn lock(
        id: i64,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<QueueSession, ServiceError> {
        let session = sqlx::query_as::<_, QueueSession>(
            "SELECT * FROM queue_sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        Ok(session)
    }

    #[tracing::instrument(name = "QueueSession::find_all", skip(db))]
    pub async fn find_all(
        filter: SessionFilter,
        db: &db::Pool,
    ) -> Result<Vec<QueueSession>, ServiceError> {
        let status = filter.status.map(|status| status.as_str());

        let sessions = sqlx::query_as::<_, QueueSession>(
            "SELECT * FROM queue_sessions
            WHERE ($1::date IS NULL OR session_date = $1)
            AND ($2::text IS NULL OR status = $2)
            ORDER BY session_date DESC, start_time, id",
        )
        .bind(filter.date)
        .bind(status)
        .fetch_all(db)
        .await?;

        Ok(sessions)
    }

    pub async fn detail(self, db: &db::Pool) -> Result<SessionDetail, ServiceError> {
        let entries = QueueEntry::find_for_session(self.id, db).await?;
        let matches = QueueMatch::find_for_session(self.id, db).await?;

        Ok(SessionDetail {
            session: self,
            entries,
            matches,
        })
    }

    /// Move the session to another status
    ///
    /// A session with matches on court can't be closed, closing it sends the
    /// people that are still waiting home.
    #[tracing::instrument(name = "QueueSession::change_status", skip(self, db), fields(session = self.id))]
    pub async fn change_status(
        &self,
        next: SessionStatus,
        db: &db::Pool,
    ) -> Result<QueueSession, ServiceError> {
        check_session_transition(self.status()?, next)?;

        let mut tx = db.begin().await?;

        let session = QueueSession::lock(self.id, &mut tx).await?;
        check_session_transition(session.status()?, next)?;

        if next == SessionStatus::Closed {
            let (active,) = sqlx::query_as::<_, (i64,)>(
                "SELECT COUNT(*) FROM queue_matches WHERE session_id = $1 AND status = 'active'",
            )
            .bind(self.id)
            .fetch_one(&mut tx)
            .await?;

            if active > 0 {
                return Err(ServiceError::Conflict(format!(
                    "the session still has {} active matches",
                    active
                )));
            }

            sqlx::query(
                "UPDATE queue_entries SET status = 'left', updated_at = NOW()
                WHERE session_id = $1 AND status = 'waiting'",
            )
            .bind(self.id)
            .execute(&mut tx)
            .await?;
        }

        let session = sqlx::query_as::<_, QueueSession>(
            "UPDATE queue_sessions SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(next.as_str())
        .bind(self.id)
        .fetch_one(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(session)
    }

    pub async fn count_open(db: &db::Pool) -> Result<i64, ServiceError> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM queue_sessions WHERE status = 'open'",
        )
        .fetch_one(db)
        .await?;

        Ok(count)
    }
}

impl QueueEntry {
    pub fn status(&self) -> Result<EntryStatus, ServiceError> {
        EntryStatus::from_str(&self.status)
    }

    /// Unknown levels count as beginners
    pub fn level(&self) -> PlayerLevel {
        PlayerLevel::from_str(&self.level).unwrap_or(PlayerLevel::Beginner)
    }

    pub fn is_waiting(&self) -> bool {
        self.status == EntryStatus::Waiting.as_str()
    }

    /// The entries of a session in queue order
    #[tracing::instrument(name = "QueueEntry::find_for_session", skip(db))]
    pub async fn find_for_session(
        session_id: i64,
        db: &db::Pool,
    ) -> Result<Vec<QueueEntry>, ServiceError> {
        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT * FROM queue_entries WHERE session_id = $1 {}",
            QUEUE_ORDER
        ))
        .bind(session_id)
        .fetch_all(db)
        .await?;

        Ok(entries)
    }

    #[tracing::instrument(name = "QueueEntry::find", skip(db))]
    pub async fn find(session_id: i64, id: i64, db: &db::Pool) -> Result<QueueEntry, ServiceError> {
        let entry = sqlx::query_as::<_, QueueEntry>(
            "SELECT * FROM queue_entries WHERE id = $1 AND session_id = $2",
        )
        .bind(id)
        .bind(session_id)
        .fetch_one(db)
        .await?;

        Ok(entry)
    }

    /// Add someone to the back of the queue
    #[tracing::instrument(name = "QueueEntry::join", skip(session, db), fields(session = session.id))]
    pub async fn join(
        session: &QueueSession,
        user_id: Option<i64>,
        guest_name: Option<String>,
        level: PlayerLevel,
        max_entries: i64,
        db: &db::Pool,
    ) -> Result<QueueEntry, ServiceError> {
        if session.status()? == SessionStatus::Closed {
            return Err(session_closed());
        }

        let mut tx = db.begin().await?;

        // serializes joins of the same session so the limit holds, and waits
        // for a close that is in progress
        let session = QueueSession::lock(session.id, &mut tx).await?;
        if session.status()? == SessionStatus::Closed {
            return Err(session_closed());
        }

        let (present,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM queue_entries WHERE session_id = $1 AND status <> 'left'",
        )
        .bind(session.id)
        .fetch_one(&mut tx)
        .await?;

        if present >= max_entries {
            return Err(ServiceError::Validation(FieldErrors::single(
                "session",
                &format!("the queue is full, at most {} players can join", max_entries),
            )));
        }

        let res = sqlx::query_as::<_, QueueEntry>(
            "INSERT INTO queue_entries (session_id, user_id, guest_name, level, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *",
        )
        .bind(session.id)
        .bind(user_id)
        .bind(guest_name.as_deref().map(str::trim))
        .bind(level.as_str())
        .bind(EntryStatus::Waiting.as_str())
        .fetch_one(&mut tx)
        .await;

        let entry = match res {
            Ok(entry) => entry,
            Err(err) => match ServiceError::from(err) {
                ServiceError::Conflict(_) => {
                    return Err(ServiceError::Conflict(String::from(
                        "this player is already in the queue",
                    )))
                }
                err => return Err(err),
            },
        };

        tx.commit().await?;

        Ok(entry)
    }

    /// Leave the queue, not possible in the middle of a match
    #[tracing::instrument(name = "QueueEntry::leave", skip(self, db), fields(entry = self.id))]
    pub async fn leave(&self, db: &db::Pool) -> Result<QueueEntry, ServiceError> {
        let entry = sqlx::query_as::<_, QueueEntry>(
            "UPDATE queue_entries SET status = 'left', updated_at = NOW()
            WHERE id = $1 AND status <> 'playing'
            RETURNING *",
        )
        .bind(self.id)
        .fetch_optional(db)
        .await?;

        entry.ok_or_else(|| {
            ServiceError::Conflict(String::from("a player can't leave during a match"))
        })
    }
}

impl QueueMatch {
    pub fn status(&self) -> Result<MatchStatus, ServiceError> {
        MatchStatus::from_str(&self.status)
    }

    #[tracing::instrument(name = "QueueMatch::find", skip(db))]
    pub async fn find(session_id: i64, id: i64, db: &db::Pool) -> Result<QueueMatch, ServiceError> {
        let game = sqlx::query_as::<_, QueueMatch>(
            "SELECT * FROM queue_matches WHERE id = $1 AND session_id = $2",
        )
        .bind(id)
        .bind(session_id)
        .fetch_one(db)
        .await?;

        Ok(game)
    }

    #[tracing::instrument(name = "QueueMatch::find_for_session", skip(db))]
    pub async fn find_for_session(
        session_id: i64,
        db: &db::Pool,
    ) -> Result<Vec<MatchDetail>, ServiceError> {
        let matches = sqlx::query_as::<_, QueueMatch>(
            "SELECT * FROM queue_matches WHERE session_id = $1 ORDER BY start_time DESC, id DESC",
        )
        .bind(session_id)
        .fetch_all(db)
        .await?;

        let players = sqlx::query_as::<_, QueueMatchPlayer>(
            "SELECT p.* FROM queue_match_players p
            INNER JOIN queue_matches m ON m.id = p.match_id
            WHERE m.session_id = $1
            ORDER BY p.team, p.id",
        )
        .bind(session_id)
        .fetch_all(db)
        .await?;

        Ok(matches
            .into_iter()
            .map(|game| {
                let players = players
                    .iter()
                    .filter(|player| player.match_id == game.id)
                    .cloned()
                    .collect();
                MatchDetail { game, players }
            })
            .collect())
    }

    /// Put two teams on a court
    ///
    /// The session, the court and the entries of the session stay locked until
    /// the match and its players are stored, a player can't end up in two
    /// matches and the session can't close underneath it.
    #[tracing::instrument(name = "QueueMatch::start", skip(session, request, db), fields(session = session.id))]
    pub async fn start(
        session: &QueueSession,
        request: CreateMatch,
        db: &db::Pool,
    ) -> Result<MatchDetail, ServiceError> {
        if session.status()? != SessionStatus::Open {
            return Err(session_not_open());
        }

        let mut tx = db.begin().await?;

        // same lock order as closing a session: session, court, entries
        let session = QueueSession::lock(session.id, &mut tx).await?;
        if session.status()? != SessionStatus::Open {
            return Err(session_not_open());
        }

        let court = Court::lock(request.court_id, &mut tx).await?;
        if !court.is_active {
            return Err(ServiceError::CourtNotAvailable);
        }

        let (busy,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM queue_matches WHERE court_id = $1 AND status = 'active'",
        )
        .bind(court.id)
        .fetch_one(&mut tx)
        .await?;
        if busy > 0 {
            return Err(ServiceError::CourtNotAvailable);
        }

        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT * FROM queue_entries WHERE session_id = $1 {} FOR UPDATE",
            QUEUE_ORDER
        ))
        .bind(session.id)
        .fetch_all(&mut tx)
        .await?;

        let players_per_team = session.players_per_team as usize;
        let teams = match (request.team_one, request.team_two) {
            (Some(team_one), Some(team_two)) => {
                assignment::check_teams(&entries, &team_one, &team_two, players_per_team)?
            }
            (None, None) => assignment::pick_teams(&entries, players_per_team)?,
            _ => {
                return Err(ServiceError::InvalidTeamAssignment(String::from(
                    "send both teams or leave both out",
                )))
            }
        };

        let game = sqlx::query_as::<_, QueueMatch>(
            "INSERT INTO queue_matches (session_id, court_id, status)
            VALUES ($1, $2, $3)
            RETURNING *",
        )
        .bind(session.id)
        .bind(court.id)
        .bind(MatchStatus::Active.as_str())
        .fetch_one(&mut tx)
        .await?;

        let players = QueueMatch::seat_players(game.id, &teams, &mut tx).await?;

        sqlx::query(
            "UPDATE queue_entries SET status = 'playing', updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(teams.entry_ids())
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(MatchDetail { game, players })
    }

    async fn seat_players(
        match_id: i64,
        teams: &Teams,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Vec<QueueMatchPlayer>, ServiceError> {
        let mut players = Vec::with_capacity(teams.one.len() + teams.two.len());

        for (team, entry_ids) in &[(1i16, &teams.one), (2i16, &teams.two)] {
            for entry_id in entry_ids.iter() {
                let player = sqlx::query_as::<_, QueueMatchPlayer>(
                    "INSERT INTO queue_match_players (match_id, entry_id, team)
                    VALUES ($1, $2, $3)
                    RETURNING *",
                )
                .bind(match_id)
                .bind(*entry_id)
                .bind(*team)
                .fetch_one(&mut *tx)
                .await?;

                players.push(player);
            }
        }

        Ok(players)
    }

    /// Record the result, the players go back into the queue behind everyone waiting
    #[tracing::instrument(name = "QueueMatch::complete", skip(self, result, db), fields(game = self.id))]
    pub async fn complete(
        &self,
        result: CompleteMatch,
        db: &db::Pool,
    ) -> Result<QueueMatch, ServiceError> {
        let mut tx = db.begin().await?;
        QueueSession::lock(self.session_id, &mut tx).await?;

        let game = sqlx::query_as::<_, QueueMatch>(
            "UPDATE queue_matches SET
            status = $1, end_time = NOW(), shuttlecocks_used = $2, winning_team = $3, updated_at = NOW()
            WHERE id = $4 AND status = 'active'
            RETURNING *",
        )
        .bind(MatchStatus::Completed.as_str())
        .bind(result.shuttlecocks_used)
        .bind(result.winning_team)
        .bind(self.id)
        .fetch_optional(&mut tx)
        .await?
        .ok_or(ServiceError::MatchNotActive)?;

        sqlx::query(
            "UPDATE queue_entries SET
            status = 'waiting', games_played = games_played + 1, queued_at = NOW(), updated_at = NOW()
            WHERE status = 'playing'
            AND id IN (SELECT entry_id FROM queue_match_players WHERE match_id = $1)",
        )
        .bind(self.id)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(game)
    }

    /// Call off a match, the players keep their spot in the queue
    #[tracing::instrument(name = "QueueMatch::cancel", skip(self, db), fields(game = self.id))]
    pub async fn cancel(&self, db: &db::Pool) -> Result<QueueMatch, ServiceError> {
        let mut tx = db.begin().await?;
        QueueSession::lock(self.session_id, &mut tx).await?;

        let game = sqlx::query_as::<_, QueueMatch>(
            "UPDATE queue_matches SET status = $1, end_time = NOW(), updated_at = NOW()
            WHERE id = $2 AND status = 'active'
            RETURNING *",
        )
        .bind(MatchStatus::Cancelled.as_str())
        .bind(self.id)
        .fetch_optional(&mut tx)
        .await?
        .ok_or(ServiceError::MatchNotActive)?;

        sqlx::query(
            "UPDATE queue_entries SET status = 'waiting', updated_at = NOW()
            WHERE status = 'playing'
            AND id IN (SELECT entry_id FROM queue_match_players WHERE match_id = $1)",
        )
        .bind(self.id)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(game)
    }

    pub async fn count_active(db: &db::Pool) -> Result<i64, ServiceError> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM queue_matches WHERE status = 'active'",
        )
        .fetch_one(db)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::users::{test_user, Role};
    use crate::validator::Validator;

    pub(crate) fn entry(id: i64, level: PlayerLevel, games_played: i32) -> QueueEntry {
        QueueEntry {
            id,
            session_id: 1,
            user_id: Some(id),
            guest_name: None,
            level: level.to_string(),
            status: EntryStatus::Waiting.to_string(),
            games_played,
            queued_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn session() -> CreateSession {
        CreateSession {
            name: String::from("Friday night doubles"),
            session_date: NaiveDate::from_ymd(2024, 6, 7),
            start_time: NaiveTime::from_hms(19, 0, 0),
            end_time: NaiveTime::from_hms(23, 0, 0),
            players_per_team: 2,
            fee_per_game: 200,
            notes: None,
        }
    }

    #[test]
    fn session_validation() {
        assert!(Validator::new(session()).validate().is_ok());

        let mut singles = session();
        singles.players_per_team = 1;
        assert!(Validator::new(singles).validate().is_ok());

        let mut triples = session();
        triples.players_per_team = 3;
        assert!(Validator::new(triples).validate().is_err());

        let mut backwards = session();
        backwards.end_time = NaiveTime::from_hms(18, 0, 0);
        assert!(Validator::new(backwards).validate().is_err());
    }

    #[test]
    fn session_transitions() {
        use SessionStatus::*;

        assert!(check_session_transition(Scheduled, Open).is_ok());
        assert!(check_session_transition(Scheduled, Closed).is_ok());
        assert!(check_session_transition(Open, Closed).is_ok());
        assert!(check_session_transition(Open, Scheduled).is_err());
        assert!(check_session_transition(Closed, Open).is_err());
        assert!(check_session_transition(Open, Open).is_err());
    }

    #[test]
    fn joining_on_behalf_of_someone() {
        let join: JoinQueue = serde_json::from_str(r#"{"level":"advanced"}"#).unwrap();
        assert!(!join.is_on_behalf());
        assert_eq!(join.level, PlayerLevel::Advanced);

        let guest: JoinQueue =
            serde_json::from_str(r#"{"level":"beginner","guest_name":"Uncle Bob"}"#).unwrap();
        assert!(guest.is_on_behalf());
        assert!(Validator::new(guest).validate().is_ok());

        let both: JoinQueue =
            serde_json::from_str(r#"{"level":"beginner","guest_name":"Bob","user_id":4}"#).unwrap();
        assert!(Validator::new(both).validate().is_err());
    }

    #[test]
    fn match_results() {
        let result: CompleteMatch = serde_json::from_str(r#"{"winning_team":2}"#).unwrap();
        assert_eq!(result.shuttlecocks_used, 0);
        assert!(Validator::new(result).validate().is_ok());

        let result: CompleteMatch =
            serde_json::from_str(r#"{"winning_team":3,"shuttlecocks_used":-1}"#).unwrap();
        assert!(Validator::new(result).validate().is_err());
    }

    #[test]
    fn entry_levels() {
        let mut entry = entry(1, PlayerLevel::Intermediate, 0);
        assert_eq!(entry.level(), PlayerLevel::Intermediate);
        assert!(entry.is_waiting());

        entry.level = String::from("pro");
        assert_eq!(entry.level(), PlayerLevel::Beginner);
    }

    #[test]
    fn session_managers() {
        let session = QueueSession {
            id: 1,
            owner_id: 7,
            name: String::from("Doubles"),
            session_date: NaiveDate::from_ymd(2024, 6, 7),
            start_time: NaiveTime::from_hms(19, 0, 0),
            end_time: NaiveTime::from_hms(23, 0, 0),
            status: SessionStatus::Open.to_string(),
            players_per_team: 2,
            fee_per_game: 0,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(session.can_manage(&test_user(7, Role::QueueMaster)));
        assert!(session.can_manage(&test_user(1, Role::Superadmin)));
        assert!(session.authorize(&test_user(8, Role::QueueMaster)).is_err());
        assert_eq!(session.status(), Ok(SessionStatus::Open));
    }

    mod with_database {
        use super::*;
        use crate::db::tests::{court, pool, user};
        use actix_rt::time::{delay_for, timeout};
        use std::time::Duration;

        async fn open_session(db: &db::Pool) -> QueueSession {
            let master = user(Role::QueueMaster, db).await;
            let session = QueueSession::create(master.id, session(), db).await.unwrap();

            session.change_status(SessionStatus::Open, db).await.unwrap()
        }

        async fn join(session: &QueueSession, max_entries: i64, db: &db::Pool) -> QueueEntry {
            let player = user(Role::Player, db).await;

            QueueEntry::join(session, Some(player.id), None, PlayerLevel::Intermediate, max_entries, db)
                .await
                .unwrap()
        }

        /// Close the session in a transaction that keeps the session row locked for a while
        async fn close_slowly(session_id: i64, db: &db::Pool) {
            let mut tx = db.begin().await.unwrap();
            QueueSession::lock(session_id, &mut tx).await.unwrap();

            sqlx::query("UPDATE queue_entries SET status = 'left' WHERE session_id = $1 AND status = 'waiting'")
                .bind(session_id)
                .execute(&mut tx)
                .await
                .unwrap();
            sqlx::query("UPDATE queue_sessions SET status = 'closed' WHERE id = $1")
                .bind(session_id)
                .execute(&mut tx)
                .await
                .unwrap();

            delay_for(Duration::from_millis(300)).await;
            tx.commit().await.unwrap();
        }

        #[actix_rt::test]
        async fn joining_a_session_that_is_being_closed() {
            let db = match pool(3).await {
                Some(db) => db,
                None => return,
            };
            let session = open_session(&db).await;
            let player = user(Role::Player, &db).await;

            let joining = async {
                delay_for(Duration::from_millis(50)).await;
                QueueEntry::join(&session, Some(player.id), None, PlayerLevel::Beginner, 10, &db).await
            };
            let (_, joined) = futures::join!(close_slowly(session.id, &db), joining);

            assert_eq!(joined.unwrap_err(), session_closed());
            let entries = QueueEntry::find_for_session(session.id, &db).await.unwrap();
            assert!(entries.iter().all(|entry| !entry.is_waiting()));
        }

        #[actix_rt::test]
        async fn starting_a_match_in_a_session_that_is_being_closed() {
            let db = match pool(3).await {
                Some(db) => db,
                None => return,
            };
            let session = open_session(&db).await;
            let court = court(session.owner_id, &db).await;
            for _ in 0..4 {
                join(&session, 10, &db).await;
            }

            let starting = async {
                delay_for(Duration::from_millis(50)).await;
                let request = CreateMatch {
                    court_id: court.id,
                    team_one: None,
                    team_two: None,
                };
                QueueMatch::start(&session, request, &db).await
            };
            let both = futures::future::join(close_slowly(session.id, &db), starting);
            let (_, started) = timeout(Duration::from_secs(10), both).await.unwrap();

            assert_eq!(started.unwrap_err(), session_not_open());
            assert_eq!(QueueMatch::find_for_session(session.id, &db).await.unwrap().len(), 0);
        }

        #[actix_rt::test]
        async fn closing_while_a_match_starts() {
            let db = match pool(4).await {
                Some(db) => db,
                None => return,
            };
            let session = open_session(&db).await;
            let court = court(session.owner_id, &db).await;
            for _ in 0..4 {
                join(&session, 10, &db).await;
            }

            let request = CreateMatch {
                court_id: court.id,
                team_one: None,
                team_two: None,
            };
            let both = futures::future::join(
                QueueMatch::start(&session, request, &db),
                session.change_status(SessionStatus::Closed, &db),
            );
            let (started, closed) = timeout(Duration::from_secs(10), both).await.unwrap();

            match (started, closed) {
                (Ok(_), Err(ServiceError::Conflict(_))) => (),
                (Err(err), Ok(_)) => assert_eq!(err, session_not_open()),
                other => panic!("one of start and close should win, got {:?}", other),
            }
        }

        #[actix_rt::test]
        async fn the_queue_has_a_limit_and_no_duplicates() {
            let db = match pool(2).await {
                Some(db) => db,
                None => return,
            };
            let session = open_session(&db).await;
            let first = join(&session, 2, &db).await;

            let again = QueueEntry::join(&session, first.user_id, None, PlayerLevel::Beginner, 2, &db).await;
            match again {
                Err(ServiceError::Conflict(_)) => (),
                other => panic!("expected a conflict, got {:?}", other),
            }

            join(&session, 2, &db).await;
            let guest = QueueEntry::join(
                &session,
                None,
                Some(String::from("Walk-in")),
                PlayerLevel::Beginner,
                2,
                &db,
            )
            .await;
            match guest {
                Err(ServiceError::Validation(errors)) => assert!(errors.has("session")),
                other => panic!("expected a full queue, got {:?}", other),
            }

            first.leave(&db).await.unwrap();
            assert!(QueueEntry::join(&session, first.user_id, None, PlayerLevel::Beginner, 2, &db)
                .await
                .is_ok());
        }

        #[actix_rt::test]
        async fn players_rejoin_the_queue_after_a_match() {
            let db = match pool(2).await {
                Some(db) => db,
                None => return,
            };
            let session = open_session(&db).await;
            let court = court(session.owner_id, &db).await;
            for _ in 0..6 {
                join(&session, 10, &db).await;
            }

            let request = CreateMatch {
                court_id: court.id,
                team_one: None,
                team_two: None,
            };
            let game = QueueMatch::start(&session, request, &db).await.unwrap();
            assert_eq!(game.players.len(), 4);

            let playing = QueueEntry::find_for_session(session.id, &db).await.unwrap();
            assert_eq!(playing.iter().filter(|entry| entry.status == "playing").count(), 4);

            let again = CreateMatch {
                court_id: court.id,
                team_one: None,
                team_two: None,
            };
            assert_eq!(
                QueueMatch::start(&session, again, &db).await.unwrap_err(),
                ServiceError::CourtNotAvailable
            );

            let result = CompleteMatch {
                winning_team: Some(1),
                shuttlecocks_used: 2,
            };
            game.game.complete(result, &db).await.unwrap();

            let entries = QueueEntry::find_for_session(session.id, &db).await.unwrap();
            assert!(entries.iter().all(QueueEntry::is_waiting));
            assert_eq!(entries.iter().filter(|entry| entry.games_played == 1).count(), 4);
            // the two that sat out are first in line now
            assert_eq!(entries[0].games_played, 0);
            assert_eq!(entries[1].games_played, 0);

            let result = CompleteMatch {
                winning_team: None,
                shuttlecocks_used: 0,
            };
            assert_eq!(
                game.game.complete(result, &db).await.unwrap_err(),
                ServiceError::MatchNotActive
            );
        }

        #[actix_rt::test]
        async fn cancelled_matches_keep_the_queue_order() {
            let db = match pool(2).await {
                Some(db) => db,
                None => return,
            };
            let session = open_session(&db).await;
            let court = court(session.owner_id, &db).await;
            for _ in 0..4 {
                join(&session, 10, &db).await;
            }
            let before = QueueEntry::find_for_session(session.id, &db).await.unwrap();

            let request = CreateMatch {
                court_id: court.id,
                team_one: None,
                team_two: None,
            };
            let game = QueueMatch::start(&session, request, &db).await.unwrap();
            game.game.cancel(&db).await.unwrap();

            let after = QueueEntry::find_for_session(session.id, &db).await.unwrap();
            assert!(after.iter().all(QueueEntry::is_waiting));
            for (before, after) in before.iter().zip(after.iter()) {
                assert_eq!(before.id, after.id);
                assert_eq!(before.queued_at, after.queued_at);
                assert_eq!(after.games_played, 0);
            }
        }
    }
}
