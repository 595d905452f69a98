use std::collections::BTreeMap;
use std::convert::From;

use actix_web::error::QueryPayloadError;
use actix_web::http::StatusCode;
use actix_web::{error::ResponseError, HttpRequest, HttpResponse};
use derive_more::Display;

/// postgres error codes, see https://www.postgresql.org/docs/current/errcodes-appendix.html
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Field level validation messages, keyed by the name of the offending field
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        FieldErrors::default()
    }

    /// Build an error map holding a single message
    pub fn single(field: &str, message: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: &str) {
        self.0
            .entry(field.to_string())
            .or_insert_with(Vec::new)
            .push(message.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Ok when no field failed validation
    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.is_empty() {
            return Ok(());
        }
        Err(ServiceError::Validation(self))
    }
}

#[derive(Debug, Display, PartialEq)]
pub enum ServiceError {
    #[display(fmt = "Internal Server Error")]
    InternalServerError,

    #[display(fmt = "BadRequest: {}", _0)]
    BadRequest(String),

    #[display(fmt = "The given data was invalid.")]
    Validation(FieldErrors),

    #[display(fmt = "Unauthenticated.")]
    Unauthorized,

    #[display(fmt = "Forbidden: {}", _0)]
    Forbidden(String),

    #[display(fmt = "Not Found")]
    NotFound,

    #[display(fmt = "Conflict: {}", _0)]
    Conflict(String),

    #[display(fmt = "The court is closed at the requested time.")]
    CourtClosed,

    #[display(fmt = "The requested time slot is already booked.")]
    TimeSlotUnavailable,

    #[display(fmt = "The court is not available for booking.")]
    CourtNotAvailable,

    #[display(fmt = "{}", _0)]
    BookingError(String),

    #[display(fmt = "The match is not active.")]
    MatchNotActive,

    #[display(fmt = "Invalid team assignment: {}", _0)]
    InvalidTeamAssignment(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: String,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a FieldErrors>,
}

impl ServiceError {
    /// machine readable error code, sent along with every error response
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InternalServerError => "internal_error",
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::Validation(_) => "validation_failed",
            ServiceError::Unauthorized => "unauthenticated",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::NotFound => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::CourtClosed => "court_closed",
            ServiceError::TimeSlotUnavailable => "time_slot_unavailable",
            ServiceError::CourtNotAvailable => "court_not_available",
            ServiceError::BookingError(_) => "booking_error",
            ServiceError::MatchNotActive => "match_not_active",
            ServiceError::InvalidTeamAssignment(_) => "invalid_team_assignment",
        }
    }

    fn message(&self) -> String {
        match self {
            ServiceError::InternalServerError => {
                String::from("Internal Server Error, Please try later")
            }
            ServiceError::BadRequest(message)
            | ServiceError::Forbidden(message)
            | ServiceError::Conflict(message)
            | ServiceError::BookingError(message)
            | ServiceError::InvalidTeamAssignment(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

// impl ResponseError trait allows to convert our errors into http responses with appropriate data
impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Validation(_)
            | ServiceError::CourtClosed
            | ServiceError::TimeSlotUnavailable
            | ServiceError::CourtNotAvailable
            | ServiceError::BookingError(_)
            | ServiceError::MatchNotActive
            | ServiceError::InvalidTeamAssignment(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let errors = match self {
            ServiceError::Validation(errors) => Some(errors),
            _ => None,
        };

        HttpResponse::build(self.status_code()).json(ErrorBody {
            message: self.message(),
            error: self.code(),
            errors,
        })
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(error: sqlx::Error) -> ServiceError {
        match &error {
            sqlx::Error::RowNotFound => ServiceError::NotFound,
            sqlx::Error::Database(err) => match err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => ServiceError::Conflict(err.message().to_string()),
                Some(FOREIGN_KEY_VIOLATION) => {
                    debug!("foreign key violation: {}", err.message());
                    ServiceError::Validation(FieldErrors::single(
                        "id",
                        "a referenced record does not exist",
                    ))
                }
                _ => {
                    error!("db error: {}", err);
                    ServiceError::InternalServerError
                }
            },
            _ => {
                error!("db error: {}", error);
                ServiceError::InternalServerError
            }
        }
    }
}

impl From<argon2::Error> for ServiceError {
    fn from(error: argon2::Error) -> ServiceError {
        error!("argon2 error: {}", error);
        ServiceError::InternalServerError
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(error: redis::RedisError) -> ServiceError {
        error!("redis error: {}", error);
        ServiceError::InternalServerError
    }
}

impl From<actix::MailboxError> for ServiceError {
    fn from(error: actix::MailboxError) -> ServiceError {
        error!("actor mailbox error: {}", error);
        ServiceError::InternalServerError
    }
}

impl<E: Into<ServiceError> + std::fmt::Debug> From<actix_threadpool::BlockingError<E>>
    for ServiceError
{
    fn from(error: actix_threadpool::BlockingError<E>) -> ServiceError {
        match error {
            actix_threadpool::BlockingError::Error(err) => err.into(),
            actix_threadpool::BlockingError::Canceled => {
                error!("actix threadpool job was canceled");
                ServiceError::InternalServerError
            }
        }
    }
}

/// Turn a failed json body into an error on the field that caused it
///
/// Syntax errors are a bad request, a body that parses but doesn't fit is a
/// validation error keyed on the path of the field.
pub fn body_error(error: serde_path_to_error::Error<serde_json::Error>) -> ServiceError {
    let path = error.path().to_string();
    let error = error.into_inner();

    if !error.is_data() {
        return ServiceError::BadRequest(format!("malformed json body: {}", error));
    }

    let message = without_position(&error.to_string());
    let field = match (path.as_str(), named_field(&message)) {
        (".", Some(field)) => field.to_string(),
        (".", None) => String::from("body"),
        (path, Some(field)) => format!("{}.{}", path, field),
        (path, None) => path.to_string(),
    };

    ServiceError::Validation(FieldErrors::single(&field, &message))
}

/// Used by the query extractor so malformed query strings fail validation on the offending parameter
pub fn query_error_handler(error: QueryPayloadError, _: &HttpRequest) -> actix_web::Error {
    let QueryPayloadError::Deserialize(error) = error;
    let message = error.to_string();
    let field = named_field(&message).unwrap_or("query");

    ServiceError::Validation(FieldErrors::single(field, &message)).into()
}

/// serde names a missing or unknown field between backticks
fn named_field(message: &str) -> Option<&str> {
    if !message.starts_with("missing field") && !message.starts_with("unknown field") {
        return None;
    }
    message.split('`').nth(1)
}

fn without_position(message: &str) -> String {
    match message.rfind(" at line ") {
        Some(index) => message[..index].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::dev::{Body, ResponseBody};

    fn body_json(response: &HttpResponse) -> serde_json::Value {
        match response.body() {
            ResponseBody::Body(Body::Bytes(bytes)) => serde_json::from_slice(bytes).unwrap(),
            _ => panic!("expected a byte body"),
        }
    }

    #[test]
    fn domain_errors_are_unprocessable() {
        let errors = vec![
            ServiceError::CourtClosed,
            ServiceError::TimeSlotUnavailable,
            ServiceError::CourtNotAvailable,
            ServiceError::BookingError("too late".to_string()),
            ServiceError::MatchNotActive,
            ServiceError::InvalidTeamAssignment("duplicate player".to_string()),
        ];

        for error in errors {
            assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    #[test]
    fn error_body_carries_machine_readable_code() {
        let response = ServiceError::CourtClosed.error_response();
        let body = body_json(&response);

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "court_closed");
        assert_eq!(body["message"], "The court is closed at the requested time.");
        assert!(body.get("errors").is_none());
    }

    #[test]
    fn validation_errors_are_listed_per_field() {
        let mut errors = FieldErrors::new();
        errors.add("email", "the email has already been taken");
        errors.add("password", "the password is too short");
        errors.add("password", "the password confirmation does not match");

        let response = ServiceError::Validation(errors).error_response();
        let body = body_json(&response);

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["errors"]["password"].as_array().unwrap().len(), 2);
        assert_eq!(body["errors"]["email"][0], "the email has already been taken");
    }

    #[test]
    fn auth_errors_map_to_their_status() {
        assert_eq!(
            ServiceError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::Forbidden("nope".to_string()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ServiceError::NotFound.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn missing_rows_are_not_found() {
        assert_eq!(
            ServiceError::from(sqlx::Error::RowNotFound),
            ServiceError::NotFound
        );
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Search {
        court_id: i64,
        date: chrono::NaiveDate,
    }

    fn body_error_of(body: &str) -> ServiceError {
        let mut deserializer = serde_json::Deserializer::from_slice(body.as_bytes());
        let result: Result<Search, _> = serde_path_to_error::deserialize(&mut deserializer);
        body_error(result.unwrap_err())
    }

    #[test]
    fn body_errors_name_the_field() {
        let error = body_error_of(r#"{"court_id": 1}"#);
        assert_eq!(
            error,
            ServiceError::Validation(FieldErrors::single("date", "missing field `date`"))
        );

        match body_error_of(r#"{"court_id": "one", "date": "2026-10-16"}"#) {
            ServiceError::Validation(errors) => assert!(errors.has("court_id")),
            other => panic!("expected a validation error, got {:?}", other),
        }

        match body_error_of(r#"{"court_id": 1, "date": "yesterday"}"#) {
            ServiceError::Validation(errors) => assert!(errors.has("date")),
            other => panic!("expected a validation error, got {:?}", other),
        }

        match body_error_of(r#""court one""#) {
            ServiceError::Validation(errors) => assert!(errors.has("body")),
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn broken_bodies_are_bad_requests() {
        match body_error_of(r#"{"court_id": 1,"#) {
            ServiceError::BadRequest(message) => assert!(message.starts_with("malformed json body")),
            other => panic!("expected a bad request, got {:?}", other),
        }
    }

    #[test]
    fn serde_messages_lose_their_position() {
        assert_eq!(
            without_position("missing field `date` at line 1 column 15"),
            "missing field `date`"
        );
        assert_eq!(named_field("missing field `date`"), Some("date"));
        assert_eq!(named_field("unknown variant `lost`, expected `pending`"), None);
    }

    #[actix_rt::test]
    async fn bad_query_strings_fail_validation() {
        use actix_web::{test, web, App};

        let mut app = test::init_service(
            App::new()
                .app_data(web::QueryConfig::default().error_handler(query_error_handler))
                .route(
                    "/search",
                    web::get().to(|_: web::Query<Search>| async { HttpResponse::Ok().finish() }),
                ),
        )
        .await;

        let req = test::TestRequest::get().uri("/search?court_id=1").to_request();
        let res = test::call_service(&mut app, req).await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["errors"]["date"][0], "missing field `date`");

        let req = test::TestRequest::get()
            .uri("/search?court_id=1&date=2026-10-16")
            .to_request();
        let res = test::call_service(&mut app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[test]
    fn empty_field_errors_pass() {
        assert!(FieldErrors::new().into_result().is_ok());
        assert!(FieldErrors::single("name", "required").into_result().is_err());
    }
}
