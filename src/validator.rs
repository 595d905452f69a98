use actix_web::dev::Payload;
use actix_web::web::Bytes;
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use futures::future::{FutureExt, LocalBoxFuture};
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::errors::{self, FieldErrors, ServiceError};

/// Wraps a request body so it can only be unwrapped after validation
///
/// Used as the json body extractor: a body that isn't json is a bad request,
/// a body that doesn't fit `T` fails validation on the offending field.
#[derive(Deserialize, Debug)]
#[serde(transparent)]
pub struct Validator<T>(T);

pub trait Validate {
    fn validate(&self) -> Result<(), ServiceError>;
}

impl<T> Validator<T> {
    #[allow(dead_code)]
    pub fn new(i: T) -> Validator<T> {
        Validator::<T>(i)
    }

    /// Unwrap without validating, for bodies whose rules are checked by the caller
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Validator<T>
where
    T: Validate,
{
    pub fn validate(self) -> Result<T, ServiceError> {
        self.0.validate()?;
        Ok(self.0)
    }
}

impl<T: DeserializeOwned> Validator<T> {
    pub fn from_slice(body: &[u8]) -> Result<Validator<T>, ServiceError> {
        let mut deserializer = serde_json::Deserializer::from_slice(body);

        let inner = serde_path_to_error::deserialize(&mut deserializer).map_err(errors::body_error)?;
        deserializer
            .end()
            .map_err(|err| ServiceError::BadRequest(format!("malformed json body: {}", err)))?;

        Ok(Validator(inner))
    }
}

impl<T: DeserializeOwned + 'static> FromRequest for Validator<T> {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;
    type Config = ();

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let is_json = req.content_type().ends_with("json");
        // the size limit comes from the PayloadConfig of the app
        let body = Bytes::from_request(req, payload);

        async move {
            if !is_json {
                return Err(actix_web::Error::from(ServiceError::BadRequest(String::from(
                    "expected a body with content type application/json",
                ))));
            }

            let body = body.await?;
            Validator::<T>::from_slice(&body).map_err(actix_web::Error::from)
        }
        .boxed_local()
    }
}

lazy_static! {
    static ref NAME_PATTERN: Regex =
        Regex::new(r"^[\p{L}0-9_'.&-]+( [\p{L}0-9_'.&-]+)*$").expect("invalid name regex");
}

/// Checks a display name: not blank, at most `max` characters and no markup
pub fn check_name(errors: &mut FieldErrors, field: &str, value: &str, max: usize) {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        errors.add(field, &format!("the {} field is required", field));
        return;
    }

    if trimmed.chars().count() > max {
        errors.add(
            field,
            &format!("the {} may not be greater than {} characters", field, max),
        );
        return;
    }

    if !NAME_PATTERN.is_match(trimmed) {
        errors.add(
            field,
            &format!(
                "the {} can only contain letters, numbers, spaces and -_'.&",
                field
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Validate for bool {
        fn validate(&self) -> Result<(), ServiceError> {
            if *self {
                return Ok(());
            }
            Err(ServiceError::BadRequest("invalid input".to_string()))
        }
    }

    #[test]
    fn invalid_value() {
        let invalid = Validator::new(false);

        assert!(invalid.validate().is_err());
    }

    #[test]
    fn valid_value() {
        let valid = Validator::new(true);

        assert!(valid.validate().is_ok());
    }

    #[test]
    fn deserializes_transparently() {
        let valid: Validator<bool> = serde_json::from_str("true").unwrap();

        assert!(valid.validate().unwrap());
    }

    #[derive(Debug, Deserialize, Serialize)]
    struct Slot {
        #[serde(with = "crate::timefmt")]
        start_time: chrono::NaiveTime,
        status: crate::bookings::BookingStatus,
    }

    fn field_errors(body: &str) -> FieldErrors {
        match Validator::<Slot>::from_slice(body.as_bytes()) {
            Err(ServiceError::Validation(errors)) => errors,
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn body_errors_point_at_the_field() {
        assert!(field_errors(r#"{"status":"pending"}"#).has("start_time"));
        assert!(field_errors(r#"{"start_time":"25:00","status":"pending"}"#).has("start_time"));
        assert!(field_errors(r#"{"start_time":"18:00","status":"lost"}"#).has("status"));
        assert!(field_errors(r#"{"start_time":18,"status":"pending"}"#).has("start_time"));
    }

    #[test]
    fn broken_json_is_a_bad_request() {
        for body in &[r#"{"start_time":"#, "", r#"{"start_time":"18:00","status":"pending"} {}"#] {
            match Validator::<Slot>::from_slice(body.as_bytes()) {
                Err(ServiceError::BadRequest(_)) => (),
                other => panic!("expected a bad request for {:?}, got {:?}", body, other),
            }
        }

        assert!(Validator::<Slot>::from_slice(br#"{"start_time":"18:00:00","status":"pending"}"#).is_ok());
    }

    #[actix_rt::test]
    async fn extracts_json_bodies() {
        use actix_web::http::StatusCode;
        use actix_web::{test, web, App, HttpResponse};

        let mut app = test::init_service(App::new().route(
            "/slots",
            web::post().to(|slot: Validator<Slot>| async move {
                HttpResponse::Ok().json(slot.into_inner())
            }),
        ))
        .await;

        let req = test::TestRequest::post()
            .uri("/slots")
            .set_json(&serde_json::json!({"start_time": "18:00", "status": "pending"}))
            .to_request();
        let slot: serde_json::Value = test::read_response_json(&mut app, req).await;
        assert_eq!(slot["start_time"], "18:00");

        let req = test::TestRequest::post()
            .uri("/slots")
            .set_json(&serde_json::json!({"start_time": "18:00", "status": "lost"}))
            .to_request();
        let res = test::call_service(&mut app, req).await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let req = test::TestRequest::post()
            .uri("/slots")
            .set_payload(r#"{"start_time": "18:00""#)
            .header("content-type", "application/json")
            .to_request();
        let res = test::call_service(&mut app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/slots")
            .set_payload("start_time=18:00")
            .to_request();
        let res = test::call_service(&mut app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn names() {
        let mut errors = FieldErrors::new();
        check_name(&mut errors, "name", "Court 1", 100);
        check_name(&mut errors, "name", "Café de l'Été", 100);
        check_name(&mut errors, "name", "Smash & Drop", 100);
        assert!(errors.is_empty());

        check_name(&mut errors, "blank", "   ", 100);
        check_name(&mut errors, "markup", "<script>", 100);
        check_name(&mut errors, "long", "abcdef", 5);
        assert!(errors.has("blank"));
        assert!(errors.has("markup"));
        assert!(errors.has("long"));
    }
}
