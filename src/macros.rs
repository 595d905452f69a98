/// Return the request with HTTP 403
#[macro_export]
macro_rules! forbidden {
    ($message:expr) => {
        return Err(crate::errors::ServiceError::Forbidden($message.to_string()));
    };
}

/// Return the request with HTTP 400
#[macro_export]
macro_rules! bad_request {
    ($message:expr) => {
        return Err(crate::errors::ServiceError::BadRequest(
            $message.to_string(),
        ));
    };
}

/// Return the request with HTTP 422 and a `booking_error` code
#[macro_export]
macro_rules! booking_error {
    ($message:expr) => {
        return Err(crate::errors::ServiceError::BookingError(
            $message.to_string(),
        ));
    };
}

/// Answer the request with HTTP 201 and the object as response body
#[macro_export]
macro_rules! http_created_json {
    ($object:expr) => {
        return Ok(actix_web::HttpResponse::Created().json($object));
    };
}

/// Answer the request with HTTP 200 and the object as response body
#[macro_export]
macro_rules! http_ok_json {
    ($object:expr) => {
        return Ok(actix_web::HttpResponse::Ok().json($object));
    };
}

/// Declares an enum that is stored as lower case text in the database and
/// serialized with the same text in json
#[macro_export]
macro_rules! text_enum {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::errors::ServiceError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => {
                        error!("unknown {} '{}'", stringify!($name), other);
                        Err(crate::errors::ServiceError::InternalServerError)
                    }
                }
            }
        }
    };
}
