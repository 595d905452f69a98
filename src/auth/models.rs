use regex::Regex;

use crate::errors::{FieldErrors, ServiceError};
use crate::users::{NewUser, Role, User};
use crate::validator::check_name;

const MIN_PASSWORD_LENGTH: usize = 8;
/// size of `access_tokens.name`
const MAX_DEVICE_NAME_LENGTH: usize = 100;

lazy_static! {
    static ref PHONE_PATTERN: Regex =
        Regex::new(r"^\+?[0-9 ()-]{6,30}$").expect("invalid phone regex");
}

fn check_password(errors: &mut FieldErrors, password: &str, confirmation: &str) {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.add(
            "password",
            "the password should at least be 8 characters long",
        );
    }

    if password != confirmation {
        errors.add("password", "the password confirmation does not match");
    }
}

fn check_email(errors: &mut FieldErrors, email: &str) {
    if !validator::validate_email(email.trim()) {
        errors.add("email", "the email must be a valid email address");
    }
}

fn check_device_name(errors: &mut FieldErrors, device_name: &str) {
    if device_name.trim().is_empty() {
        errors.add("device_name", "the device name field is required");
    } else if device_name.chars().count() > MAX_DEVICE_NAME_LENGTH {
        errors.add(
            "device_name",
            "the device name may not be longer than 100 characters",
        );
    }
}

fn default_device_name() -> String {
    String::from("api")
}

/// **POST /api/register**
///
/// ``` shell
/// curl --location --request POST 'localhost:8080/api/register' \
///     --header 'Content-Type: application/json' \
///     --data-raw '{
///         "name": "Lee Chong Wei",
///         "email": "lcw@example.com",
///         "password": "hunter2boogaloo",
///         "password_confirmation": "hunter2boogaloo",
///         "role": "player"
///     }'
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
    pub phone: Option<String>,
    pub role: Option<Role>,
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

impl Registration {
    pub fn into_new_user(self, password_hash: String) -> NewUser {
        NewUser {
            name: self.name,
            email: self.email,
            password: password_hash,
            role: self.role.unwrap_or_default(),
            phone: self.phone.filter(|phone| !phone.trim().is_empty()),
        }
    }
}

impl crate::validator::Validate for Registration {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();

        check_name(&mut errors, "name", &self.name, 100);
        check_email(&mut errors, &self.email);
        check_password(&mut errors, &self.password, &self.password_confirmation);
        check_device_name(&mut errors, &self.device_name);

        if let Some(Role::Superadmin) = self.role {
            errors.add("role", "the selected role is invalid");
        }

        if let Some(phone) = self.phone.as_ref().filter(|phone| !phone.trim().is_empty()) {
            if !PHONE_PATTERN.is_match(phone.trim()) {
                errors.add("phone", "the phone number format is invalid");
            }
        }

        errors.into_result()
    }
}

/// **POST /api/login**
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

impl crate::validator::Validate for Credentials {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        check_device_name(&mut errors, &self.device_name);
        errors.into_result()
    }
}

/// Returned after registering or logging in
///
/// The token has to be sent along as `Authorization: Bearer <token>`
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

/// **PUT /api/me/password**
#[derive(Debug, Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub password: String,
    pub password_confirmation: String,
}

impl crate::validator::Validate for PasswordChange {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();

        if self.current_password == self.password {
            errors.add(
                "password",
                "the new password can't be the same as the old password",
            );
        }

        check_password(&mut errors, &self.password, &self.password_confirmation);

        errors.into_result()
    }
}

/// **POST /api/forgot-password**
#[derive(Debug, Deserialize)]
pub struct ForgotPassword {
    pub email: String,
}

/// **POST /api/reset-password**
#[derive(Debug, Deserialize)]
pub struct PasswordReset {
    pub email: String,
    pub token: String,
    pub password: String,
    pub password_confirmation: String,
}

impl crate::validator::Validate for PasswordReset {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();

        check_email(&mut errors, &self.email);
        check_password(&mut errors, &self.password, &self.password_confirmation);

        if self.token.trim().is_empty() {
            errors.add("token", "the token field is required");
        }

        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Validator;

    fn registration() -> Registration {
        Registration {
            name: String::from("Taufik Hidayat"),
            email: String::from("taufik@example.com"),
            password: String::from("hunter2boogaloo"),
            password_confirmation: String::from("hunter2boogaloo"),
            phone: Some(String::from("+62 812-3456-789")),
            role: None,
            device_name: default_device_name(),
        }
    }

    fn field_errors(result: Result<Registration, ServiceError>) -> FieldErrors {
        match result {
            Err(ServiceError::Validation(errors)) => errors,
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn valid_registration() {
        let registration = Validator::new(registration()).validate().unwrap();
        let user = registration.into_new_user(String::from("hash"));

        assert_eq!(user.role, Role::Player);
        assert_eq!(user.password, "hash");
    }

    #[test]
    fn invalid_email() {
        let mut registration = registration();
        registration.email = String::from("not-an-email");

        let errors = field_errors(Validator::new(registration).validate());
        assert!(errors.has("email"));
    }

    #[test]
    fn password_rules() {
        let mut registration = registration();
        registration.password = String::from("short");
        registration.password_confirmation = String::from("shorter");

        let errors = field_errors(Validator::new(registration).validate());
        assert!(errors.has("password"));
        assert!(!errors.has("email"));
    }

    #[test]
    fn superadmins_cannot_register() {
        let mut registration = registration();
        registration.role = Some(Role::Superadmin);

        let errors = field_errors(Validator::new(registration).validate());
        assert!(errors.has("role"));
    }

    #[test]
    fn owners_and_queue_masters_can_register() {
        for role in &[Role::Owner, Role::QueueMaster] {
            let mut registration = registration();
            registration.role = Some(*role);

            assert!(Validator::new(registration).validate().is_ok());
        }
    }

    #[test]
    fn phone_numbers() {
        let mut registration = registration();
        registration.phone = Some(String::from("call me maybe"));
        let errors = field_errors(Validator::new(registration).validate());
        assert!(errors.has("phone"));

        let mut registration = self::registration();
        registration.phone = Some(String::from("  "));
        let registration = Validator::new(registration).validate().unwrap();
        assert!(registration.into_new_user(String::new()).phone.is_none());
    }

    #[test]
    fn device_names_fit_the_token_table() {
        let mut registration = registration();
        registration.device_name = "x".repeat(MAX_DEVICE_NAME_LENGTH + 1);
        let errors = field_errors(Validator::new(registration).validate());
        assert!(errors.has("device_name"));

        let mut registration = self::registration();
        registration.device_name = "é".repeat(MAX_DEVICE_NAME_LENGTH);
        assert!(Validator::new(registration).validate().is_ok());

        let credentials = |device_name: &str| Credentials {
            email: String::from("taufik@example.com"),
            password: String::from("hunter2boogaloo"),
            device_name: device_name.to_string(),
        };
        assert!(Validator::new(credentials("Pixel 7 (work)")).validate().is_ok());
        assert!(Validator::new(credentials(" ")).validate().is_err());
        assert!(Validator::new(credentials(&"x".repeat(101))).validate().is_err());
    }

    #[test]
    fn login_without_device_name_uses_the_default() {
        let credentials = Validator::<Credentials>::from_slice(
            br#"{"email":"taufik@example.com","password":"hunter2boogaloo"}"#,
        )
        .unwrap()
        .validate()
        .unwrap();

        assert_eq!(credentials.device_name, "api");
    }

    #[test]
    fn password_change_needs_a_new_password() {
        let change = PasswordChange {
            current_password: String::from("hunter2boogaloo"),
            password: String::from("hunter2boogaloo"),
            password_confirmation: String::from("hunter2boogaloo"),
        };

        assert!(Validator::new(change).validate().is_err());
    }
}
