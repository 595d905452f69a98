mod models;
pub mod routes;

pub use models::{NewUser, Role, RoleChange, User, UserFilter};

#[cfg(test)]
pub(crate) use models::tests::user as test_user;
