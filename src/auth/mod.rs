mod models;
mod policy;
pub mod routes;
mod tokens;

use actix_identity::Identity;

use crate::db;
use crate::errors::ServiceError;
use crate::users::{Role, User};

pub use policy::BearerTokenPolicy;
pub use tokens::AccessToken;

/// get the user behind the bearer token of the current request
/// returns Unauthorized when no valid token is present
pub async fn get_user(id: &Identity, db: &db::Pool) -> Result<User, ServiceError> {
    match id.identity() {
        Some(token) => AccessToken::find_user(&token, db).await,
        None => Err(ServiceError::Unauthorized),
    }
}

/// returns Forbidden unless the user has one of the roles, superadmins always pass
pub fn require_role(user: &User, roles: &[Role]) -> Result<(), ServiceError> {
    if user.is_superadmin() || user.has_role(roles) {
        return Ok(());
    }

    forbidden!("insufficient permissions");
}

pub fn verify_superadmin(user: &User) -> Result<(), ServiceError> {
    if !user.is_superadmin() {
        forbidden!("insufficient permissions");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::test_user;

    #[test]
    fn superadmins_pass_every_role_check() {
        let admin = test_user(1, Role::Superadmin);

        assert!(require_role(&admin, &[Role::Owner]).is_ok());
        assert!(require_role(&admin, &[]).is_ok());
        assert!(verify_superadmin(&admin).is_ok());
    }

    #[test]
    fn roles_are_checked() {
        let player = test_user(2, Role::Player);
        let queue_master = test_user(3, Role::QueueMaster);

        assert!(require_role(&player, &[Role::Player]).is_ok());
        assert_eq!(
            require_role(&player, &[Role::Owner, Role::QueueMaster]),
            Err(ServiceError::Forbidden("insufficient permissions".to_string()))
        );
        assert!(require_role(&queue_master, &[Role::Owner, Role::QueueMaster]).is_ok());
        assert!(verify_superadmin(&queue_master).is_err());
    }
}
