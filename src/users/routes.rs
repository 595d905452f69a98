use actix_identity::Identity;
use actix_web::web::{Data, Path, Query};
use actix_web::{get, patch, web};

use crate::auth;
use crate::server::{Response, State};
use crate::users::{Role, RoleChange, User, UserFilter};
use crate::validator::Validator;

#[get("/admin/users")]
async fn index(filter: Query<UserFilter>, id: Identity, state: Data<State>) -> Response {
    let admin = auth::get_user(&id, &state.db).await?;
    auth::verify_superadmin(&admin)?;

    let users = User::find_all(filter.into_inner(), &state.db).await?;

    http_ok_json!(users);
}

#[patch("/admin/users/{user_id}/role")]
async fn change_role(
    user_id: Path<i64>,
    change: Validator<RoleChange>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let admin = auth::get_user(&id, &state.db).await?;
    auth::verify_superadmin(&admin)?;

    let change = change.into_inner();
    if admin.id == *user_id && change.role != Role::Superadmin {
        forbidden!("you can't take away your own superadmin role");
    }

    let user = User::update_role(*user_id, change.role, &state.db).await?;
    info!("user {} gave user {} the {} role", admin.id, user.id, user.role);

    http_ok_json!(user);
}

pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(index);
    cfg.service(change_role);
}
