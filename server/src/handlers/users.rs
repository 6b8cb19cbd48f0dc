use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;

use crate::error::{AuthServerError, Result};
use crate::middleware::AuthenticatedUser;
use crate::users::{UserService, UserServiceError};

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
}

#[post("/users")]
pub async fn create_user(
    req: web::Json<CreateUserRequest>,
    users: web::Data<dyn UserService>,
) -> Result<HttpResponse> {
    let user = users.create(&req.email).await.map_err(|err| match err {
        UserServiceError::InvalidEmail(_) | UserServiceError::DuplicateEmail(_) => {
            AuthServerError::Validation(err.to_string())
        }
        other => other.into(),
    })?;

    log::info!("Created user {} ({})", user.id, user.email);
    Ok(HttpResponse::Created().json(user))
}

#[get(
    "/users",
    wrap = "actix_web::middleware::from_fn(crate::middleware::session_middleware)"
)]
pub async fn current_user(
    caller: web::ReqData<AuthenticatedUser>,
    users: web::Data<dyn UserService>,
) -> Result<HttpResponse> {
    let user = users
        .get_by_id(&caller.id)
        .await?
        .ok_or(AuthServerError::Unauthorized)?;

    Ok(HttpResponse::Ok().json(user))
}
