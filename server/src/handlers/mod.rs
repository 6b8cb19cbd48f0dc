pub mod auth;
pub mod health;
pub mod users;

use actix_web::web;

use crate::error::AuthServerError;

pub use auth::{sign_out, token};
pub use health::healthz;
pub use users::{create_user, current_user};

/// Body extraction failures (bad JSON, missing field, unknown grant type)
/// surface as 400 with the usual `{error}` body.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        AuthServerError::Validation(format!("invalid request body: {err}")).into()
    })
}
