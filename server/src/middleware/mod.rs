pub mod api_key;
pub mod auth;

use actix_web::body::EitherBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};

use crate::error::AuthServerError;

pub use api_key::{api_key_middleware, ApiKeyGate, API_KEY_HEADER};
pub use auth::{bearer_token, session_middleware, AuthenticatedUser};

/// Ends the chain with the error's JSON response instead of an `Err`, so the
/// rejection renders the same way under the test harness and the server.
fn reject<B>(req: ServiceRequest, err: AuthServerError) -> ServiceResponse<EitherBody<B>> {
    req.error_response(err).map_into_right_body()
}
