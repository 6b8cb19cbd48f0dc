use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    http::header::AUTHORIZATION,
    middleware::Next,
    web, HttpMessage,
};
use common::{Role, UserId};

use super::reject;
use crate::auth_token::{now_secs, TokenKind, TokenSigner};
use crate::error::AuthServerError;

/// Identity of the caller, available to protected handlers via
/// `web::ReqData<AuthenticatedUser>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub role: Role,
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Validates the bearer access token statelessly; the store is not consulted.
pub async fn session_middleware<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, actix_web::Error> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned);
    let Some(token) = token else {
        return Ok(reject(req, AuthServerError::Unauthorized));
    };

    let signer = req.app_data::<web::Data<TokenSigner>>().cloned();
    let Some(signer) = signer else {
        let err = AuthServerError::Internal("token signer not registered".into());
        return Ok(reject(req, err));
    };

    let claims = match signer.validate(&token, now_secs()) {
        Ok(claims) => claims,
        Err(err) => {
            log::warn!("Rejected bearer token: {}", err);
            return Ok(reject(req, AuthServerError::Unauthorized));
        }
    };

    if claims.token_use != TokenKind::Access {
        log::warn!("Bearer token for user {} is not an access token", claims.user_id);
        return Ok(reject(req, AuthServerError::Unauthorized));
    }

    req.extensions_mut().insert(AuthenticatedUser {
        id: claims.user_id,
        role: claims.role,
    });

    next.call(req).await.map(ServiceResponse::map_into_left_body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer  abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
