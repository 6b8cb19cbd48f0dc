use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web,
};
use base64::{engine::general_purpose::STANDARD, Engine};

use super::reject;
use crate::error::AuthServerError;

pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Clients send the configured public key base64-encoded in `X-API-KEY`.
#[derive(Debug, Clone)]
pub struct ApiKeyGate {
    expected: String,
}

impl ApiKeyGate {
    pub fn new(public_key: &str) -> Self {
        Self {
            expected: STANDARD.encode(public_key.as_bytes()),
        }
    }

    pub fn check(&self, presented: Option<&str>) -> bool {
        match presented {
            Some(value) => constant_time_eq(value.trim().as_bytes(), self.expected.as_bytes()),
            None => false,
        }
    }

    /// Header value a client should send.
    pub fn header_value(&self) -> &str {
        &self.expected
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn api_key_middleware<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, actix_web::Error> {
    let gate = req.app_data::<web::Data<ApiKeyGate>>().cloned();
    let Some(gate) = gate else {
        let err = AuthServerError::Internal("api key gate not registered".into());
        return Ok(reject(req, err));
    };

    let allowed = gate.check(
        req.headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok()),
    );

    if !allowed {
        log::warn!("Rejected request to {} with missing or wrong API key", req.path());
        return Ok(reject(req, AuthServerError::Unauthorized));
    }

    next.call(req).await.map(ServiceResponse::map_into_left_body)
}
