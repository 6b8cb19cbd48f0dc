use actix_web::{post, web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grant::{GrantProcessor, GrantRequest};

#[derive(Debug, Deserialize)]
pub struct SignOutRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SignOutResponse {
    pub status: &'static str,
}

#[post("/oauth/token")]
pub async fn token(
    req: web::Json<GrantRequest>,
    processor: web::Data<GrantProcessor>,
) -> Result<HttpResponse> {
    let request = req.into_inner();
    log::debug!("Grant request: {:?}", request.grant_type);

    let response = processor.process(request).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/oauth/sign-out")]
pub async fn sign_out(
    req: web::Json<SignOutRequest>,
    processor: web::Data<GrantProcessor>,
) -> Result<HttpResponse> {
    processor.sign_out(req.token.trim()).await?;
    Ok(HttpResponse::Ok().json(SignOutResponse { status: "ok" }))
}
