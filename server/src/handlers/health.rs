use actix_web::{get, HttpResponse, Responder};

pub const HEALTH_BODY: &str = "Ok v1";

#[get("/healthz")]
pub async fn healthz() -> impl Responder {
    HttpResponse::Ok().content_type("text/plain").body(HEALTH_BODY)
}
