use actix_web::{http::StatusCode, test, App};
use auth_server::auth_token::{now_secs, Claims, TokenKind};
use auth_server::config::AuthConfig;
use auth_server::middleware::ApiKeyGate;
use auth_server::store::InMemoryTokenStore;
use auth_server::users::InMemoryUserService;
use auth_server::AppServices;
use common::{Role, User};
use serde_json::Value;
use std::sync::Arc;

const CONFIG: &str = r#"
[tokens]
secret = "middleware-secret-0123456789abcdef"

[api]
public_key = "mw-key"
"#;

struct Harness {
    services: AppServices,
    users: Arc<InMemoryUserService>,
    api_key: String,
}

fn harness() -> Harness {
    let config = AuthConfig::from_toml_str(CONFIG).expect("valid config");
    let users = Arc::new(InMemoryUserService::new());
    let services = AppServices::new(&config, Arc::new(InMemoryTokenStore::new()), users.clone())
        .expect("services");
    let api_key = ApiKeyGate::new("mw-key").header_value().to_string();
    Harness {
        services,
        users,
        api_key,
    }
}

fn me_request(api_key: &str, authorization: Option<&str>) -> test::TestRequest {
    let mut req = test::TestRequest::get()
        .uri("/api/users")
        .insert_header(("X-API-KEY", api_key));
    if let Some(value) = authorization {
        req = req.insert_header(("Authorization", value));
    }
    req
}

#[actix_web::test]
async fn test_session_middleware_injects_identity() {
    let h = harness();
    let admin = h
        .users
        .create_with_role("root@x.com", Role::Admin)
        .expect("create");
    let pair = h
        .services
        .signer
        .sign_session_pair(&admin, now_secs())
        .expect("sign");

    let services = h.services.clone();
    let app = test::init_service(App::new().configure(move |cfg| services.register(cfg))).await;

    let resp = test::call_service(
        &app,
        me_request(&h.api_key, Some(&format!("Bearer {}", pair.access_token))).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["id"], admin.id.to_string());
    assert_eq!(body["role"], "admin");
}

#[actix_web::test]
async fn test_session_middleware_rejections() {
    let h = harness();
    let user = h.users.create_with_role("m@x.com", Role::Member).expect("create");
    let pair = h
        .services
        .signer
        .sign_session_pair(&user, now_secs())
        .expect("sign");

    let expired = h
        .services
        .signer
        .sign(&Claims {
            user_id: user.id,
            role: user.role,
            sub: "expired-subject".to_string(),
            token_use: TokenKind::Access,
            iat: 1_000,
            exp: 1_060,
        })
        .expect("sign");

    let services = h.services.clone();
    let app = test::init_service(App::new().configure(move |cfg| services.register(cfg))).await;

    let cases = [
        None,
        Some("Basic abc".to_string()),
        Some("Bearer not-a-jwt".to_string()),
        Some(format!("Bearer {}", pair.refresh_token)),
        Some(format!("Bearer {expired}")),
    ];

    for authorization in cases {
        let resp = test::call_service(&app, me_request(&h.api_key, authorization.as_deref()).to_request())
            .await;
        assert_eq!(
            resp.status(),
            StatusCode::UNAUTHORIZED,
            "authorization: {authorization:?}"
        );
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "unauthorized");
    }
}

#[actix_web::test]
async fn test_token_from_other_secret_is_rejected() {
    let h = harness();
    let user = User::new("x@x.com");
    h.users.insert(user.clone());

    let other = auth_server::auth_token::TokenSigner::new(
        b"another-secret-another-secret-0000".to_vec(),
        Default::default(),
    )
    .expect("signer");
    let pair = other.sign_session_pair(&user, now_secs()).expect("sign");

    let services = h.services.clone();
    let app = test::init_service(App::new().configure(move |cfg| services.register(cfg))).await;

    let resp = test::call_service(
        &app,
        me_request(&h.api_key, Some(&format!("Bearer {}", pair.access_token))).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_api_key_checked_before_session() {
    let h = harness();
    let services = h.services.clone();
    let app = test::init_service(App::new().configure(move |cfg| services.register(cfg))).await;

    let resp = test::call_service(&app, me_request("wrong", None).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
