use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

use crate::auth_token::TokenSigner;
use crate::config::AuthConfig;
use crate::error::{AuthServerError, Result};
use crate::grant::GrantProcessor;
use crate::handlers;
use crate::middleware::{api_key_middleware, ApiKeyGate};
use crate::store::TokenStore;
use crate::users::UserService;

/// Everything the HTTP layer shares between workers. Built once in `main`
/// (or a test) and registered on each `App`.
#[derive(Clone)]
pub struct AppServices {
    pub processor: GrantProcessor,
    pub signer: TokenSigner,
    pub api_key: ApiKeyGate,
    pub users: Arc<dyn UserService>,
}

impl AppServices {
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn TokenStore>,
        users: Arc<dyn UserService>,
    ) -> Result<Self> {
        let signer = TokenSigner::new(
            config.tokens.secret.clone().into_bytes(),
            config.tokens.lifetimes(),
        )
        .map_err(|err| AuthServerError::Config(err.to_string()))?;

        let processor = GrantProcessor::new(users.clone(), store, signer.clone());

        Ok(Self {
            processor,
            signer,
            api_key: ApiKeyGate::new(&config.api.public_key),
            users,
        })
    }

    pub fn register(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::new(self.processor.clone()))
            .app_data(web::Data::new(self.signer.clone()))
            .app_data(web::Data::new(self.api_key.clone()))
            .app_data(web::Data::from(self.users.clone()))
            .app_data(handlers::json_config())
            .service(handlers::healthz)
            .service(
                web::scope("/api")
                    .wrap(from_fn(api_key_middleware))
                    .service(handlers::token)
                    .service(handlers::sign_out)
                    .service(handlers::create_user)
                    .service(handlers::current_user),
            );
    }
}
