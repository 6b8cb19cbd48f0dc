//! Grant processing: authorization-code issuance, code/refresh exchange and
//! sign-out.
//!
//! Every exchange funnels through [`GrantProcessor::consume`], which takes the
//! record under the token's subject in one atomic store call. A code or
//! refresh token is therefore redeemable exactly once, even under concurrent
//! requests. Failures are not rolled back: if signing fails after a record was
//! consumed, the caller starts over with a fresh code.

use std::sync::Arc;

use common::{User, UserId};
use serde::{Deserialize, Serialize};

use crate::auth_token::{
    generate_authorization_code, is_authorization_code, now_secs, Claims, TokenKind, TokenSigner,
};
use crate::error::{AuthServerError, Result};
use crate::store::{code_key, subject_key, user_key, StoredTokenRecord, TokenStore};
use crate::users::{UserService, UserServiceError};

const TOKEN_TYPE: &str = "Bearer";
const MAX_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    VerificationCode,
    RefreshToken,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantRequest {
    pub grant_type: GrantType,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub auth_code: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl GrantRequest {
    pub fn authorization_code(email: impl Into<String>) -> Self {
        Self {
            grant_type: GrantType::AuthorizationCode,
            email: Some(email.into()),
            auth_code: None,
            refresh_token: None,
        }
    }

    pub fn verification_code(auth_code: impl Into<String>) -> Self {
        Self {
            grant_type: GrantType::VerificationCode,
            email: None,
            auth_code: Some(auth_code.into()),
            refresh_token: None,
        }
    }

    pub fn refresh_token(refresh_token: impl Into<String>) -> Self {
        Self {
            grant_type: GrantType::RefreshToken,
            email: None,
            auth_code: None,
            refresh_token: Some(refresh_token.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeIssued {
    pub auth_code: String,
    /// Opaque handle; exchanging it is equivalent to exchanging the code.
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum GrantResponse {
    AuthorizationCode(CodeIssued),
    Session(SessionTokens),
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(AuthServerError::Validation(format!("{field} is required"))),
    }
}

#[derive(Clone)]
pub struct GrantProcessor {
    users: Arc<dyn UserService>,
    store: Arc<dyn TokenStore>,
    signer: TokenSigner,
}

impl GrantProcessor {
    pub fn new(users: Arc<dyn UserService>, store: Arc<dyn TokenStore>, signer: TokenSigner) -> Self {
        Self {
            users,
            store,
            signer,
        }
    }

    pub async fn process(&self, request: GrantRequest) -> Result<GrantResponse> {
        match request.grant_type {
            GrantType::AuthorizationCode => {
                let email = required(request.email.as_deref(), "email")?;
                self.issue_authorization_code(email)
                    .await
                    .map(GrantResponse::AuthorizationCode)
            }
            GrantType::VerificationCode => {
                let auth_code = required(request.auth_code.as_deref(), "auth_code")?;
                let user = self.redeem_verification_code(auth_code).await?;
                self.issue_session(&user).await.map(GrantResponse::Session)
            }
            GrantType::RefreshToken => {
                let refresh_token = required(request.refresh_token.as_deref(), "refresh_token")?;
                let user = self.redeem_refresh_token(refresh_token).await?;
                self.issue_session(&user).await.map(GrantResponse::Session)
            }
        }
    }

    /// Revokes the session the token belongs to. A token that was already
    /// revoked or consumed is rejected rather than acknowledged.
    pub async fn sign_out(&self, token: &str) -> Result<()> {
        let claims = self.validate(token)?;
        if claims.token_use == TokenKind::AuthorizationCode {
            log::warn!("Sign-out attempted with an authorization code handle");
            return Err(AuthServerError::Unauthorized);
        }

        self.consume(&claims).await?;
        log::info!("User {} signed out", claims.user_id);
        Ok(())
    }

    pub async fn issue_authorization_code(&self, email: &str) -> Result<CodeIssued> {
        let user = self.find_or_create_user(email).await?;

        let record = StoredTokenRecord::AuthorizationCode {
            user_id: user.id,
            role: user.role,
        };
        let code = self.allocate_code(&record).await?;

        let access_token = self
            .signer
            .sign_code_handle(&user, &code, now_secs())
            .map_err(|err| AuthServerError::Signing(err.to_string()))?;

        log::info!("Issued authorization code for user {}", user.id);
        Ok(CodeIssued {
            auth_code: code,
            access_token,
        })
    }

    /// Claims a fresh code slot. A code still pending for someone else is
    /// never reused.
    async fn allocate_code(&self, record: &StoredTokenRecord) -> Result<String> {
        let ttl = Some(self.signer.lifetimes().authorization_code);

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_authorization_code();
            if self.store.insert_if_absent(&code_key(&code), record, ttl).await? {
                return Ok(code);
            }
            log::debug!("Authorization code collision, drawing again");
        }

        Err(AuthServerError::Internal(format!(
            "no free authorization code after {MAX_CODE_ATTEMPTS} attempts"
        )))
    }

    /// Accepts the raw six-digit code, the code handle, or a refresh token.
    async fn redeem_verification_code(&self, auth_code: &str) -> Result<User> {
        let user_id = if is_authorization_code(auth_code) {
            match self.store.take(&code_key(auth_code)).await? {
                Some(StoredTokenRecord::AuthorizationCode { user_id, .. }) => user_id,
                Some(other) => {
                    log::error!("Unexpected record under code key: {:?}", other);
                    return Err(AuthServerError::Unauthorized);
                }
                None => {
                    log::warn!("Authorization code not found or already used");
                    return Err(AuthServerError::Unauthorized);
                }
            }
        } else {
            let claims = self.validate(auth_code)?;
            if claims.token_use == TokenKind::Access {
                log::warn!("Access token presented as verification code");
                return Err(AuthServerError::Unauthorized);
            }
            self.consume(&claims).await?;
            claims.user_id
        };

        self.load_user(&user_id).await
    }

    async fn redeem_refresh_token(&self, refresh_token: &str) -> Result<User> {
        let claims = self.validate(refresh_token)?;
        if claims.token_use != TokenKind::Refresh {
            log::warn!("Non-refresh token presented to refresh grant");
            return Err(AuthServerError::Unauthorized);
        }

        self.consume(&claims).await?;
        self.load_user(&claims.user_id).await
    }

    /// Signs a new pair for `user`, clearing whatever pair the user held before.
    pub async fn issue_session(&self, user: &User) -> Result<SessionTokens> {
        let pair = self
            .signer
            .sign_session_pair(user, now_secs())
            .map_err(|err| AuthServerError::Signing(err.to_string()))?;

        let record = StoredTokenRecord::Session {
            user_id: user.id,
            access_subject: pair.access_subject.clone(),
            refresh_subject: pair.refresh_subject.clone(),
        };
        let ttl = Some(self.signer.lifetimes().refresh);

        // Subjects go in before the pointer swap, so whichever issuance
        // displaces this pointer later finds them and revokes them.
        self.store
            .set(&subject_key(&pair.access_subject), &record, ttl)
            .await?;
        self.store
            .set(&subject_key(&pair.refresh_subject), &record, ttl)
            .await?;

        if let Some(previous) = self.store.replace(&user_key(&user.id), &record, ttl).await? {
            self.revoke_session(&previous).await?;
        }

        log::info!("Issued session pair for user {}", user.id);
        Ok(SessionTokens {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: pair.expires_in,
        })
    }

    fn validate(&self, token: &str) -> Result<Claims> {
        self.signer.validate(token, now_secs()).map_err(|err| {
            log::warn!("Rejected token: {}", err);
            AuthServerError::Unauthorized
        })
    }

    /// Validate → take the record under the subject → clear the rest of the
    /// session. Missing records yield the same `Unauthorized` as bad tokens.
    async fn consume(&self, claims: &Claims) -> Result<StoredTokenRecord> {
        let key = match claims.token_use {
            TokenKind::AuthorizationCode => code_key(&claims.sub),
            TokenKind::Access | TokenKind::Refresh => subject_key(&claims.sub),
        };

        let record = match self.store.take(&key).await? {
            Some(record) => record,
            None => {
                log::warn!("No live record for subject of user {}", claims.user_id);
                return Err(AuthServerError::Unauthorized);
            }
        };

        // Only a forged token or corrupted data gets here. The taken record
        // is dropped, not restored.
        if record.user_id() != &claims.user_id {
            log::error!(
                "Record under {} belongs to {}, token claims {}",
                key,
                record.user_id(),
                claims.user_id
            );
            return Err(AuthServerError::Unauthorized);
        }

        if let StoredTokenRecord::Session {
            access_subject,
            refresh_subject,
            ..
        } = &record
        {
            let sibling = if access_subject == &claims.sub {
                refresh_subject
            } else {
                access_subject
            };
            self.store.delete(&subject_key(sibling)).await?;
            self.clear_user_pointer(&claims.user_id, &record).await?;
        }

        Ok(record)
    }

    /// Drops the per-user pointer only while it still refers to `record`; a
    /// newer session stays intact.
    async fn clear_user_pointer(&self, user_id: &UserId, record: &StoredTokenRecord) -> Result<()> {
        self.store.delete_if_eq(&user_key(user_id), record).await?;
        Ok(())
    }

    async fn revoke_session(&self, record: &StoredTokenRecord) -> Result<()> {
        if let StoredTokenRecord::Session {
            user_id,
            access_subject,
            refresh_subject,
        } = record
        {
            self.store.delete(&subject_key(access_subject)).await?;
            self.store.delete(&subject_key(refresh_subject)).await?;
            log::info!("Revoked previous session for user {}", user_id);
        }
        Ok(())
    }

    async fn find_or_create_user(&self, email: &str) -> Result<User> {
        if let Some(user) = self.users.get_by_email(email).await? {
            return Ok(user);
        }

        match self.users.create(email).await {
            Ok(user) => Ok(user),
            Err(UserServiceError::InvalidEmail(email)) => Err(AuthServerError::Validation(
                format!("invalid email address: {email}"),
            )),
            // Lost a race with a concurrent first login for the same email
            Err(UserServiceError::DuplicateEmail(_)) => self
                .users
                .get_by_email(email)
                .await?
                .ok_or_else(|| AuthServerError::Internal("user vanished after create".into())),
            Err(err) => Err(err.into()),
        }
    }

    async fn load_user(&self, user_id: &UserId) -> Result<User> {
        match self.users.get_by_id(user_id).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => {
                log::warn!("User {} from token no longer exists", user_id);
                Err(AuthServerError::Unauthorized)
            }
            Err(err) => {
                log::error!("Failed to load user {}: {}", user_id, err);
                Err(AuthServerError::Unauthorized)
            }
        }
    }
}
