use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::{Role, User, UserId};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, Rng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MIN_SECRET_LEN: usize = 32;
const SIGNING_ALGORITHM: &str = "HS256";
const AUTHORIZATION_CODE_MAX: u32 = 999_999;
pub const AUTHORIZATION_CODE_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token secret is too short (min {MIN_SECRET_LEN} bytes)")]
    SecretTooShort,

    #[error("invalid token format")]
    InvalidFormat,

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token is expired")]
    Expired,

    #[error("token claims are invalid")]
    InvalidClaims,

    #[error("failed to decode token segment")]
    SegmentDecode,

    #[error("failed to parse token segment")]
    SegmentParse,

    #[error("failed to encode token: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Purpose a token was minted for. Checked by every consumer so a token
/// issued for one flow cannot be replayed in another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    AuthorizationCode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct JwtHeader {
    alg: String,
    typ: String,
}

impl JwtHeader {
    fn hs256() -> Self {
        Self {
            alg: SIGNING_ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub user_id: UserId,
    pub role: Role,
    /// Store lookup key. A fresh UUID for session tokens, the code itself
    /// for authorization-code handles.
    pub sub: String,
    pub token_use: TokenKind,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    pub fn is_expired(&self, reference_secs: u64) -> bool {
        reference_secs >= self.exp
    }
}

/// Freshly signed access/refresh pair plus the subjects the store is keyed by.
#[derive(Debug, Clone)]
pub struct SessionPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_subject: String,
    pub refresh_subject: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
    pub authorization_code: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: Duration::from_secs(15 * 60),
            refresh: Duration::from_secs(7 * 24 * 3600),
            authorization_code: Duration::from_secs(5 * 60),
        }
    }
}

/// Signs and validates HS256 JWTs with a shared secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Arc<[u8]>,
    lifetimes: TokenLifetimes,
}

impl TokenSigner {
    pub fn new(secret: Vec<u8>, lifetimes: TokenLifetimes) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::SecretTooShort);
        }

        Ok(Self {
            secret: Arc::<[u8]>::from(secret),
            lifetimes,
        })
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    pub fn sign_session_pair(&self, user: &User, issued_at: u64) -> Result<SessionPair, TokenError> {
        let access_subject = Uuid::new_v4().to_string();
        let refresh_subject = Uuid::new_v4().to_string();

        let access_token = self.sign(&self.claims_for(
            user,
            access_subject.clone(),
            TokenKind::Access,
            issued_at,
            self.lifetimes.access,
        ))?;
        let refresh_token = self.sign(&self.claims_for(
            user,
            refresh_subject.clone(),
            TokenKind::Refresh,
            issued_at,
            self.lifetimes.refresh,
        ))?;

        Ok(SessionPair {
            access_token,
            refresh_token,
            access_subject,
            refresh_subject,
            expires_in: self.lifetimes.access.as_secs(),
        })
    }

    /// Opaque handle returned next to an authorization code. Exchanging the
    /// handle is equivalent to exchanging the code.
    pub fn sign_code_handle(
        &self,
        user: &User,
        code: &str,
        issued_at: u64,
    ) -> Result<String, TokenError> {
        self.sign(&self.claims_for(
            user,
            code.to_string(),
            TokenKind::AuthorizationCode,
            issued_at,
            self.lifetimes.authorization_code,
        ))
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&JwtHeader::hs256())?);
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{header_b64}.{payload_b64}");
        let signature = self.mac(signing_input.as_bytes())?.finalize().into_bytes();
        let signature_b64 = URL_SAFE_NO_PAD.encode(signature);
        Ok(format!("{signing_input}.{signature_b64}"))
    }

    pub fn validate(&self, token: &str, reference_secs: u64) -> Result<Claims, TokenError> {
        let mut segments = token.split('.');
        let (header_b64, payload_b64, signature_b64) = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(header), Some(payload), Some(signature), None) => (header, payload, signature),
            _ => return Err(TokenError::InvalidFormat),
        };

        // Algorithm is pinned before any signature work; `none` and every
        // other family are refused outright.
        let header: JwtHeader = decode_segment(header_b64)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::InvalidFormat)?;

        let mut mac = self.mac(header_b64.as_bytes())?;
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = decode_segment(payload_b64)?;

        if claims.sub.is_empty() || claims.sub == claims.user_id.to_string() {
            return Err(TokenError::InvalidClaims);
        }
        if claims.is_expired(reference_secs) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn claims_for(
        &self,
        user: &User,
        sub: String,
        token_use: TokenKind,
        issued_at: u64,
        ttl: Duration,
    ) -> Claims {
        Claims {
            user_id: user.id,
            role: user.role,
            sub,
            token_use,
            iat: issued_at,
            exp: issued_at.saturating_add(ttl.as_secs()),
        }
    }

    fn mac(&self, bytes: &[u8]) -> Result<HmacSha256, TokenError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::InvalidSignature)?;
        mac.update(bytes);
        Ok(mac)
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::SegmentDecode)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::SegmentParse)
}

/// Uniform code in `000000..=999999` drawn from the operating system CSPRNG.
pub fn generate_authorization_code() -> String {
    let value = OsRng.gen_range(0..=AUTHORIZATION_CODE_MAX);
    format!("{value:0width$}", width = AUTHORIZATION_CODE_LEN)
}

pub fn is_authorization_code(candidate: &str) -> bool {
    candidate.len() == AUTHORIZATION_CODE_LEN && candidate.bytes().all(|b| b.is_ascii_digit())
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
