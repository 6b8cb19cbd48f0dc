//! User lookup and creation.
//!
//! The credential server never owns user records; it resolves them through
//! [`UserService`] and only reads the id and role.

mod memory;
mod mongo;

pub use memory::InMemoryUserService;
pub use mongo::MongoUserService;

use async_trait::async_trait;
use common::{User, UserId};

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("a user with email {0} already exists")]
    DuplicateEmail(String),

    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("corrupt user document: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn get_by_id(&self, id: &UserId) -> Result<Option<User>, UserServiceError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, UserServiceError>;

    async fn create(&self, email: &str) -> Result<User, UserServiceError>;
}

/// Minimal shape check: one `@` with something on both sides.
pub fn validate_email(email: &str) -> Result<(), UserServiceError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok(())
        }
        _ => Err(UserServiceError::InvalidEmail(email.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@x.com").is_ok());
        assert!(validate_email(" a@x.com ").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("ax.com").is_err());
        assert!(validate_email("@x.com").is_err());
        assert!(validate_email("a@").is_err());
        assert!(validate_email("a@b@c").is_err());
    }
}
