use async_trait::async_trait;
use common::{normalize_email, Role, User, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::{validate_email, UserService, UserServiceError};

#[derive(Clone, Default)]
pub struct InMemoryUserService {
    // user_id -> user
    users: Arc<DashMap<UserId, User>>,
    // normalized email -> user_id
    emails: Arc<DashMap<String, UserId>>,
}

impl InMemoryUserService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing user, e.g. an administrator in tests.
    pub fn insert(&self, user: User) {
        self.emails.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user);
    }

    pub fn create_with_role(&self, email: &str, role: Role) -> Result<User, UserServiceError> {
        validate_email(email)?;
        let user = User::new(email).with_role(role);

        match self.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(UserServiceError::DuplicateEmail(user.email)),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
                self.users.insert(user.id, user.clone());
                log::info!("Created user {} ({})", user.id, user.email);
                Ok(user)
            }
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl UserService for InMemoryUserService {
    async fn get_by_id(&self, id: &UserId) -> Result<Option<User>, UserServiceError> {
        Ok(self.users.get(id).map(|user| user.clone()))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, UserServiceError> {
        let user_id = self
            .emails
            .get(&normalize_email(email))
            .map(|entry| *entry.value());
        Ok(user_id.and_then(|id| self.users.get(&id).map(|user| user.clone())))
    }

    async fn create(&self, email: &str) -> Result<User, UserServiceError> {
        self.create_with_role(email, Role::Member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let service = InMemoryUserService::new();
        let user = service.create("A@x.com").await.unwrap();

        assert_eq!(user.role, Role::Member);
        assert_eq!(service.get_by_id(&user.id).await.unwrap(), Some(user.clone()));
        assert_eq!(
            service.get_by_email("a@X.COM").await.unwrap(),
            Some(user)
        );
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let service = InMemoryUserService::new();
        service.create("a@x.com").await.unwrap();

        assert!(matches!(
            service.create("a@x.com").await,
            Err(UserServiceError::DuplicateEmail(_))
        ));
        assert_eq!(service.user_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let service = InMemoryUserService::new();
        assert_eq!(service.get_by_id(&UserId::new()).await.unwrap(), None);
        assert_eq!(service.get_by_email("nobody@x.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_email() {
        let service = InMemoryUserService::new();
        assert!(matches!(
            service.create("nope").await,
            Err(UserServiceError::InvalidEmail(_))
        ));
    }
}
