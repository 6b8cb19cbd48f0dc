use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{normalize_email, Role, User, UserId};
use mongodb::{
    bson::doc,
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
    Client, Collection, IndexModel,
};
use serde::{Deserialize, Serialize};

use super::{validate_email, UserService, UserServiceError};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_id")]
    id: String,
    email: String,
    role: Role,
    created_at: DateTime<Utc>,
}

impl From<&User> for UserDocument {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

impl TryFrom<UserDocument> for User {
    type Error = UserServiceError;

    fn try_from(doc: UserDocument) -> Result<Self, Self::Error> {
        let id: UserId = doc
            .id
            .parse()
            .map_err(|_| UserServiceError::Corrupt(format!("bad user id {}", doc.id)))?;
        Ok(User {
            id,
            email: doc.email,
            role: doc.role,
            created_at: doc.created_at,
        })
    }
}

#[derive(Clone)]
pub struct MongoUserService {
    collection: Collection<UserDocument>,
}

impl MongoUserService {
    pub fn new(client: Client, database_name: &str) -> Self {
        Self {
            collection: client.database(database_name).collection("users"),
        }
    }

    pub async fn init_indexes(&self) -> Result<(), UserServiceError> {
        // Create unique index on email
        let email_index = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        self.collection.create_index(email_index).await?;

        log::info!("User indexes created successfully");
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl UserService for MongoUserService {
    async fn get_by_id(&self, id: &UserId) -> Result<Option<User>, UserServiceError> {
        self.collection
            .find_one(doc! { "_id": id.to_string() })
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, UserServiceError> {
        self.collection
            .find_one(doc! { "email": normalize_email(email) })
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn create(&self, email: &str) -> Result<User, UserServiceError> {
        validate_email(email)?;
        let user = User::new(email);

        match self.collection.insert_one(UserDocument::from(&user)).await {
            Ok(_) => {
                log::info!("Created user {} ({})", user.id, user.email);
                Ok(user)
            }
            Err(err) if is_duplicate_key(&err) => Err(UserServiceError::DuplicateEmail(user.email)),
            Err(err) => Err(err.into()),
        }
    }
}
