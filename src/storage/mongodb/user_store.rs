//! MongoDB UserStore implementation.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Client, Collection, Database};

use super::fields::{
    CREDIT_CARD_NUMBER, CVC, DATE_OF_BIRTH, EMAIL, EXPIRATION_DATE, FIRST_NAME, ID, LAST_NAME,
    PHONE,
};
use crate::storage::{validate_id, Result, StorageError, UserRecord, UserStore};

/// MongoDB implementation of UserStore.
pub struct MongoUserStore {
    database: Database,
    users: Collection<Document>,
}

impl MongoUserStore {
    pub fn new(client: &Client, database_name: &str, collection_name: &str) -> Self {
        let database = client.database(database_name);
        let users = database.collection(collection_name);
        Self { database, users }
    }

    /// Round-trip to the server so startup fails fast on a bad URI.
    pub async fn ping(&self) -> Result<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    fn parse_id(id: &str) -> Result<ObjectId> {
        validate_id(id)?;
        ObjectId::parse_str(id).map_err(|_| StorageError::InvalidId(id.to_string()))
    }

    /// Fields written on insert and `$set` on update. `_id` is never included.
    fn to_document(user: &UserRecord) -> Document {
        doc! {
            EMAIL: &user.email,
            PHONE: &user.phone,
            DATE_OF_BIRTH: &user.date_of_birth,
            FIRST_NAME: &user.first_name,
            LAST_NAME: &user.last_name,
            CREDIT_CARD_NUMBER: user.credit_card_number,
            EXPIRATION_DATE: &user.expiration_date,
            CVC: user.cvc,
        }
    }

    fn from_document(document: &Document) -> Result<UserRecord> {
        let id = document
            .get_object_id(ID)
            .map_err(|e| StorageError::Decode(format!("missing _id: {}", e)))?;

        // Fields are stored omit-empty, so absence means the zero value.
        let text = |key: &str| document.get_str(key).unwrap_or_default().to_string();
        let number = |key: &str| document.get_i32(key).unwrap_or_default();

        Ok(UserRecord {
            id: Some(id.to_hex()),
            email: text(EMAIL),
            phone: text(PHONE),
            date_of_birth: text(DATE_OF_BIRTH),
            first_name: text(FIRST_NAME),
            last_name: text(LAST_NAME),
            credit_card_number: number(CREDIT_CARD_NUMBER),
            expiration_date: text(EXPIRATION_DATE),
            cvc: number(CVC),
        })
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn insert_one(&self, user: UserRecord) -> Result<String> {
        let result = self.users.insert_one(Self::to_document(&user)).await?;
        result
            .inserted_id
            .as_object_id()
            .map(|oid| oid.to_hex())
            .ok_or_else(|| StorageError::Database("inserted id is not an ObjectId".to_string()))
    }

    async fn find_one(&self, id: &str) -> Result<Option<UserRecord>> {
        let oid = Self::parse_id(id)?;
        match self.users.find_one(doc! { ID: oid }).await? {
            Some(document) => Ok(Some(Self::from_document(&document)?)),
            None => Ok(None),
        }
    }

    async fn find_one_and_update(&self, id: &str, user: UserRecord) -> Result<Option<UserRecord>> {
        let oid = Self::parse_id(id)?;
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .users
            .find_one_and_update(
                doc! { ID: oid },
                doc! { "$set": Self::to_document(&user) },
            )
            .with_options(options)
            .await?;

        updated.as_ref().map(Self::from_document).transpose()
    }

    async fn delete_one(&self, id: &str) -> Result<u64> {
        let oid = Self::parse_id(id)?;
        let result = self.users.delete_one(doc! { ID: oid }).await?;
        Ok(result.deleted_count)
    }

    async fn find_all(&self) -> Result<BoxStream<'static, Result<UserRecord>>> {
        let cursor = self.users.find(doc! {}).await?;
        Ok(cursor
            .map(|item| match item {
                Ok(document) => Self::from_document(&document),
                Err(e) => Err(StorageError::from(e)),
            })
            .boxed())
    }
}
