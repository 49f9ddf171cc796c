//! In-memory UserStore for local runs and tests.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{validate_id, Result, StorageError, UserRecord, UserStore};

/// In-memory user store.
///
/// Records are kept in insertion order so `find_all` is deterministic.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<Vec<UserRecord>>,
    fail_all: RwLock<bool>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a database error.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail_all.write().await = fail;
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    async fn check_available(&self) -> Result<()> {
        if *self.fail_all.read().await {
            return Err(StorageError::Database("store unavailable".to_string()));
        }
        Ok(())
    }

    fn new_id() -> String {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(24);
        id
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert_one(&self, user: UserRecord) -> Result<String> {
        self.check_available().await?;
        let id = Self::new_id();
        self.users.write().await.push(user.with_id(id.clone()));
        Ok(id)
    }

    async fn find_one(&self, id: &str) -> Result<Option<UserRecord>> {
        validate_id(id)?;
        self.check_available().await?;
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.id.as_deref() == Some(id))
            .cloned())
    }

    async fn find_one_and_update(&self, id: &str, user: UserRecord) -> Result<Option<UserRecord>> {
        validate_id(id)?;
        self.check_available().await?;
        let mut users = self.users.write().await;
        match users.iter_mut().find(|u| u.id.as_deref() == Some(id)) {
            Some(existing) => {
                *existing = user.with_id(id);
                Ok(Some(existing.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_one(&self, id: &str) -> Result<u64> {
        validate_id(id)?;
        self.check_available().await?;
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id.as_deref() != Some(id));
        Ok((before - users.len()) as u64)
    }

    async fn find_all(&self) -> Result<BoxStream<'static, Result<UserRecord>>> {
        self.check_available().await?;
        let users = self.users.read().await.clone();
        Ok(stream::iter(users.into_iter().map(Ok)).boxed())
    }
}
