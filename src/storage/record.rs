//! The stored user document.

use serde::{Deserialize, Serialize};

use super::{Result, StorageError};

/// A user as held by the store.
///
/// `id` is the store identifier (24 hex characters). It is `None` until the
/// record has been inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub credit_card_number: i32,
    #[serde(default)]
    pub expiration_date: String,
    #[serde(default)]
    pub cvc: i32,
}

impl UserRecord {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Check that `id` has the shape of a store identifier.
pub fn validate_id(id: &str) -> Result<()> {
    if id.len() == 24 && id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}
