//! Commands other services send to `user_queue`.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::bus::{BusError, Delivery, MessageHandler, Result};
use crate::storage::{UserRecord, UserStore};

/// Action that stores the carried user.
pub const SAVE_RECORD: &str = "saveRecord";

/// Body of a message on the inbound queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InboundCommand {
    /// Identifier the sender knows the user by. Not the store id.
    #[serde(alias = "userId")]
    pub user_id: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(alias = "creditcard_number")]
    pub credit_card_number: i32,
    pub expiration_date: String,
    pub cvc: i32,
    pub action: String,
}

impl From<InboundCommand> for UserRecord {
    fn from(command: InboundCommand) -> Self {
        Self {
            id: None,
            email: command.email,
            phone: command.phone,
            date_of_birth: command.date_of_birth,
            first_name: command.first_name,
            last_name: command.last_name,
            credit_card_number: command.credit_card_number,
            expiration_date: command.expiration_date,
            cvc: command.cvc,
        }
    }
}

/// Applies inbound commands to the store.
///
/// Unknown actions are acknowledged and dropped. Store failures surface as
/// handler errors so the delivery is redelivered.
pub struct InboundHandler {
    store: Arc<dyn UserStore>,
}

impl InboundHandler {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

impl MessageHandler for InboundHandler {
    fn handle(&self, delivery: Arc<Delivery>) -> BoxFuture<'static, Result<()>> {
        let store = self.store.clone();
        Box::pin(async move {
            let command: InboundCommand = serde_json::from_slice(&delivery.payload)
                .map_err(|e| BusError::Decode(e.to_string()))?;

            match command.action.as_str() {
                SAVE_RECORD => {
                    let sender_id = command.user_id.clone();
                    let id = store.insert_one(command.into()).await.map_err(|e| {
                        error!(queue = %delivery.queue, error = %e, "saveRecord insert failed");
                        BusError::Handler(e.to_string())
                    })?;
                    info!(
                        user_id = %id,
                        sender_user_id = %sender_id,
                        "User saved from inbound queue"
                    );
                }
                other => {
                    warn!(queue = %delivery.queue, action = %other, "Unknown action");
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryUserStore;
    use futures::StreamExt;

    fn handler() -> (InboundHandler, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        (InboundHandler::new(store.clone()), store)
    }

    fn delivery(body: &str) -> Arc<Delivery> {
        Arc::new(Delivery::new("user_queue", body.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn test_save_record_inserts_user() {
        let (handler, store) = handler();
        handler
            .handle(delivery(
                r#"{"user_id":"ext-1","email":"ada@example.com","creditcard_number":4111,"cvc":7,"action":"saveRecord"}"#,
            ))
            .await
            .unwrap();

        let users: Vec<_> = store.find_all().await.unwrap().collect().await;
        assert_eq!(users.len(), 1);
        let user = users[0].as_ref().unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.credit_card_number, 4111);
        assert_eq!(user.cvc, 7);
    }

    #[tokio::test]
    async fn test_unknown_action_is_acked() {
        let (handler, store) = handler();
        handler
            .handle(delivery(r#"{"email":"x@y","action":"purge"}"#))
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_not_requeued() {
        let (handler, _) = handler();
        let err = handler.handle(delivery("not json")).await.unwrap_err();
        assert!(matches!(err, BusError::Decode(_)));
        assert!(!err.should_requeue());
    }

    #[tokio::test]
    async fn test_store_failure_is_requeued() {
        let (handler, store) = handler();
        store.set_fail(true).await;
        let err = handler
            .handle(delivery(r#"{"email":"x@y","action":"saveRecord"}"#))
            .await
            .unwrap_err();
        assert!(err.should_requeue());
    }
}
