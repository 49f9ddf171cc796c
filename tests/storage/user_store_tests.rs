//! UserStore contract.

use futures::StreamExt;
use user_service::storage::{StorageError, UserRecord, UserStore};

fn user(email: &str) -> UserRecord {
    UserRecord {
        id: None,
        email: email.to_string(),
        phone: "555-0100".to_string(),
        date_of_birth: "1985-06-01".to_string(),
        first_name: "Grace".to_string(),
        last_name: "Hopper".to_string(),
        credit_card_number: 5555,
        expiration_date: "01/30".to_string(),
        cvc: 999,
    }
}

/// An id with valid shape that no store will have generated.
const ABSENT_ID: &str = "000000000000000000000000";

pub async fn test_insert_and_find(store: &dyn UserStore) {
    let id = store.insert_one(user("insert@example.com")).await.unwrap();
    let found = store.find_one(&id).await.unwrap().expect("inserted user");
    assert_eq!(found, user("insert@example.com").with_id(id.clone()));
    println!("  insert_and_find: OK");
}

pub async fn test_find_absent(store: &dyn UserStore) {
    assert!(store.find_one(ABSENT_ID).await.unwrap().is_none());
    println!("  find_absent: OK");
}

pub async fn test_update_returns_post_image(store: &dyn UserStore) {
    let id = store.insert_one(user("before@example.com")).await.unwrap();
    let mut changed = user("after@example.com");
    changed.cvc = 111;

    let updated = store
        .find_one_and_update(&id, changed.clone())
        .await
        .unwrap()
        .expect("updated user");
    assert_eq!(updated, changed.with_id(id.clone()));
    assert_eq!(store.find_one(&id).await.unwrap().unwrap().email, "after@example.com");

    assert!(store
        .find_one_and_update(ABSENT_ID, user("x@example.com"))
        .await
        .unwrap()
        .is_none());
    println!("  update_returns_post_image: OK");
}

pub async fn test_delete_counts(store: &dyn UserStore) {
    let id = store.insert_one(user("delete@example.com")).await.unwrap();
    assert_eq!(store.delete_one(&id).await.unwrap(), 1);
    assert_eq!(store.delete_one(&id).await.unwrap(), 0);
    assert!(store.find_one(&id).await.unwrap().is_none());
    println!("  delete_counts: OK");
}

pub async fn test_find_all_includes_inserted(store: &dyn UserStore) {
    let a = store.insert_one(user("list-a@example.com")).await.unwrap();
    let b = store.insert_one(user("list-b@example.com")).await.unwrap();

    let ids: Vec<String> = store
        .find_all()
        .await
        .unwrap()
        .filter_map(|u| async move { u.ok().and_then(|u| u.id) })
        .collect()
        .await;
    assert!(ids.contains(&a));
    assert!(ids.contains(&b));
    println!("  find_all_includes_inserted: OK");
}

pub async fn test_invalid_id_rejected(store: &dyn UserStore) {
    assert!(matches!(
        store.find_one("not-an-id").await,
        Err(StorageError::InvalidId(_))
    ));
    assert!(matches!(
        store.delete_one("1234").await,
        Err(StorageError::InvalidId(_))
    ));
    println!("  invalid_id_rejected: OK");
}

#[macro_export]
macro_rules! run_user_store_tests {
    ($store:expr) => {{
        use $crate::storage::user_store_tests::*;
        test_insert_and_find($store).await;
        test_find_absent($store).await;
        test_update_returns_post_image($store).await;
        test_delete_counts($store).await;
        test_find_all_includes_inserted($store).await;
        test_invalid_id_rejected($store).await;
    }};
}
