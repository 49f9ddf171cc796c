//! In-memory UserStore contract tests.
//!
//! Run with: cargo test --test storage_memory

mod storage;

use user_service::storage::MemoryUserStore;

#[tokio::test]
async fn test_memory_user_store() {
    println!("=== Memory UserStore Tests ===");
    let store = MemoryUserStore::new();
    run_user_store_tests!(&store);
    println!("=== All Memory UserStore tests PASSED ===");
}
