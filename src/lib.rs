//! User service.
//!
//! gRPC CRUD over a document store, plus the cross-service layer that fans
//! requests out to sibling services over a message broker and merges their
//! replies.

pub mod bus;
pub mod config;
pub mod handlers;
pub mod scatter;
pub mod services;
pub mod storage;
pub mod utils;

pub mod proto {
    tonic::include_proto!("user");
}

#[cfg(test)]
mod test_utils;
