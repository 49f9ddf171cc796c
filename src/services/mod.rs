//! gRPC services and the state they share.

mod context;
mod user_service;

pub use context::ServiceContext;
pub use user_service::UserService;
