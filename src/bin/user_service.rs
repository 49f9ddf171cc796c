//! user-service: user records and cross-service aggregation.
//!
//! ## Configuration
//! - `config.yaml`, `--config <path>` or USER_SERVICE_CONFIG: YAML config file
//! - USER_SERVICE__<SECTION>__<KEY>: overrides, e.g. USER_SERVICE__SERVER__PORT
//! - USER_SERVICE_LOG: log filter (default `info`)
//! - USER_SERVICE_LOG_FORMAT=json: JSON log lines

use std::sync::Arc;

use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tracing::{error, info};

use user_service::bus::init_channel;
use user_service::config::Config;
use user_service::proto::user_service_server::UserServiceServer;
use user_service::services::{ServiceContext, UserService};
use user_service::storage::init_storage;
use user_service::utils::bootstrap::{connect_with_retry, init_tracing, parse_config_path};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!("Starting user-service");

    let store = connect_with_retry("storage", || init_storage(&config.storage)).await?;
    let channel = connect_with_retry("messaging", || init_channel(&config.messaging)).await?;

    let ctx = Arc::new(ServiceContext::from_config(store, channel, &config));
    ctx.start_consumers().await?;

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<UserServiceServer<UserService>>()
        .await;

    let addr = config.server.bind_addr()?;
    info!(address = %addr, "Server listening");

    Server::builder()
        .add_service(health_service)
        .add_service(UserServiceServer::new(UserService::new(ctx.clone())))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    ctx.shutdown().await;
    info!("user-service stopped");
    Ok(())
}
