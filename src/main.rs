use std::{sync::Arc, time::Duration};

use crate::{
    backend::BookingBackend, configuration::Configuration,
    configuration_handler::ConfigurationHandler, database_interface::DatabaseInterface,
    http::create_app, local_store::LocalStore, maintenance::start_maintenance_job,
    maintenance::CoveragePolicy, receipt_storage::LocalReceiptStorage,
};
use axum::Router;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod availability;
mod backend;
mod configuration;
mod configuration_handler;
mod database_interface;
mod error;
mod http;
mod local_store;
mod maintenance;
mod payment;
mod pricing;
mod receipt_storage;
mod reservation;
mod schema;
mod slot_generator;
#[cfg(test)]
mod testutils;
mod types;

fn start<B: BookingBackend>(backend: B, configuration: &ConfigurationHandler) -> Router {
    let policy = CoveragePolicy {
        horizon_days: configuration.coverage_days(),
        slot_duration_minutes: configuration.slot_minutes(),
    };
    start_maintenance_job(
        backend.clone(),
        policy,
        configuration.pending_hold(),
        configuration.maintenance_interval(),
    );

    let receipts = Arc::new(LocalReceiptStorage::new(
        configuration.receipt_dir(),
        &configuration.receipt_base_url(),
    ));
    create_app(backend, receipts, configuration.clone())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("Failed to load .env file: {err}");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("################");
    println!("# Slot Booking #");
    println!("################");

    let configuration = ConfigurationHandler::parse_arguments();
    tokio::fs::create_dir_all(configuration.receipt_dir()).await?;

    let address = format!("0.0.0.0:{}", configuration.port());
    println!("Accessable at:\n{}", address.clone());
    let listener = tokio::net::TcpListener::bind(address).await?;

    let app = if let Some(database_url) = configuration.database_url() {
        let backend = loop {
            match DatabaseInterface::new(&database_url) {
                Ok(backend) => {
                    info!("Successfully connected to database");
                    break backend;
                }
                Err(err) => {
                    error!(?err, "Failed to establish database connection. Retry in 1 sec. You may want to restart without a database URL (bookings kept in memory).");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        start(backend, &configuration)
    } else {
        warn!("No database configured, bookings are kept in memory only");
        start(LocalStore::default(), &configuration)
    };

    axum::serve(listener, app).await
}
