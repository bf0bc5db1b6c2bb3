use crate::configuration::Configuration;
use clap::Parser;
use std::{path::PathBuf, time::Duration};

/// Slot booking service
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ConfigurationHandler {
    /// Port the HTTP server listens on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// PostgreSQL connection URL. Without it bookings are kept in memory only.
    #[arg(short, long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Password expected in the `x-admin-password` header of admin requests
    #[arg(long, env = "ADMIN_PASSWORD", value_parser = clap::builder::NonEmptyStringValueParser::new())]
    admin_password: String,

    /// Directory receipts are written to
    #[arg(long, env = "RECEIPT_DIR", default_value = "./receipts")]
    receipt_dir: PathBuf,

    /// URL prefix under which stored receipts are served
    #[arg(long, env = "RECEIPT_BASE_URL", default_value = "/receipts")]
    receipt_base_url: String,

    /// Days ahead the maintenance job keeps slots generated
    #[arg(long, env = "COVERAGE_DAYS", default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=366))]
    coverage_days: u32,

    /// Slot length used by the maintenance job
    #[arg(long, env = "SLOT_MINUTES", default_value_t = 60, value_parser = clap::value_parser!(u32).range(1..=1440))]
    slot_minutes: u32,

    /// Seconds between two maintenance runs
    #[arg(long, env = "MAINTENANCE_INTERVAL_SECS", default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..))]
    maintenance_interval_secs: u64,

    /// Minutes a booking may stay without receipt before its slot is released
    #[arg(long, env = "PENDING_HOLD_MINUTES")]
    pending_hold_minutes: Option<u32>,
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Self {
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn port(&self) -> u16 {
        self.port
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    fn admin_password(&self) -> String {
        self.admin_password.clone()
    }

    fn receipt_dir(&self) -> PathBuf {
        self.receipt_dir.clone()
    }

    fn receipt_base_url(&self) -> String {
        self.receipt_base_url.clone()
    }

    fn coverage_days(&self) -> u32 {
        self.coverage_days
    }

    fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }

    fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    fn pending_hold(&self) -> Option<chrono::Duration> {
        self.pending_hold_minutes
            .map(|minutes| chrono::Duration::minutes(i64::from(minutes)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let configuration =
            ConfigurationHandler::try_parse_from(["slot_booking", "--admin-password", "secret"])
                .unwrap();

        assert_eq!(configuration.port(), 3000);
        assert_eq!(configuration.admin_password(), "secret");
        assert_eq!(configuration.receipt_dir(), PathBuf::from("./receipts"));
        assert_eq!(configuration.coverage_days(), 30);
        assert_eq!(configuration.slot_minutes(), 60);
        assert_eq!(configuration.maintenance_interval(), Duration::from_secs(3600));
        assert_eq!(configuration.pending_hold(), None);
    }

    #[test]
    fn test_explicit_arguments() {
        let configuration = ConfigurationHandler::try_parse_from([
            "slot_booking",
            "--admin-password",
            "secret",
            "--port",
            "8080",
            "--database-url",
            "postgres://localhost/slots",
            "--pending-hold-minutes",
            "45",
        ])
        .unwrap();

        assert_eq!(configuration.port(), 8080);
        assert_eq!(
            configuration.database_url().as_deref(),
            Some("postgres://localhost/slots")
        );
        assert_eq!(configuration.pending_hold(), Some(chrono::Duration::minutes(45)));
    }

    #[test]
    fn test_empty_admin_password_is_rejected() {
        let result = ConfigurationHandler::try_parse_from(["slot_booking", "--admin-password", ""]);

        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        ConfigurationHandler::try_parse_from([
            "slot_booking",
            "--admin-password",
            "secret",
            "--slot-minutes",
            "0",
        ])
        .unwrap_err();
    }
}
