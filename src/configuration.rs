use std::{path::PathBuf, time::Duration};

pub trait Configuration: Clone + Send + Sync + 'static {
    fn port(&self) -> u16;
    fn database_url(&self) -> Option<String>;
    fn admin_password(&self) -> String;
    fn receipt_dir(&self) -> PathBuf;
    fn receipt_base_url(&self) -> String;
    /// Days ahead for which the maintenance job keeps slots generated.
    fn coverage_days(&self) -> u32;
    fn slot_minutes(&self) -> u32;
    fn maintenance_interval(&self) -> Duration;
    /// How long a booking may wait for its receipt before the slot is released.
    /// `None` keeps pending bookings forever.
    fn pending_hold(&self) -> Option<chrono::Duration>;
}
