pub mod command;
pub mod config;
pub mod dns;
pub mod identity;
pub mod mode;
pub mod moisture;
pub mod portal;
pub mod telemetry;
pub mod topics;

pub use command::Command;
pub use config::{BootMode, Credentials};
pub use identity::DeviceIdentity;
pub use mode::{JoinAttempt, PublishTicker, JOIN_POLL_INTERVAL_MS, PUBLISH_INTERVAL_MS};
pub use moisture::{Calibration, CalibrationError};
pub use portal::{SaveForm, ScanEntry};
pub use telemetry::TelemetrySample;
pub use topics::{command_topic, TOPIC_TELEMETRY};
