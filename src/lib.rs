//! Power meter telemetry gateway
//!
//! Polls field power meters over Modbus RTU/TCP, fans decoded readings out
//! over an in-process bus, and delivers them to MQTT, InfluxDB or stdout.
//! Every source and sink runs on its own thread under a uniform
//! init/run/wait/term lifecycle.

pub mod bus;
pub mod cli;
pub mod config;
pub mod meter;
pub mod modbus;
pub mod output;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use bus::{Bus, BusMessage, BusReader, BusWriter};
pub use config::Config;
pub use meter::{decode, MeterModel, MeterVariant, Reading};
pub use modbus::{Connector, RegisterReader};
pub use output::{DataFormatter, DataSender};
pub use services::{Pipeline, PipelineReport, TaskHarness, TaskRoutine, TaskState};
pub use utils::error::GatewayError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
