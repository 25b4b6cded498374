pub mod formatters;
pub mod senders;

pub use formatters::{DataFormatter, JsonFormatter, LineProtocolFormatter, OutputFormat};
pub use senders::{ConsoleSender, DataSender, InfluxSender, LinkState, MqttSender};
