pub mod client;
pub mod crc;
pub mod protocol;

pub use client::{Connector, FieldBusEndpoint, RegisterReader, RtuClient, TcpClient};
pub use crc::crc16_modbus;
pub use protocol::{ReadRequest, RegisterKind};
