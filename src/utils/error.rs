use thiserror::Error;

use crate::services::lifecycle::TaskState;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport connect error: {0}")]
    TransportConnect(String),

    #[error("Transport read error: {0}")]
    TransportRead(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration section missing: {0}")]
    ConfigMissing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CRC checksum mismatch (expected 0x{expected:04x}, received 0x{received:04x})")]
    Crc { expected: u16, received: u16 },

    #[error("Invalid response from device: {0}")]
    InvalidResponse(String),

    #[error("Device returned exception code 0x{0:02x}")]
    Exception(u8),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Unexpected bus payload size: expected {expected} bytes, got {actual}")]
    PayloadSize { expected: usize, actual: usize },

    #[error("Delivery to {destination} failed: {reason}")]
    Delivery { destination: String, reason: String },

    #[error("Task '{task}' cannot {operation} while {state}")]
    TaskState {
        task: String,
        operation: &'static str,
        state: TaskState,
    },

    #[error("Task '{0}' panicked")]
    TaskPanicked(String),

    #[error("Failed to spawn task '{task}': {reason}")]
    Spawn { task: String, reason: String },
}

impl GatewayError {
    /// Short stable label for log lines.
    pub fn as_label(&self) -> &'static str {
        match self {
            GatewayError::TransportConnect(_) => "transport_connect",
            GatewayError::TransportRead(_) => "transport_read",
            GatewayError::Decode(_) => "decode",
            GatewayError::ConfigMissing(_) => "config_missing",
            GatewayError::Config(_) => "config",
            GatewayError::Crc { .. } => "crc",
            GatewayError::InvalidResponse(_) => "invalid_response",
            GatewayError::Exception(_) => "modbus_exception",
            GatewayError::Timeout => "timeout",
            GatewayError::PayloadSize { .. } => "payload_size",
            GatewayError::Delivery { .. } => "delivery",
            GatewayError::TaskState { .. } => "task_state",
            GatewayError::TaskPanicked(_) => "task_panicked",
            GatewayError::Spawn { .. } => "spawn",
        }
    }

    /// Errors raised by the field-bus link while a poll is in flight.
    ///
    /// Framing problems count as read failures: the poll produced no usable
    /// register block.
    pub fn into_read_failure(self) -> Self {
        match self {
            GatewayError::Crc { .. }
            | GatewayError::InvalidResponse(_)
            | GatewayError::Exception(_)
            | GatewayError::Timeout => GatewayError::TransportRead(self.to_string()),
            other => other,
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => GatewayError::Timeout,
            _ => GatewayError::TransportRead(format!("IO error: {}", err)),
        }
    }
}

impl From<serialport::Error> for GatewayError {
    fn from(err: serialport::Error) -> Self {
        GatewayError::TransportConnect(format!("Serial port error: {}", err))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let destination = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "http".to_string());
        let reason = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        GatewayError::Delivery { destination, reason }
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::Config(format!("TOML parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_errors_become_read_failures() {
        let err = GatewayError::Crc { expected: 0x1234, received: 0x4321 }.into_read_failure();
        assert_eq!(err.as_label(), "transport_read");

        let err = GatewayError::Config("bad".to_string()).into_read_failure();
        assert_eq!(err.as_label(), "config");
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(matches!(GatewayError::from(io), GatewayError::Timeout));
    }
}
