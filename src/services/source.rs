use log::{debug, error, info};
use std::fmt;
use std::thread;
use std::time::Duration;

use super::lifecycle::TaskRoutine;
use crate::bus::{Bus, BusMessage, BusWriter};
use crate::config::settings::ModbusSourceConfig;
use crate::meter::{MeterModel, MeterVariant};
use crate::modbus::{Connector, FieldBusEndpoint};
use crate::utils::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Faulted => write!(f, "faulted"),
        }
    }
}

pub struct SourceSettings<C> {
    pub name: String,
    pub variant: MeterVariant,
    pub poll_interval: Duration,
    pub connector: C,
}

impl From<&ModbusSourceConfig> for SourceSettings<FieldBusEndpoint> {
    fn from(config: &ModbusSourceConfig) -> Self {
        Self {
            name: config.name.clone(),
            variant: config.meter,
            poll_interval: config.poll_interval(),
            connector: FieldBusEndpoint::new(config.link.clone(), config.slave_id),
        }
    }
}

/// Polls one meter on a fixed interval and writes each Reading to the Bus.
pub struct SourceTask<C: Connector + 'static> {
    name: String,
    model: &'static dyn MeterModel,
    poll_interval: Duration,
    connector: C,
    writer: Option<BusWriter>,
    state: ConnectionState,
    published: u64,
}

impl<C: Connector + 'static> SourceTask<C> {
    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            info!(
                "🔌 Source '{}' ({}): {} -> {}",
                self.name,
                self.connector.endpoint(),
                self.state,
                next
            );
            self.state = next;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    fn poll_loop(&mut self) -> Result<(), GatewayError> {
        let mut reader = match self.connector.connect() {
            Ok(reader) => reader,
            Err(e) => {
                self.set_state(ConnectionState::Faulted);
                return Err(e);
            }
        };
        self.set_state(ConnectionState::Connected);

        loop {
            thread::sleep(self.poll_interval);

            match self.model.poll(reader.as_mut()) {
                Ok(reading) => {
                    let receivers = self
                        .writer
                        .as_ref()
                        .map_or(0, |writer| writer.write(BusMessage::from(reading)));
                    self.published += 1;
                    debug!(
                        "📊 Source '{}': {:.1} V {:.3} A {:.1} W -> {} reader(s)",
                        self.name, reading.voltage, reading.current, reading.active_power, receivers
                    );
                }
                Err(e) => {
                    self.set_state(ConnectionState::Faulted);
                    error!("❌ Source '{}' poll failed on {}: {}", self.name, reader.describe(), e);
                    return Err(e);
                }
            }
        }
    }
}

impl<C: Connector + 'static> TaskRoutine for SourceTask<C> {
    type Config = SourceSettings<C>;

    fn init(config: Self::Config, bus: &Bus) -> Result<Self, GatewayError> {
        if config.name.trim().is_empty() {
            return Err(GatewayError::Config("source name must not be empty".to_string()));
        }
        if config.poll_interval.is_zero() {
            return Err(GatewayError::Config(format!(
                "source '{}': poll interval must be positive",
                config.name
            )));
        }

        info!(
            "📡 Source '{}': {} meter at {}, every {:?}",
            config.name,
            config.variant,
            config.connector.endpoint(),
            config.poll_interval
        );

        Ok(Self {
            name: config.name,
            model: config.variant.model(),
            poll_interval: config.poll_interval,
            connector: config.connector,
            writer: Some(bus.writer()),
            state: ConnectionState::Disconnected,
            published: 0,
        })
    }

    fn run(&mut self) -> Result<(), GatewayError> {
        let result = self.poll_loop();
        // Sinks see the Bus close only once every writer is gone.
        self.writer = None;
        result
    }

    fn term(mut self) {
        self.set_state(ConnectionState::Disconnected);
        info!("🛑 Source '{}' released after {} reading(s)", self.name, self.published);
    }
}
