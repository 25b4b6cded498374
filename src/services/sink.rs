use log::{debug, info, warn};

use super::lifecycle::TaskRoutine;
use crate::bus::{Bus, BusReader};
use crate::config::settings::{ConsoleSinkConfig, InfluxSinkConfig, MqttSinkConfig};
use crate::meter::Reading;
use crate::output::{
    ConsoleSender, DataFormatter, DataSender, InfluxSender, JsonFormatter, LineProtocolFormatter,
    MqttSender,
};
use crate::utils::error::GatewayError;

/// What a sink does when a delivery fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log, drop the Reading, keep consuming.
    LogAndContinue,
    /// End the task with the error.
    Fatal,
}

pub struct SinkSettings {
    pub name: String,
    pub formatter: Box<dyn DataFormatter>,
    pub sender: Box<dyn DataSender>,
    pub on_failure: FailurePolicy,
}

impl SinkSettings {
    pub fn influx(config: &InfluxSinkConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        Ok(Self {
            name: "influx".to_string(),
            formatter: Box::new(LineProtocolFormatter::new(&config.measurement)),
            sender: Box::new(InfluxSender::new(config)?),
            on_failure: FailurePolicy::Fatal,
        })
    }

    pub fn mqtt(config: &MqttSinkConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        Ok(Self {
            name: "mqtt".to_string(),
            formatter: Box::new(JsonFormatter::new(&config.source)),
            sender: Box::new(MqttSender::new(config)),
            on_failure: FailurePolicy::LogAndContinue,
        })
    }

    pub fn console(config: &ConsoleSinkConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        Ok(Self {
            name: "console".to_string(),
            formatter: config.format.formatter(&config.measurement),
            sender: Box::new(ConsoleSender),
            on_failure: FailurePolicy::LogAndContinue,
        })
    }
}

/// Consumes Readings from its own Bus reader and delivers each one.
pub struct SinkTask {
    name: String,
    formatter: Box<dyn DataFormatter>,
    sender: Box<dyn DataSender>,
    on_failure: FailurePolicy,
    reader: BusReader,
    delivered: u64,
    skipped: u64,
}

impl SinkTask {
    fn deliver(&mut self, payload: &[u8]) -> Result<(), GatewayError> {
        let reading = match Reading::from_bytes(payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("⚠️  Sink '{}' skipped a message: {}", self.name, e);
                self.skipped += 1;
                return Ok(());
            }
        };

        let formatted = self.formatter.format_reading(&reading);
        match self.sender.send(&formatted) {
            Ok(()) => {
                self.delivered += 1;
                debug!("📤 Sink '{}' delivered to {}", self.name, self.sender.destination());
                Ok(())
            }
            Err(e) if self.on_failure == FailurePolicy::LogAndContinue => {
                warn!(
                    "⚠️  Sink '{}' could not deliver to {}: {}",
                    self.name,
                    self.sender.destination(),
                    e
                );
                self.skipped += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl TaskRoutine for SinkTask {
    type Config = SinkSettings;

    fn init(config: Self::Config, bus: &Bus) -> Result<Self, GatewayError> {
        info!(
            "📤 Sink '{}': {} via {} -> {}",
            config.name,
            config.formatter.format_name(),
            config.sender.sender_type(),
            config.sender.destination()
        );
        Ok(Self {
            name: config.name,
            formatter: config.formatter,
            sender: config.sender,
            on_failure: config.on_failure,
            reader: bus.attach(),
            delivered: 0,
            skipped: 0,
        })
    }

    fn run(&mut self) -> Result<(), GatewayError> {
        self.sender.connect()?;
        info!("✅ Sink '{}' connected to {}", self.name, self.sender.destination());

        while let Some(message) = self.reader.read() {
            self.deliver(message.payload())?;
        }

        info!("🔚 Sink '{}': bus closed", self.name);
        Ok(())
    }

    fn term(self) {
        info!(
            "🛑 Sink '{}' released: {} delivered, {} skipped, {} dropped by the bus",
            self.name,
            self.delivered,
            self.skipped,
            self.reader.dropped()
        );
    }
}
