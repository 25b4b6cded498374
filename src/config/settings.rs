use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::meter::MeterVariant;
use crate::output::OutputFormat;
use crate::utils::error::GatewayError;

/// Whole-gateway settings, loaded once at startup.
///
/// Every section is optional. A missing source list or sink table means
/// the corresponding task is not started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    #[serde(rename = "modbus_source", skip_serializing_if = "Vec::is_empty")]
    pub modbus_sources: Vec<ModbusSourceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub influx_sink: Option<InfluxSinkConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_sink: Option<MqttSinkConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_sink: Option<ConsoleSinkConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusSourceConfig {
    pub name: String,
    pub meter: MeterVariant,
    pub poll_interval_secs: u64,
    pub slave_id: u8,
    pub link: FieldBusLink,
}

impl Default for ModbusSourceConfig {
    fn default() -> Self {
        Self {
            name: "meter1".to_string(),
            meter: MeterVariant::ModelA,
            poll_interval_secs: 10,
            slave_id: 25,
            link: FieldBusLink::Rtu(RtuSettings::default()),
        }
    }
}

impl ModbusSourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::Config("modbus_source.name must not be empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(GatewayError::Config(format!(
                "modbus_source '{}': poll_interval_secs must be at least 1",
                self.name
            )));
        }
        match &self.link {
            FieldBusLink::Rtu(rtu) => {
                if !(1..=247).contains(&self.slave_id) {
                    return Err(GatewayError::Config(format!(
                        "modbus_source '{}': RTU slave id {} outside 1..=247",
                        self.name, self.slave_id
                    )));
                }
                rtu.validate()
            }
            FieldBusLink::Tcp(tcp) => tcp.validate(),
        }
    }
}

/// Physical link to the meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldBusLink {
    Rtu(RtuSettings),
    Tcp(TcpSettings),
}

impl Default for FieldBusLink {
    fn default() -> Self {
        FieldBusLink::Rtu(RtuSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParityConfig {
    #[serde(rename = "N", alias = "none")]
    None,
    #[serde(rename = "E", alias = "even")]
    Even,
    #[serde(rename = "O", alias = "odd")]
    Odd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuSettings {
    pub path: String,
    pub baud: u32,
    pub parity: ParityConfig,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub timeout_ms: u64,
}

impl Default for RtuSettings {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud: 9600,
            parity: ParityConfig::Even,
            data_bits: 8,
            stop_bits: 1,
            timeout_ms: 1000,
        }
    }
}

impl RtuSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.path.trim().is_empty() {
            return Err(GatewayError::Config("RTU path must not be empty".to_string()));
        }
        if self.baud == 0 {
            return Err(GatewayError::Config("RTU baud rate must be positive".to_string()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(GatewayError::Config(format!(
                "RTU data bits {} outside 5..=8",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(GatewayError::Config(format!(
                "RTU stop bits {} outside 1..=2",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSettings {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            timeout_ms: 1000,
        }
    }
}

impl TcpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.host.trim().is_empty() {
            return Err(GatewayError::Config("TCP host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(GatewayError::Config("TCP port must not be 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxSinkConfig {
    pub url: String,
    pub token: String,
    /// Sent as the `org` query parameter when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    pub measurement: String,
    pub timeout_ms: u64,
}

impl Default for InfluxSinkConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            org: None,
            measurement: "meter1".to_string(),
            timeout_ms: 1000,
        }
    }
}

impl InfluxSinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(GatewayError::Config(format!(
                "influx_sink.url '{}' is not an http(s) URL",
                self.url
            )));
        }
        validate_measurement(&self.measurement)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSinkConfig {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub topic: String,
    /// Reported as `source` in each published payload.
    pub source: String,
    pub keep_alive_secs: u64,
    pub timeout_ms: u64,
}

impl Default for MqttSinkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: None,
            topic: "meters/meter1".to_string(),
            source: "meter1".to_string(),
            keep_alive_secs: 60,
            timeout_ms: 1000,
        }
    }
}

impl MqttSinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Configured client id, or a fresh one when none is set.
    pub fn resolved_client_id(&self) -> String {
        match self.client_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("meter-gateway-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.host.trim().is_empty() {
            return Err(GatewayError::Config("mqtt_sink.host must not be empty".to_string()));
        }
        if self.topic.is_empty() || self.topic.contains('#') || self.topic.contains('+') {
            return Err(GatewayError::Config(format!(
                "mqtt_sink.topic '{}' is not a publishable topic",
                self.topic
            )));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(GatewayError::Config(
                "mqtt_sink.password given without username".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSinkConfig {
    pub format: OutputFormat,
    pub measurement: String,
}

impl Default for ConsoleSinkConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Line,
            measurement: "meter1".to_string(),
        }
    }
}

impl ConsoleSinkConfig {
    pub fn validate(&self) -> Result<(), GatewayError> {
        validate_measurement(&self.measurement)
    }
}

fn validate_measurement(measurement: &str) -> Result<(), GatewayError> {
    if measurement.is_empty() || measurement.contains(|c: char| c.is_whitespace() || c == ',') {
        return Err(GatewayError::Config(format!(
            "measurement '{}' must be non-empty without spaces or commas",
            measurement
        )));
    }
    Ok(())
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("📄 Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, GatewayError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, GatewayError> {
        toml::to_string_pretty(self)
            .map_err(|e| GatewayError::Config(format!("TOML serialization error: {}", e)))
    }

    /// A fully populated configuration used as a starting template.
    pub fn example() -> Self {
        Self {
            bus: BusConfig::default(),
            modbus_sources: vec![ModbusSourceConfig::default()],
            influx_sink: Some(InfluxSinkConfig {
                url: "http://localhost:8086/api/v2/write?bucket=meters&precision=s".to_string(),
                org: Some("org".to_string()),
                ..InfluxSinkConfig::default()
            }),
            mqtt_sink: Some(MqttSinkConfig::default()),
            console_sink: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sections_stay_missing() {
        let config = Config::from_toml_str("[bus]\ncapacity = 8\n").unwrap();
        assert_eq!(config.bus.capacity, 8);
        assert!(config.modbus_sources.is_empty());
        assert!(config.influx_sink.is_none());
        assert!(config.mqtt_sink.is_none());
        assert!(config.console_sink.is_none());
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let toml = r#"
[[modbus_source]]
name = "incomer"

[modbus_source.link]
type = "rtu"
baud = 19200

[mqtt_sink]
topic = "site/incomer"
"#;
        let config = Config::from_toml_str(toml).unwrap();
        let source = &config.modbus_sources[0];
        assert_eq!(source.name, "incomer");
        assert_eq!(source.meter, MeterVariant::ModelA);
        assert_eq!(source.slave_id, 25);
        assert_eq!(source.poll_interval_secs, 10);
        match &source.link {
            FieldBusLink::Rtu(rtu) => {
                assert_eq!(rtu.baud, 19200);
                assert_eq!(rtu.path, "/dev/ttyUSB0");
                assert_eq!(rtu.parity, ParityConfig::Even);
            }
            other => panic!("unexpected link {:?}", other),
        }

        let mqtt = config.mqtt_sink.unwrap();
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.topic, "site/incomer");
        assert!(mqtt.username.is_none());
    }

    #[test]
    fn test_tcp_link_and_meter_alias() {
        let toml = r#"
[[modbus_source]]
meter = "pzem016"
slave_id = 1

[modbus_source.link]
type = "tcp"
host = "10.0.0.20"
"#;
        let config = Config::from_toml_str(toml).unwrap();
        let source = &config.modbus_sources[0];
        assert_eq!(source.meter, MeterVariant::ModelB);
        assert_eq!(
            source.link,
            FieldBusLink::Tcp(TcpSettings {
                host: "10.0.0.20".to_string(),
                ..TcpSettings::default()
            })
        );
        assert!(source.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut source = ModbusSourceConfig::default();
        source.slave_id = 0;
        assert!(source.validate().is_err());

        let mut source = ModbusSourceConfig::default();
        source.link = FieldBusLink::Rtu(RtuSettings {
            stop_bits: 3,
            ..RtuSettings::default()
        });
        assert!(source.validate().is_err());

        assert!(InfluxSinkConfig::default().validate().is_err());

        let mqtt = MqttSinkConfig {
            topic: "meters/#".to_string(),
            ..MqttSinkConfig::default()
        };
        assert!(mqtt.validate().is_err());
    }

    #[test]
    fn test_influx_org_is_optional() {
        let config = Config::from_toml_str(
            "[influx_sink]\nurl = \"http://db:8086/api/v2/write?bucket=meters\"\norg = \"acme\"\n",
        )
        .unwrap();
        assert_eq!(config.influx_sink.unwrap().org.as_deref(), Some("acme"));

        let config =
            Config::from_toml_str("[influx_sink]\nurl = \"http://db:8086/api/v2/write\"\n").unwrap();
        assert!(config.influx_sink.unwrap().org.is_none());
    }

    #[test]
    fn test_example_round_trips_through_toml() {
        let example = Config::example();
        let text = example.to_toml_string().unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed, example);
    }

    #[test]
    fn test_client_id_generated_when_blank() {
        let mqtt = MqttSinkConfig {
            client_id: Some("  ".to_string()),
            ..MqttSinkConfig::default()
        };
        assert!(mqtt.resolved_client_id().starts_with("meter-gateway-"));

        let mqtt = MqttSinkConfig {
            client_id: Some("gw-01".to_string()),
            ..MqttSinkConfig::default()
        };
        assert_eq!(mqtt.resolved_client_id(), "gw-01");
    }
}
