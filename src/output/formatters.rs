use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::meter::Reading;

/// Output shapes a sink can produce from a Reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Line,
    Json,
}

impl OutputFormat {
    /// Formatter for this shape, tagged with `name` (measurement or source).
    pub fn formatter(self, name: &str) -> Box<dyn DataFormatter> {
        match self {
            OutputFormat::Line => Box::new(LineProtocolFormatter::new(name)),
            OutputFormat::Json => Box::new(JsonFormatter::new(name)),
        }
    }
}

pub trait DataFormatter: Send + Sync {
    fn format_reading(&self, reading: &Reading) -> String;
    fn format_name(&self) -> &str;
}

/// InfluxDB line protocol, one line per Reading, no timestamp (server time).
pub struct LineProtocolFormatter {
    measurement: String,
}

impl LineProtocolFormatter {
    pub fn new(measurement: &str) -> Self {
        Self {
            measurement: measurement.to_string(),
        }
    }
}

impl DataFormatter for LineProtocolFormatter {
    fn format_reading(&self, reading: &Reading) -> String {
        format!(
            "{} voltage={:.6},current={:.6},power={:.6},reactive_power={:.6},power_factor={:.6},freq={:.6},import_active={:.6},export_active={:.6}",
            self.measurement,
            f64::from(reading.voltage),
            f64::from(reading.current),
            f64::from(reading.active_power),
            f64::from(reading.reactive_power),
            f64::from(reading.power_factor),
            f64::from(reading.frequency),
            f64::from(reading.import_energy),
            f64::from(reading.export_energy),
        )
    }

    fn format_name(&self) -> &str {
        "line"
    }
}

pub struct JsonFormatter {
    source: String,
}

impl JsonFormatter {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
        }
    }
}

impl DataFormatter for JsonFormatter {
    fn format_reading(&self, reading: &Reading) -> String {
        serde_json::json!({
            "source": self.source,
            "timestamp": Utc::now().to_rfc3339(),
            "voltage": reading.voltage,
            "current": reading.current,
            "active_power": reading.active_power,
            "reactive_power": reading.reactive_power,
            "power_factor": reading.power_factor,
            "frequency": reading.frequency,
            "import_energy": reading.import_energy,
            "export_energy": reading.export_energy,
        })
        .to_string()
    }

    fn format_name(&self) -> &str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::fixtures::scenario_reading;

    #[test]
    fn test_line_protocol_scenario() {
        let line = LineProtocolFormatter::new("meter1").format_reading(&scenario_reading());
        assert_eq!(
            line,
            "meter1 voltage=220.000000,current=5.000000,power=1000.000000,reactive_power=50.000000,power_factor=0.980000,freq=50.000000,import_active=12345.599609,export_active=0.000000"
        );
    }

    #[test]
    fn test_line_protocol_values_reparse() {
        let reading = Reading {
            voltage: 231.37,
            current: 0.123,
            active_power: -15.5,
            reactive_power: 3.3,
            power_factor: 0.71,
            frequency: 49.98,
            import_energy: 98765.43,
            export_energy: 12.01,
        };
        let line = LineProtocolFormatter::new("m").format_reading(&reading);
        let (measurement, fields) = line.split_once(' ').unwrap();
        assert_eq!(measurement, "m");

        let values: Vec<f32> = fields
            .split(',')
            .map(|kv| kv.split_once('=').unwrap().1.parse::<f64>().unwrap() as f32)
            .collect();
        let expected = [
            reading.voltage,
            reading.current,
            reading.active_power,
            reading.reactive_power,
            reading.power_factor,
            reading.frequency,
            reading.import_energy,
            reading.export_energy,
        ];
        assert_eq!(values.len(), expected.len());
        for (got, want) in values.iter().zip(expected.iter()) {
            assert!((got - want).abs() <= want.abs() * f32::EPSILON * 4.0 + 1e-6, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_json_payload_fields() {
        let payload = JsonFormatter::new("meter1").format_reading(&scenario_reading());
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["source"], "meter1");
        assert_eq!(value["voltage"].as_f64().unwrap() as f32, 220.0);
        assert_eq!(value["import_energy"].as_f64().unwrap() as f32, 12345.6);
        assert!(chrono::DateTime::parse_from_rfc3339(value["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_output_format_selects_formatter() {
        assert_eq!(OutputFormat::Line.formatter("x").format_name(), "line");
        assert_eq!(OutputFormat::Json.formatter("x").format_name(), "json");
    }
}
