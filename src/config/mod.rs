pub mod settings;

pub use settings::{
    BusConfig, Config, ConsoleSinkConfig, FieldBusLink, InfluxSinkConfig, ModbusSourceConfig,
    MqttSinkConfig, ParityConfig, RtuSettings, TcpSettings,
};
