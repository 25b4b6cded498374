use log::{debug, info, warn};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use rumqttc::{Client, Connection, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS};
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::settings::{InfluxSinkConfig, MqttSinkConfig};
use crate::utils::error::GatewayError;

const MQTT_REQUEST_CAPACITY: usize = 16;

/// Delivery transport owned by one sink.
pub trait DataSender: Send {
    fn connect(&mut self) -> Result<(), GatewayError>;
    fn send(&mut self, payload: &str) -> Result<(), GatewayError>;
    fn sender_type(&self) -> &str;
    fn destination(&self) -> &str;
}

pub struct ConsoleSender;

impl DataSender for ConsoleSender {
    fn connect(&mut self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn send(&mut self, payload: &str) -> Result<(), GatewayError> {
        println!("{}", payload);
        Ok(())
    }

    fn sender_type(&self) -> &str {
        "console"
    }

    fn destination(&self) -> &str {
        "stdout"
    }
}

/// Writes line protocol to an InfluxDB v2 `/api/v2/write` endpoint.
pub struct InfluxSender {
    client: reqwest::blocking::Client,
    url: String,
    token: String,
    org: Option<String>,
}

impl InfluxSender {
    pub fn new(config: &InfluxSinkConfig) -> Result<Self, GatewayError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::TransportConnect(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            token: config.token.clone(),
            org: config
                .org
                .as_deref()
                .map(str::trim)
                .filter(|org| !org.is_empty())
                .map(str::to_string),
        })
    }
}

impl DataSender for InfluxSender {
    fn connect(&mut self) -> Result<(), GatewayError> {
        // HTTP is connectionless from our side; reqwest pools per request.
        info!("📈 InfluxDB writer ready for {}", self.url);
        Ok(())
    }

    fn send(&mut self, payload: &str) -> Result<(), GatewayError> {
        let mut request = self.client.post(&self.url);
        if let Some(org) = &self.org {
            request = request.query(&[("org", org)]);
        }
        let response = request
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(payload.to_string())
            .send()?;

        let status = response.status();
        response.error_for_status()?;
        debug!("📈 InfluxDB accepted write ({})", status);
        Ok(())
    }

    fn sender_type(&self) -> &str {
        "influx"
    }

    fn destination(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Publishes each payload at QoS 0 through the synchronous rumqttc client.
pub struct MqttSender {
    client: Client,
    connection: Connection,
    topic: String,
    broker: String,
    timeout: Duration,
    state: LinkState,
}

impl MqttSender {
    pub fn new(config: &MqttSinkConfig) -> Self {
        let client_id = config.resolved_client_id();
        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, connection) = Client::new(options, MQTT_REQUEST_CAPACITY);
        info!("📻 MQTT client '{}' for {}:{}", client_id, config.host, config.port);

        Self {
            client,
            connection,
            topic: config.topic.clone(),
            broker: format!("{}:{}", config.host, config.port),
            timeout: config.timeout(),
            state: LinkState::Disconnected,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    fn set_state(&mut self, next: LinkState) {
        if self.state != next {
            info!("📻 MQTT link to {}: {} -> {}", self.broker, self.state, next);
            self.state = next;
        }
    }

    fn remaining(deadline: Instant) -> Option<Duration> {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            None
        } else {
            Some(left)
        }
    }
}

impl DataSender for MqttSender {
    fn connect(&mut self) -> Result<(), GatewayError> {
        let deadline = Instant::now() + self.timeout;
        while let Some(left) = Self::remaining(deadline) {
            match self.connection.recv_timeout(left) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(GatewayError::TransportConnect(format!(
                            "Broker {} refused connection: {:?}",
                            self.broker, ack.code
                        )));
                    }
                    self.set_state(LinkState::Connected);
                    return Ok(());
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    return Err(GatewayError::TransportConnect(format!(
                        "Broker {}: {}",
                        self.broker, e
                    )))
                }
                Err(_) => break,
            }
        }
        Err(GatewayError::TransportConnect(format!(
            "Broker {}: no CONNACK within {:?}",
            self.broker, self.timeout
        )))
    }

    fn send(&mut self, payload: &str) -> Result<(), GatewayError> {
        self.client
            .try_publish(self.topic.clone(), QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| GatewayError::Delivery {
                destination: self.topic.clone(),
                reason: e.to_string(),
            })?;

        let deadline = Instant::now() + self.timeout;
        while let Some(left) = Self::remaining(deadline) {
            match self.connection.recv_timeout(left) {
                Ok(Ok(Event::Outgoing(Outgoing::Publish(_)))) => {
                    self.set_state(LinkState::Connected);
                    return Ok(());
                }
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => self.set_state(LinkState::Connected),
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    warn!("📻 MQTT event loop error: {}", e);
                    self.set_state(LinkState::Disconnected);
                    return Err(GatewayError::Delivery {
                        destination: self.topic.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => break,
            }
        }
        Err(GatewayError::Delivery {
            destination: self.topic.clone(),
            reason: format!("publish not written within {:?}", self.timeout),
        })
    }

    fn sender_type(&self) -> &str {
        "mqtt"
    }

    fn destination(&self) -> &str {
        &self.topic
    }
}
