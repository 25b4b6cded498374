use log::{debug, error, info};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use super::protocol::{
    decode_rtu_frame, encode_rtu_frame, encode_tcp_frame, rtu_response_len, MbapHeader,
    ReadRequest, RegisterKind, MBAP_HEADER_LEN,
};
use crate::config::settings::{FieldBusLink, ParityConfig, RtuSettings, TcpSettings};
use crate::utils::error::GatewayError;

/// Blocking register access on an open field-bus link.
pub trait RegisterReader: Send {
    fn read_registers(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, GatewayError>;

    fn describe(&self) -> String;
}

/// Opens a field-bus link. Sources connect once, from their own thread.
pub trait Connector: Send {
    fn connect(&self) -> Result<Box<dyn RegisterReader>, GatewayError>;

    fn endpoint(&self) -> String;
}

pub struct RtuClient<P = Box<dyn SerialPort>> {
    port: P,
    slave_id: u8,
    label: String,
}

impl RtuClient {
    pub fn open(settings: &RtuSettings, slave_id: u8) -> Result<Self, GatewayError> {
        info!("🔌 Connecting to Modbus RTU port: {}", settings.path);
        info!(
            "⚙️  Configuration: {} baud, parity {:?}, {} data bits, {} stop bits",
            settings.baud, settings.parity, settings.data_bits, settings.stop_bits
        );

        let parity = match settings.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };
        let data_bits = match settings.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let stop_bits = match settings.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };

        let port = serialport::new(&settings.path, settings.baud)
            .timeout(settings.timeout())
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .open()
            .map_err(|e| {
                error!("❌ Failed to open serial port {}: {}", settings.path, e);
                GatewayError::TransportConnect(format!("Failed to open {}: {}", settings.path, e))
            })?;

        info!("✅ Modbus RTU connection established on {}", settings.path);
        Ok(Self::with_port(port, slave_id, format!("rtu:{}#{}", settings.path, slave_id)))
    }
}

impl<P: Read + Write + Send> RtuClient<P> {
    pub fn with_port(port: P, slave_id: u8, label: String) -> Self {
        Self { port, slave_id, label }
    }
}

impl<P: Read + Write + Send> RegisterReader for RtuClient<P> {
    fn read_registers(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, GatewayError> {
        let request = ReadRequest::new(kind, address, count)?;
        let frame = encode_rtu_frame(self.slave_id, &request.to_pdu());
        debug!("📤 {} request: {}", self.label, hex::encode(&frame));

        self.port.write_all(&frame)?;
        self.port.flush()?;

        let mut head = [0u8; 3];
        self.port.read_exact(&mut head)?;
        let mut response = vec![0u8; rtu_response_len(head)];
        response[..3].copy_from_slice(&head);
        self.port.read_exact(&mut response[3..])?;
        debug!("📥 {} response: {}", self.label, hex::encode(&response));

        let pdu = decode_rtu_frame(self.slave_id, &response)?;
        request.parse_response(pdu)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

pub struct TcpClient<S = TcpStream> {
    stream: S,
    unit_id: u8,
    next_transaction: u16,
    label: String,
}

impl TcpClient {
    pub fn open(settings: &TcpSettings, unit_id: u8) -> Result<Self, GatewayError> {
        let address = settings.address();
        info!("🔌 Connecting to Modbus TCP server: {}", address);

        let socket_addr = address
            .to_socket_addrs()
            .map_err(|e| GatewayError::TransportConnect(format!("Cannot resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| GatewayError::TransportConnect(format!("No address for {}", address)))?;

        let connect_err =
            |e: std::io::Error| GatewayError::TransportConnect(format!("{}: {}", address, e));
        let stream = TcpStream::connect_timeout(&socket_addr, settings.timeout()).map_err(connect_err)?;
        stream.set_read_timeout(Some(settings.timeout())).map_err(connect_err)?;
        stream.set_write_timeout(Some(settings.timeout())).map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;

        info!("✅ Modbus TCP connection established with {}", address);
        Ok(Self::with_stream(stream, unit_id, format!("tcp:{}#{}", address, unit_id)))
    }
}

impl<S: Read + Write + Send> TcpClient<S> {
    pub fn with_stream(stream: S, unit_id: u8, label: String) -> Self {
        Self {
            stream,
            unit_id,
            next_transaction: 0,
            label,
        }
    }
}

impl<S: Read + Write + Send> RegisterReader for TcpClient<S> {
    fn read_registers(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, GatewayError> {
        let request = ReadRequest::new(kind, address, count)?;
        let transaction_id = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);

        let frame = encode_tcp_frame(transaction_id, self.unit_id, &request.to_pdu());
        debug!("📤 {} request: {}", self.label, hex::encode(&frame));
        self.stream.write_all(&frame)?;
        self.stream.flush()?;

        let mut head = [0u8; MBAP_HEADER_LEN];
        self.stream.read_exact(&mut head)?;
        let header = MbapHeader::parse(head)?;
        let mut pdu = vec![0u8; header.pdu_len()];
        self.stream.read_exact(&mut pdu)?;
        debug!("📥 {} response: {}{}", self.label, hex::encode(head), hex::encode(&pdu));

        if header.transaction_id != transaction_id {
            return Err(GatewayError::InvalidResponse(format!(
                "Transaction id {} does not match request {}",
                header.transaction_id, transaction_id
            )));
        }
        if header.unit_id != self.unit_id {
            return Err(GatewayError::InvalidResponse(format!(
                "Response from unit {} while talking to {}",
                header.unit_id, self.unit_id
            )));
        }
        request.parse_response(&pdu)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Configured link plus the slave/unit id of the meter behind it.
#[derive(Debug, Clone)]
pub struct FieldBusEndpoint {
    pub link: FieldBusLink,
    pub slave_id: u8,
}

impl FieldBusEndpoint {
    pub fn new(link: FieldBusLink, slave_id: u8) -> Self {
        Self { link, slave_id }
    }
}

impl Connector for FieldBusEndpoint {
    fn connect(&self) -> Result<Box<dyn RegisterReader>, GatewayError> {
        match &self.link {
            FieldBusLink::Rtu(rtu) => Ok(Box::new(RtuClient::open(rtu, self.slave_id)?)),
            FieldBusLink::Tcp(tcp) => Ok(Box::new(TcpClient::open(tcp, self.slave_id)?)),
        }
    }

    fn endpoint(&self) -> String {
        match &self.link {
            FieldBusLink::Rtu(rtu) => format!("rtu:{}#{}", rtu.path, self.slave_id),
            FieldBusLink::Tcp(tcp) => format!("tcp:{}#{}", tcp.address(), self.slave_id),
        }
    }
}
