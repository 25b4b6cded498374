use serde::{Deserialize, Serialize};

use super::crc::{append_crc, verify_crc};
use crate::utils::error::GatewayError;

/// Largest register count a single read request may ask for.
pub const MAX_READ_COUNT: u16 = 125;

const EXCEPTION_FLAG: u8 = 0x80;
const MBAP_PROTOCOL_ID: u16 = 0x0000;
pub const MBAP_HEADER_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Holding,
    Input,
}

impl RegisterKind {
    pub fn function_code(self) -> u8 {
        match self {
            RegisterKind::Holding => 0x03,
            RegisterKind::Input => 0x04,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub kind: RegisterKind,
    pub address: u16,
    pub count: u16,
}

impl ReadRequest {
    pub fn new(kind: RegisterKind, address: u16, count: u16) -> Result<Self, GatewayError> {
        if count == 0 || count > MAX_READ_COUNT {
            return Err(GatewayError::Config(format!(
                "Register count {} out of range 1..={}",
                count, MAX_READ_COUNT
            )));
        }
        Ok(Self { kind, address, count })
    }

    pub fn to_pdu(&self) -> [u8; 5] {
        let addr = self.address.to_be_bytes();
        let count = self.count.to_be_bytes();
        [self.kind.function_code(), addr[0], addr[1], count[0], count[1]]
    }

    /// Extracts register words from a response PDU (function code onwards).
    pub fn parse_response(&self, pdu: &[u8]) -> Result<Vec<u16>, GatewayError> {
        let function = *pdu
            .first()
            .ok_or_else(|| GatewayError::InvalidResponse("Empty PDU".to_string()))?;

        if function == self.kind.function_code() | EXCEPTION_FLAG {
            let code = pdu.get(1).copied().unwrap_or(0);
            return Err(GatewayError::Exception(code));
        }
        if function != self.kind.function_code() {
            return Err(GatewayError::InvalidResponse(format!(
                "Unexpected function code: 0x{:02x}",
                function
            )));
        }

        let expected_bytes = self.count as usize * 2;
        let byte_count = pdu.get(1).copied().unwrap_or(0) as usize;
        if byte_count != expected_bytes || pdu.len() != 2 + expected_bytes {
            return Err(GatewayError::InvalidResponse(format!(
                "Expected {} data bytes, byte count {} in a {}-byte PDU",
                expected_bytes,
                byte_count,
                pdu.len()
            )));
        }

        Ok(pdu[2..]
            .chunks_exact(2)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
            .collect())
    }
}

/// `slave | PDU | CRC`
pub fn encode_rtu_frame(slave_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(slave_id);
    frame.extend_from_slice(pdu);
    append_crc(&mut frame);
    frame
}

/// Validates an RTU response frame and returns its PDU.
pub fn decode_rtu_frame(slave_id: u8, frame: &[u8]) -> Result<&[u8], GatewayError> {
    if frame.len() < 5 {
        return Err(GatewayError::InvalidResponse(format!(
            "Response too short: {} bytes",
            frame.len()
        )));
    }
    verify_crc(frame).map_err(|(expected, received)| GatewayError::Crc { expected, received })?;
    if frame[0] != slave_id {
        return Err(GatewayError::InvalidResponse(format!(
            "Response from slave {} while talking to {}",
            frame[0], slave_id
        )));
    }
    Ok(&frame[1..frame.len() - 2])
}

/// Total RTU response length given its first three bytes.
pub fn rtu_response_len(head: [u8; 3]) -> usize {
    if head[1] & EXCEPTION_FLAG != 0 {
        // slave, function, exception code, CRC
        5
    } else {
        3 + head[2] as usize + 2
    }
}

/// `transaction | protocol | length | unit | PDU`
pub fn encode_tcp_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&MBAP_PROTOCOL_ID.to_be_bytes());
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn parse(bytes: [u8; MBAP_HEADER_LEN]) -> Result<Self, GatewayError> {
        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        };
        if header.protocol_id != MBAP_PROTOCOL_ID {
            return Err(GatewayError::InvalidResponse(format!(
                "Unknown protocol id {}",
                header.protocol_id
            )));
        }
        if header.length < 2 {
            return Err(GatewayError::InvalidResponse(format!(
                "MBAP length {} too small",
                header.length
            )));
        }
        Ok(header)
    }

    /// Bytes that follow the header on the wire.
    pub fn pdu_len(&self) -> usize {
        self.length as usize - 1
    }
}
