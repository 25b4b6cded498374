use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::utils::error::GatewayError;

/// One decoded snapshot of a meter's electrical measurements.
///
/// Energies are cumulative counters as reported by the meter. Fields a
/// model does not measure stay at `0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub voltage: f32,
    pub current: f32,
    pub active_power: f32,
    pub reactive_power: f32,
    pub power_factor: f32,
    pub frequency: f32,
    pub import_energy: f32,
    pub export_energy: f32,
}

impl Reading {
    /// Size of the Bus encoding: eight little-endian `f32`.
    pub const WIRE_LEN: usize = 8 * 4;

    fn fields(&self) -> [f32; 8] {
        [
            self.voltage,
            self.current,
            self.active_power,
            self.reactive_power,
            self.power_factor,
            self.frequency,
            self.import_energy,
            self.export_energy,
        ]
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        for value in self.fields() {
            buf.put_f32_le(value);
        }
        buf.freeze()
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, GatewayError> {
        if payload.len() != Self::WIRE_LEN {
            return Err(GatewayError::PayloadSize {
                expected: Self::WIRE_LEN,
                actual: payload.len(),
            });
        }
        let mut buf = payload;
        Ok(Self {
            voltage: buf.get_f32_le(),
            current: buf.get_f32_le(),
            active_power: buf.get_f32_le(),
            reactive_power: buf.get_f32_le(),
            power_factor: buf.get_f32_le(),
            frequency: buf.get_f32_le(),
            import_energy: buf.get_f32_le(),
            export_energy: buf.get_f32_le(),
        })
    }

    /// Bitwise equality, used where `NaN` must compare equal to itself.
    pub fn bit_eq(&self, other: &Reading) -> bool {
        self.fields()
            .iter()
            .zip(other.fields().iter())
            .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_encoding_layout() {
        let reading = Reading {
            voltage: 230.5,
            export_energy: 7.25,
            ..Reading::default()
        };
        let bytes = reading.to_bytes();
        assert_eq!(bytes.len(), Reading::WIRE_LEN);
        assert_eq!(&bytes[..4], &230.5f32.to_le_bytes());
        assert_eq!(&bytes[28..], &7.25f32.to_le_bytes());
        assert_eq!(Reading::from_bytes(&bytes).unwrap(), reading);
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let err = Reading::from_bytes(&[0u8; 31]).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::PayloadSize { expected: 32, actual: 31 }
        ));
    }

    #[test]
    fn test_bit_eq_treats_nan_as_equal() {
        let reading = Reading {
            frequency: f32::NAN,
            ..Reading::default()
        };
        assert!(reading.bit_eq(&reading));
        assert_ne!(reading, reading);
    }
}
