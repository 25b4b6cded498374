use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::reading::Reading;
use crate::modbus::{RegisterKind, RegisterReader};
use crate::utils::error::GatewayError;

/// Supported meter models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeterVariant {
    /// Three-phase DDS/DSSU666-class meter with IEEE-754 float registers.
    #[serde(rename = "model_a", alias = "dds666", alias = "dssu666")]
    ModelA,
    /// PZEM-016-class meter with scaled integer registers.
    #[serde(rename = "model_b", alias = "pzem016")]
    ModelB,
}

impl MeterVariant {
    /// Binds the variant to its register map. Done once per source.
    pub fn model(self) -> &'static dyn MeterModel {
        match self {
            MeterVariant::ModelA => &ModelARegisters,
            MeterVariant::ModelB => &ModelBRegisters,
        }
    }
}

impl fmt::Display for MeterVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterVariant::ModelA => write!(f, "model_a"),
            MeterVariant::ModelB => write!(f, "model_b"),
        }
    }
}

/// One contiguous read issued per poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBlock {
    pub kind: RegisterKind,
    pub address: u16,
    pub count: u16,
}

/// Raw words collected for one poll, one entry per block of the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub blocks: Vec<Vec<u16>>,
}

impl RegisterSnapshot {
    pub fn new(blocks: Vec<Vec<u16>>) -> Self {
        Self { blocks }
    }
}

/// Order of the two registers that carry a 32-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordOrder {
    /// First register holds bits 31..16.
    HighFirst,
    /// First register holds bits 15..0.
    LowFirst,
}

pub fn u32_from_words(words: [u16; 2], order: WordOrder) -> u32 {
    let (high, low) = match order {
        WordOrder::HighFirst => (words[0], words[1]),
        WordOrder::LowFirst => (words[1], words[0]),
    };
    (high as u32) << 16 | low as u32
}

pub fn f32_from_words(words: [u16; 2], order: WordOrder) -> f32 {
    f32::from_bits(u32_from_words(words, order))
}

/// Register blocks whose count and lengths match the plan of the model
/// decoding them. Only [`MeterModel::decode`] builds one.
#[derive(Debug, Clone, Copy)]
pub struct CheckedSnapshot<'a> {
    blocks: &'a [Vec<u16>],
}

impl<'a> CheckedSnapshot<'a> {
    fn new(blocks: &'a [Vec<u16>]) -> Self {
        Self { blocks }
    }

    /// Words of the `index`-th block of the plan.
    pub fn block(&self, index: usize) -> &'a [u16] {
        &self.blocks[index]
    }
}

fn pair(block: &[u16], offset: usize) -> [u16; 2] {
    [block[offset], block[offset + 1]]
}

fn scaled(raw: u32, divisor: f64) -> f32 {
    (raw as f64 / divisor) as f32
}

/// Register map and scaling rules of one meter model.
pub trait MeterModel: Send + Sync {
    fn variant(&self) -> MeterVariant;

    fn register_plan(&self) -> &'static [RegisterBlock];

    /// Decodes a snapshot whose shape already matches the plan.
    fn decode_checked(&self, snapshot: CheckedSnapshot<'_>) -> Reading;

    /// Pure mapping from raw words to a Reading.
    fn decode(&self, snapshot: &RegisterSnapshot) -> Result<Reading, GatewayError> {
        let plan = self.register_plan();
        if snapshot.blocks.len() != plan.len() {
            return Err(GatewayError::Decode(format!(
                "{}: expected {} register blocks, got {}",
                self.variant(),
                plan.len(),
                snapshot.blocks.len()
            )));
        }
        for (block, words) in plan.iter().zip(snapshot.blocks.iter()) {
            if words.len() != block.count as usize {
                return Err(GatewayError::Decode(format!(
                    "{}: block at 0x{:04x} expected {} words, got {}",
                    self.variant(),
                    block.address,
                    block.count,
                    words.len()
                )));
            }
        }
        Ok(self.decode_checked(CheckedSnapshot::new(&snapshot.blocks)))
    }

    /// Reads every block of the plan and decodes the result.
    ///
    /// Any failed read aborts the poll; nothing is retried here.
    fn poll(&self, reader: &mut dyn RegisterReader) -> Result<Reading, GatewayError> {
        let mut blocks = Vec::with_capacity(self.register_plan().len());
        for block in self.register_plan() {
            let words = reader
                .read_registers(block.kind, block.address, block.count)
                .map_err(GatewayError::into_read_failure)?;
            debug!(
                "{} words @0x{:04x} from {}: {}",
                words.len(),
                block.address,
                reader.describe(),
                hex::encode(words.iter().flat_map(|w| w.to_be_bytes()).collect::<Vec<u8>>())
            );
            blocks.push(words);
        }
        self.decode(&RegisterSnapshot::new(blocks))
    }
}

/// Float-register meter: nine float pairs at 0x2000 plus two energy counters.
pub struct ModelARegisters;

const MODEL_A_PLAN: [RegisterBlock; 3] = [
    RegisterBlock { kind: RegisterKind::Holding, address: 0x2000, count: 18 },
    RegisterBlock { kind: RegisterKind::Holding, address: 0x4000, count: 2 },
    RegisterBlock { kind: RegisterKind::Holding, address: 0x400A, count: 2 },
];

impl MeterModel for ModelARegisters {
    fn variant(&self) -> MeterVariant {
        MeterVariant::ModelA
    }

    fn register_plan(&self) -> &'static [RegisterBlock] {
        &MODEL_A_PLAN
    }

    fn decode_checked(&self, snapshot: CheckedSnapshot<'_>) -> Reading {
        let order = WordOrder::HighFirst;
        let main = snapshot.block(0);
        Reading {
            voltage: f32_from_words(pair(main, 0), order),
            current: f32_from_words(pair(main, 2), order),
            active_power: f32_from_words(pair(main, 4), order),
            reactive_power: f32_from_words(pair(main, 6), order),
            power_factor: f32_from_words(pair(main, 10), order),
            frequency: f32_from_words(pair(main, 14), order),
            import_energy: f32_from_words(pair(snapshot.block(1), 0), order),
            export_energy: f32_from_words(pair(snapshot.block(2), 0), order),
        }
    }
}

/// Integer-register meter: nine input registers at 0x0000.
pub struct ModelBRegisters;

const MODEL_B_PLAN: [RegisterBlock; 1] = [RegisterBlock {
    kind: RegisterKind::Input,
    address: 0x0000,
    count: 9,
}];

impl MeterModel for ModelBRegisters {
    fn variant(&self) -> MeterVariant {
        MeterVariant::ModelB
    }

    fn register_plan(&self) -> &'static [RegisterBlock] {
        &MODEL_B_PLAN
    }

    fn decode_checked(&self, snapshot: CheckedSnapshot<'_>) -> Reading {
        let order = WordOrder::LowFirst;
        let w = snapshot.block(0);
        Reading {
            voltage: scaled(w[0] as u32, 10.0),
            current: scaled(u32_from_words(pair(w, 1), order), 1000.0),
            active_power: scaled(u32_from_words(pair(w, 3), order), 10.0),
            // not measured by this model
            reactive_power: 0.0,
            import_energy: u32_from_words(pair(w, 5), order) as f32,
            frequency: scaled(w[7] as u32, 10.0),
            power_factor: scaled(w[8] as u32, 100.0),
            export_energy: Reading::default().export_energy,
        }
    }
}

/// Decodes `raw` with the register map of `variant`.
pub fn decode(variant: MeterVariant, raw: &RegisterSnapshot) -> Result<Reading, GatewayError> {
    variant.model().decode(raw)
}
