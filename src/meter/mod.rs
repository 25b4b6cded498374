pub mod models;
pub mod reading;

#[cfg(test)]
pub(crate) mod fixtures;

pub use models::{decode, CheckedSnapshot, MeterModel, MeterVariant, RegisterBlock, RegisterSnapshot, WordOrder};
pub use reading::Reading;
