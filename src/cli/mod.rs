pub mod commands;

pub use commands::{build_cli, execute, log_level, CliAction};
