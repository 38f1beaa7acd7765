//! Protocol module: turning raw serial text into heart-rate readings.

pub mod line_assembler;
pub mod line_parser;

pub use line_assembler::LineAssembler;
pub use line_parser::{parse_bpm, BpmReading};
