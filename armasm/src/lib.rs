//! Two-pass ARMv4-subset assembler: turns source text into the sections,
//! label table and assertion list `armcore::facade::Interpreter` runs
//! against.

pub mod ast;
pub mod dependency;
pub mod driver;
pub mod encoder;
pub mod error;
pub mod labels;
pub mod mnemonic;
pub mod parser;

pub use driver::{Assembler, AssemblerSettings, Assertion, AssertionPosition, PcBehavior};
pub use error::{AssembleError, ParseError};
