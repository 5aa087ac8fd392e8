//! Shared support types for the `armcore`/`armasm` crate pair.
//!
//! Both the instruction set (`armcore`) and the assembler (`armasm`) need to
//! parse mnemonics, condition codes, register names and shift kinds from
//! plain text, and both want the *same* error type when that parse fails.

use std::error::Error;
use std::fmt;

/// Error returned by [`EnumFromStr::from_str`] when a token does not name a
/// variant of the target enum.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ParseEnumError {
    pub value: String,
    pub enum_name: &'static str,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\" is not a valid {}",
            &self.value, &self.enum_name
        )
    }
}

impl Error for ParseEnumError {}

/// Implemented by field-less enums that can be parsed from the exact
/// spelling of one of their variants. Usually derived with
/// `#[derive(EnumFromStr)]` from `armutil-derive`.
pub trait EnumFromStr: Sized {
    fn from_str(s: &str) -> Result<Self, ParseEnumError>;
}
