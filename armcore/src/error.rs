//! Runtime error taxonomy. Parse-time errors live in `armasm`;
//! these are the errors that can only be raised once code is executing.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("address {address:#x} (size {size}) is outside any mapped section")]
    OutOfRange { address: u32, size: u32 },

    #[error("address {address:#x} (size {size}) has not been initialized")]
    Uninitialized { address: u32, size: u32 },
}

/// Malformed-bytecode vs. user-facing distinction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("memory access failed: {0}")]
    Memory(#[from] MemoryError),

    #[error("bytecode at {address:#x} does not decode to any known instruction family")]
    MalformedBytecode { address: u32 },

    #[error("division by zero")]
    DivisionByZero,

    #[error("branch target {target:#x} is not 4-byte aligned")]
    Misaligned { target: u32 },

    #[error("internal simulator error: {0}")]
    Internal(String),
}

/// Errors the facade can surface from `step`/`run`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FacadeError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("assertion failed at line {line}: {expression}")]
    AssertionFailed { line: usize, expression: String },

    #[error("no program has been loaded")]
    NoProgram,
}
