//! Error type for value decoding.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("quantity is missing the 0x prefix: {0}")]
    MissingPrefix(String),

    #[error("quantity is empty")]
    EmptyQuantity,

    #[error("invalid hex quantity: {0}")]
    InvalidQuantity(String),

    #[error("quantity overflows {bits} bits: {value}")]
    Overflow { value: String, bits: u32 },

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
