//! Descriptor error types

use thiserror::Error;

/// Errors raised while parsing filters or validating descriptor shapes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// Event name is not one of `add`, `remove`, `change`
    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),

    /// Vendor or product id is not a valid 16-bit number
    #[error("Invalid {field} '{value}': expected decimal or 0x-prefixed hex in 0..=65535")]
    InvalidId { field: &'static str, value: String },

    /// Event name has more than three `:`-separated parts
    #[error("Invalid event filter '{0}': expected <kind>[:<vid>[:<pid>]]")]
    InvalidFilter(String),

    /// Descriptor value is not a JSON object
    #[error("Descriptor is not an object")]
    NotAnObject,

    /// Descriptor is missing required keys
    #[error("Descriptor is missing keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    /// Descriptor carries keys outside the descriptor contract
    #[error("Descriptor has unexpected keys: {}", .0.join(", "))]
    UnexpectedKeys(Vec<String>),
}

/// Type alias for descriptor results
pub type Result<T> = std::result::Result<T, DescriptorError>;
