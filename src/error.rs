//! Error types for contract-bus.

use thiserror::Error;

/// Failure code used when a provider method fails without a more specific code.
pub const SERVER_ERROR_CODE: i32 = 500;

/// Failure code used when a provider cannot decode the arguments it received.
pub const DECODE_ERROR_CODE: i32 = 400;

/// Main error type for all contract-bus operations.
#[derive(Debug, Error)]
pub enum ContractError {
    /// Malformed wire payload, or a payload whose shape does not match the bound type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The operation is not permitted in the current context
    /// (blocking call on a reactor thread, invoking an ignored method, ...).
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// No consumer is registered at the resolved address.
    #[error("No handler for address: {0}")]
    NoHandler(String),

    /// No reply arrived within the reply timeout.
    #[error("Timed out waiting for a reply from {0}")]
    Timeout(String),

    /// The provider failed the request. Only the message crosses the bus.
    #[error("Server invocation failed ({code}): {message}")]
    ServerInvocation {
        /// Failure code sent with the reply.
        code: i32,
        /// Failure message sent with the reply.
        message: String,
    },

    /// No copy strategy applies to the value.
    #[error("Cannot copy value of type {0}")]
    UnsupportedCopy(&'static str),

    /// A message was sent with a codec name the bus does not know.
    #[error("No codec registered under name: {0}")]
    UnknownCodec(String),

    /// The bus already holds a codec with this name.
    #[error("Codec already registered: {0}")]
    CodecAlreadyRegistered(String),

    /// Two methods of one registration resolved to the same address with different signatures.
    #[error("Address conflict: {address} is claimed by {first} and {second}")]
    AddressConflict {
        /// The contested address.
        address: String,
        /// Signature registered first.
        first: String,
        /// Signature that collided with it.
        second: String,
    },

    /// The bus has been shut down.
    #[error("Event bus closed")]
    BusClosed,

    /// I/O error while starting reactor threads.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

impl ContractError {
    /// Build the error a provider returns to fail a request with a specific code.
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        ContractError::ServerInvocation {
            code,
            message: message.into(),
        }
    }

    /// Map a failed reply back to its error kind.
    pub fn from_failure(code: i32, message: String) -> Self {
        match code {
            DECODE_ERROR_CODE => ContractError::Decode(message),
            _ => ContractError::ServerInvocation { code, message },
        }
    }

    /// Failure code this error is reported with when it fails a request.
    pub fn failure_code(&self) -> i32 {
        match self {
            ContractError::ServerInvocation { code, .. } => *code,
            ContractError::Decode(_) | ContractError::Json(_) => DECODE_ERROR_CODE,
            _ => SERVER_ERROR_CODE,
        }
    }

    /// Message this error is reported with when it fails a request.
    pub fn failure_message(&self) -> String {
        match self {
            ContractError::ServerInvocation { message, .. } => message.clone(),
            ContractError::Decode(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias using ContractError.
pub type Result<T> = std::result::Result<T, ContractError>;
