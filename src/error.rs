//! Error types for the settlement core

use thiserror::Error;

/// Result type alias for settlement operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {

    // =============================
    // Domain Errors
    // =============================

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient balance: available ₦{available}, requested ₦{requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error(
        "Agent is locked: unreconciled balance ₦{balance} has reached the limit ₦{limit}. \
         Reconcile before creating new deposits."
    )]
    AgentLocked { balance: i64, limit: i64 },

    #[error("Invalid state transition: current {current}, attempted {attempted}")]
    InvalidState { current: String, attempted: String },

    #[error("OTP has expired. Request a new OTP.")]
    OtpExpired,

    #[error("Maximum OTP verification attempts exceeded. Request a new OTP.")]
    OtpExhausted,

    #[error("No unreconciled balance to reconcile (current: ₦{balance})")]
    NothingToReconcile { balance: i64 },

    #[error("Ledger events are immutable: {0}")]
    Immutability(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
