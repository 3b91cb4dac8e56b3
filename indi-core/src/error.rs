use thiserror::Error;

/// Main error type for INDI operations
#[derive(Error, Debug)]
pub enum IndiError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout")]
    Timeout,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid permission: {0}")]
    InvalidPermission(String),

    #[error("Wrong element kind: {0}")]
    WrongElementKind(String),

    #[error("Duplicate element: {0}")]
    DuplicateElement(String),

    #[error("Property already published: {0}")]
    AlreadyPublished(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Bad number format: {0}")]
    BadFormat(String),

    #[error("Switch rule violated: {0}")]
    RuleViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Result type alias for INDI operations
pub type IndiResult<T> = Result<T, IndiError>;
